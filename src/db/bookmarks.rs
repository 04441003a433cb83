//! The bookmark tree, tags and page annotations, kept to what history needs:
//! bookmarked pages rank higher, are never expired, and can be queried by
//! folder or tag.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use super::places::{ensure_place, find_place};
use super::{bad_code, frecency, HistoryDB};
use crate::error::PlacesError;
use crate::uri;

pub const ROOT_FOLDER_ID: i64 = 1;
pub const MENU_FOLDER_ID: i64 = 2;
pub const TOOLBAR_FOLDER_ID: i64 = 3;
pub const TAGS_FOLDER_ID: i64 = 4;
pub const UNFILED_FOLDER_ID: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Bookmark = 1,
    Folder = 2,
    Separator = 3,
}

impl TryFrom<u8> for ItemType {
    type Error = PlacesError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(ItemType::Bookmark),
            2 => Ok(ItemType::Folder),
            3 => Ok(ItemType::Separator),
            _ => Err(PlacesError::Validation(format!("invalid item type {v}"))),
        }
    }
}

impl From<ItemType> for u8 {
    fn from(t: ItemType) -> u8 {
        t as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookmarkItem {
    pub id: i64,
    pub item_type: ItemType,
    pub place_id: Option<i64>,
    pub parent: Option<i64>,
    pub position: i64,
    pub title: Option<String>,
    pub date_added: i64,
    pub last_modified: i64,
}

const ITEM_COLS: &str = "id, type, fk, parent, position, title, date_added, last_modified";

fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<BookmarkItem> {
    let code: u8 = row.get(1)?;
    Ok(BookmarkItem {
        id: row.get(0)?,
        item_type: ItemType::try_from(code).map_err(|e| bad_code(1, e))?,
        place_id: row.get(2)?,
        parent: row.get(3)?,
        position: row.get(4)?,
        title: row.get(5)?,
        date_added: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        last_modified: row.get::<_, Option<i64>>(7)?.unwrap_or(0),
    })
}

/// Insert the fixed root folders if they are missing.
pub(crate) fn create_roots(c: &Connection) -> Result<(), PlacesError> {
    c.execute(
        "INSERT OR IGNORE INTO bookmarks (id, type, parent, position, title) \
         VALUES (?1, 2, NULL, 0, '')",
        [ROOT_FOLDER_ID],
    )?;
    let children = [
        (MENU_FOLDER_ID, "menu"),
        (TOOLBAR_FOLDER_ID, "toolbar"),
        (TAGS_FOLDER_ID, "tags"),
        (UNFILED_FOLDER_ID, "unfiled"),
    ];
    for (pos, (id, title)) in children.iter().enumerate() {
        c.execute(
            "INSERT OR IGNORE INTO bookmarks (id, type, parent, position, title) \
             VALUES (?1, 2, ?2, ?3, ?4)",
            params![id, ROOT_FOLDER_ID, pos as i64, title],
        )?;
    }
    Ok(())
}

pub(crate) fn get_item(c: &Connection, id: i64) -> Result<Option<BookmarkItem>, PlacesError> {
    let sql = format!("SELECT {ITEM_COLS} FROM bookmarks WHERE id = ?1");
    Ok(c.query_row(&sql, [id], row_to_item).optional()?)
}

pub(crate) fn children(c: &Connection, folder: i64) -> Result<Vec<BookmarkItem>, PlacesError> {
    let sql = format!("SELECT {ITEM_COLS} FROM bookmarks WHERE parent = ?1 ORDER BY position, id");
    let mut stmt = c.prepare(&sql)?;
    let items = stmt.query_map([folder], row_to_item)?.collect::<Result<_, _>>()?;
    Ok(items)
}

pub(crate) fn parent_of(c: &Connection, id: i64) -> Result<Option<i64>, PlacesError> {
    Ok(c
        .query_row("SELECT parent FROM bookmarks WHERE id = ?1", [id], |r| r.get(0))
        .optional()?
        .flatten())
}

fn require_folder(c: &Connection, id: i64) -> Result<(), PlacesError> {
    match get_item(c, id)? {
        Some(item) if item.item_type == ItemType::Folder => Ok(()),
        Some(_) => Err(PlacesError::Validation(format!("item {id} is not a folder"))),
        None => Err(PlacesError::NotFound),
    }
}

fn next_position(c: &Connection, parent: i64) -> Result<i64, PlacesError> {
    Ok(c.query_row(
        "SELECT IFNULL(MAX(position) + 1, 0) FROM bookmarks WHERE parent = ?1",
        [parent],
        |r| r.get(0),
    )?)
}

fn insert_item(
    c: &Connection,
    item_type: ItemType,
    place_id: Option<i64>,
    parent: i64,
    title: Option<&str>,
    now: i64,
) -> Result<i64, PlacesError> {
    let position = next_position(c, parent)?;
    c.execute(
        "INSERT INTO bookmarks (type, fk, parent, position, title, date_added, last_modified) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![u8::from(item_type), place_id, parent, position, title, now],
    )?;
    Ok(c.last_insert_rowid())
}

fn anno_attribute_id(c: &Connection, name: &str) -> Result<i64, PlacesError> {
    c.execute("INSERT OR IGNORE INTO anno_attributes (name) VALUES (?1)", [name])?;
    Ok(c.query_row("SELECT id FROM anno_attributes WHERE name = ?1", [name], |r| r.get(0))?)
}

impl HistoryDB {
    pub fn create_folder(&self, parent: i64, title: &str) -> Result<i64, PlacesError> {
        let now = self.now();
        self.write_txn(|c| {
            require_folder(c, parent)?;
            insert_item(c, ItemType::Folder, None, parent, Some(title), now)
        })
    }

    /// Bookmark `url` at the end of `parent`. The page is created if needed
    /// and its frecency recomputed as bookmarked.
    pub fn insert_bookmark(&self, parent: i64, url: &str, title: &str) -> Result<i64, PlacesError> {
        let url = uri::parse(url)?;
        let now = self.now();
        let id = self.write_txn(|c| {
            require_folder(c, parent)?;
            let place_id = ensure_place(c, &url)?;
            let id = insert_item(c, ItemType::Bookmark, Some(place_id), parent, Some(title), now)?;
            frecency::update_frecency(c, place_id, &self.config().frecency, now)?;
            Ok(id)
        })?;
        debug!(id, parent, url = %url, "bookmark inserted");
        Ok(id)
    }

    pub fn insert_separator(&self, parent: i64) -> Result<i64, PlacesError> {
        let now = self.now();
        self.write_txn(|c| {
            require_folder(c, parent)?;
            insert_item(c, ItemType::Separator, None, parent, None, now)
        })
    }

    /// Remove an item; folders take their contents with them. Roots can't be
    /// removed.
    pub fn remove_bookmark(&self, id: i64) -> Result<(), PlacesError> {
        if (ROOT_FOLDER_ID..=UNFILED_FOLDER_ID).contains(&id) {
            return Err(PlacesError::Validation("root folders can't be removed".into()));
        }
        let now = self.now();
        self.write_txn(|c| {
            get_item(c, id)?.ok_or(PlacesError::NotFound)?;
            let mut pending = vec![id];
            let mut places = Vec::new();
            while let Some(next) = pending.pop() {
                for child in children(c, next)? {
                    pending.push(child.id);
                }
                if let Some(item) = get_item(c, next)? {
                    places.extend(item.place_id);
                }
                c.execute("DELETE FROM bookmarks WHERE id = ?1", [next])?;
            }
            for place_id in places {
                frecency::update_frecency(c, place_id, &self.config().frecency, now)?;
            }
            Ok(())
        })
    }

    pub fn get_bookmark(&self, id: i64) -> Result<Option<BookmarkItem>, PlacesError> {
        self.read(|c| get_item(c, id))
    }

    /// Direct children of a folder in position order.
    pub fn folder_children(&self, folder: i64) -> Result<Vec<BookmarkItem>, PlacesError> {
        self.read(|c| children(c, folder))
    }

    pub fn is_bookmarked(&self, url: &str) -> Result<bool, PlacesError> {
        let url = uri::normalize(url)?;
        self.read(|c| {
            let Some(place) = find_place(c, &url)? else {
                return Ok(false);
            };
            Ok(c
                .query_row(
                    "SELECT 1 FROM bookmarks b WHERE b.fk = ?1 AND b.type = 1 \
                     AND b.parent NOT IN (SELECT id FROM bookmarks WHERE parent = ?2) LIMIT 1",
                    params![place.id, TAGS_FOLDER_ID],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
    }

    /// Tag a page. Tags are folders under the tags root holding one bookmark
    /// per tagged page; tagging twice is a no-op.
    pub fn tag_uri(&self, url: &str, tags: &[&str]) -> Result<(), PlacesError> {
        let url = uri::parse(url)?;
        let now = self.now();
        self.write_txn(|c| {
            let place_id = ensure_place(c, &url)?;
            for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
                let folder: Option<i64> = c
                    .query_row(
                        "SELECT id FROM bookmarks WHERE parent = ?1 AND type = 2 AND title = ?2",
                        params![TAGS_FOLDER_ID, tag],
                        |r| r.get(0),
                    )
                    .optional()?;
                let folder = match folder {
                    Some(f) => f,
                    None => insert_item(c, ItemType::Folder, None, TAGS_FOLDER_ID, Some(tag), now)?,
                };
                let tagged: Option<i64> = c
                    .query_row(
                        "SELECT id FROM bookmarks WHERE parent = ?1 AND fk = ?2",
                        params![folder, place_id],
                        |r| r.get(0),
                    )
                    .optional()?;
                if tagged.is_none() {
                    insert_item(c, ItemType::Bookmark, Some(place_id), folder, None, now)?;
                }
            }
            frecency::update_frecency(c, place_id, &self.config().frecency, now)?;
            Ok(())
        })
    }

    /// Tags on a page, alphabetical.
    pub fn tags_for(&self, url: &str) -> Result<Vec<String>, PlacesError> {
        let url = uri::normalize(url)?;
        self.read(|c| {
            let mut stmt = c.prepare(
                "SELECT t.title FROM bookmarks b \
                 JOIN bookmarks t ON t.id = b.parent \
                 JOIN places h ON h.id = b.fk \
                 WHERE h.url = ?1 AND t.parent = ?2 ORDER BY t.title",
            )?;
            let tags = stmt
                .query_map(params![url, TAGS_FOLDER_ID], |r| r.get(0))?
                .collect::<Result<_, _>>()?;
            Ok(tags)
        })
    }

    pub fn set_page_annotation(&self, url: &str, name: &str, value: &str) -> Result<(), PlacesError> {
        let url = uri::parse(url)?;
        let now = self.now();
        self.write_txn(|c| {
            let place_id = ensure_place(c, &url)?;
            let attr = anno_attribute_id(c, name)?;
            c.execute(
                "INSERT INTO annos (place_id, anno_attribute_id, content, date_added, last_modified) \
                 VALUES (?1, ?2, ?3, ?4, ?4) \
                 ON CONFLICT (place_id, anno_attribute_id) \
                 DO UPDATE SET content = excluded.content, last_modified = excluded.last_modified",
                params![place_id, attr, value, now],
            )?;
            Ok(())
        })
    }

    pub fn get_page_annotation(&self, url: &str, name: &str) -> Result<Option<String>, PlacesError> {
        let url = uri::normalize(url)?;
        self.read(|c| {
            Ok(c
                .query_row(
                    "SELECT a.content FROM annos a \
                     JOIN anno_attributes n ON n.id = a.anno_attribute_id \
                     JOIN places h ON h.id = a.place_id \
                     WHERE h.url = ?1 AND n.name = ?2",
                    params![url, name],
                    |r| r.get(0),
                )
                .optional()?
                .flatten())
        })
    }

    /// Returns false if the page had no such annotation.
    pub fn remove_page_annotation(&self, url: &str, name: &str) -> Result<bool, PlacesError> {
        let url = uri::normalize(url)?;
        self.write_txn(|c| {
            let n = c.execute(
                "DELETE FROM annos WHERE place_id = (SELECT id FROM places WHERE url = ?1) \
                 AND anno_attribute_id = (SELECT id FROM anno_attributes WHERE name = ?2)",
                params![url, name],
            )?;
            Ok(n > 0)
        })
    }
}
