use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use super::{frecency, row_to_place, row_to_visit, HistoryDB, Place, Visit, PLACE_COLS};
use crate::error::PlacesError;
use crate::uri;

/// Places matching this are kept even when their last visit goes away.
pub(crate) const PROTECTED_PLACE: &str = "(EXISTS (SELECT 1 FROM bookmarks b WHERE b.fk = h.id) \
    OR EXISTS (SELECT 1 FROM annos a WHERE a.place_id = h.id) \
    OR SUBSTR(h.url, 1, 6) = 'place:')";

/// What a removal did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoveSummary {
    pub visits_removed: usize,
    pub places_removed: usize,
}

/// Visit bookkeeping read before recording a visit.
pub(crate) struct VisitStats {
    pub id: i64,
    pub hidden: bool,
    pub typed: bool,
}

/// Comma-joined ids for an `IN (...)` list. Only ever built from integers.
pub(crate) fn id_list(ids: &[i64]) -> String {
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
}

pub(crate) fn find_place(c: &Connection, url: &str) -> Result<Option<Place>, PlacesError> {
    let sql = format!("SELECT {PLACE_COLS} FROM places h WHERE h.url = ?1");
    Ok(c.query_row(&sql, [url], row_to_place).optional()?)
}

pub(crate) fn place_by_id(c: &Connection, id: i64) -> Result<Option<Place>, PlacesError> {
    let sql = format!("SELECT {PLACE_COLS} FROM places h WHERE h.id = ?1");
    Ok(c.query_row(&sql, [id], row_to_place).optional()?)
}

pub(crate) fn visit_stats(c: &Connection, url: &str) -> Result<Option<VisitStats>, PlacesError> {
    Ok(c
        .query_row(
            "SELECT id, hidden, typed FROM places WHERE url = ?1",
            [url],
            |r| {
                Ok(VisitStats {
                    id: r.get(0)?,
                    hidden: r.get::<_, i64>(1)? != 0,
                    typed: r.get::<_, i64>(2)? != 0,
                })
            },
        )
        .optional()?)
}

/// Insert a page that has never been seen. Frecency starts invalid (-1) and
/// the title falls back to one generated from the URL.
pub(crate) fn insert_place(
    c: &Connection,
    url: &Url,
    hidden: bool,
    typed: bool,
) -> Result<i64, PlacesError> {
    c.execute(
        "INSERT INTO places (url, title, rev_host, hidden, typed, frecency) \
         VALUES (?1, ?2, ?3, ?4, ?5, -1)",
        params![
            url.as_str(),
            uri::title_from_uri(url),
            uri::reversed_host(url),
            hidden as i64,
            typed as i64,
        ],
    )?;
    Ok(c.last_insert_rowid())
}

/// Existing place id for `url`, creating a hidden unvisited page if needed.
pub(crate) fn ensure_place(c: &Connection, url: &Url) -> Result<i64, PlacesError> {
    match visit_stats(c, url.as_str())? {
        Some(s) => Ok(s.id),
        None => insert_place(c, url, true, false),
    }
}

/// Most recent visit of `url` as (visit id, session).
pub(crate) fn last_visit(c: &Connection, url: &str) -> Result<Option<(i64, i64)>, PlacesError> {
    Ok(c
        .query_row(
            "SELECT v.id, v.session FROM visits v JOIN places h ON h.id = v.place_id \
             WHERE h.url = ?1 ORDER BY v.visit_date DESC, v.id DESC LIMIT 1",
            [url],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?)
}

/// Delete the visit-less, unprotected places among `ids`. Returns the URLs
/// of the places that went away.
pub(crate) fn delete_orphans(c: &Connection, ids: &[i64]) -> Result<Vec<String>, PlacesError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT h.id, h.url FROM places h WHERE h.id IN ({}) \
         AND NOT EXISTS (SELECT 1 FROM visits v WHERE v.place_id = h.id) \
         AND NOT {PROTECTED_PLACE}",
        id_list(ids)
    );
    let mut stmt = c.prepare(&sql)?;
    let orphans: Vec<(i64, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    if orphans.is_empty() {
        return Ok(Vec::new());
    }
    let orphan_ids: Vec<i64> = orphans.iter().map(|(id, _)| *id).collect();
    let list = id_list(&orphan_ids);
    c.execute(&format!("DELETE FROM input_history WHERE place_id IN ({list})"), [])?;
    c.execute(&format!("DELETE FROM places WHERE id IN ({list})"), [])?;
    Ok(orphans.into_iter().map(|(_, url)| url).collect())
}

/// Removal rules shared by every remove path: drop all visits of `ids`,
/// then the places that are left unvisited and unprotected. Survivors get
/// their frecency recomputed, or invalidated when `bulk` is set.
fn remove_place_ids(
    c: &Connection,
    ids: &[i64],
    bulk: bool,
    db: &HistoryDB,
) -> Result<RemoveSummary, PlacesError> {
    if ids.is_empty() {
        return Ok(RemoveSummary::default());
    }
    let list = id_list(ids);
    let visits_removed =
        c.execute(&format!("DELETE FROM visits WHERE place_id IN ({list})"), [])?;
    let removed = delete_orphans(c, ids)?;

    let survivors = format!("SELECT id FROM places WHERE id IN ({list})");
    let survivor_ids: Vec<i64> = c
        .prepare(&survivors)?
        .query_map([], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    if bulk {
        c.execute(
            &format!("UPDATE places SET frecency = -1 WHERE id IN ({})", id_list(&survivor_ids)),
            [],
        )?;
    } else {
        let now = db.now();
        for id in survivor_ids {
            frecency::update_frecency(c, id, &db.config().frecency, now)?;
        }
    }
    Ok(RemoveSummary { visits_removed, places_removed: removed.len() })
}

fn urls_for(c: &Connection, ids: &[i64]) -> Result<Vec<String>, PlacesError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!("SELECT url FROM places WHERE id IN ({})", id_list(ids));
    let mut stmt = c.prepare(&sql)?;
    let urls = stmt.query_map([], |r| r.get(0))?.collect::<Result<_, _>>()?;
    Ok(urls)
}

impl HistoryDB {
    pub fn get_place(&self, url: &str) -> Result<Option<Place>, PlacesError> {
        let url = uri::normalize(url)?;
        self.read(|c| find_place(c, &url))
    }

    pub fn place_id(&self, url: &str) -> Result<Option<i64>, PlacesError> {
        Ok(self.get_place(url)?.map(|p| p.id))
    }

    /// True if the page has at least one visit. Hidden pages count.
    pub fn is_visited(&self, url: &str) -> Result<bool, PlacesError> {
        let url = uri::normalize(url)?;
        self.read(|c| {
            Ok(c
                .query_row(
                    "SELECT 1 FROM places h WHERE h.url = ?1 \
                     AND EXISTS (SELECT 1 FROM visits v WHERE v.place_id = h.id)",
                    [&url],
                    |_| Ok(()),
                )
                .optional()?
                .is_some())
        })
    }

    /// `None` for unknown pages and pages whose title was cleared.
    pub fn get_page_title(&self, url: &str) -> Result<Option<String>, PlacesError> {
        Ok(self.get_place(url)?.and_then(|p| p.title))
    }

    /// An empty title clears the stored one. Ignored in private browsing.
    pub fn set_page_title(&self, url: &str, title: &str) -> Result<(), PlacesError> {
        if self.private_browsing() {
            return Ok(());
        }
        let url = uri::normalize(url)?;
        let title = (!title.is_empty()).then(|| uri::truncate_title(title));
        let changed = self.write_txn(|c| {
            let place = find_place(c, &url)?.ok_or(PlacesError::NotFound)?;
            if place.title == title {
                return Ok(false);
            }
            c.execute(
                "UPDATE places SET title = ?1 WHERE id = ?2",
                params![title, place.id],
            )?;
            Ok(true)
        })?;
        if changed {
            let t = title.as_deref().unwrap_or("");
            self.observers().notify(|o| o.on_title_changed(&url, t));
        }
        Ok(())
    }

    /// The next visit to `url` without a referrer is classified as typed.
    pub fn mark_page_as_typed(&self, url: &str) -> Result<(), PlacesError> {
        let url = uri::normalize(url)?;
        self.recent_events().mark_typed(&url);
        Ok(())
    }

    /// The next visit to `url` without a referrer is classified as a
    /// bookmark click.
    pub fn mark_page_as_followed_bookmark(&self, url: &str) -> Result<(), PlacesError> {
        let url = uri::normalize(url)?;
        self.recent_events().mark_bookmarked(&url);
        Ok(())
    }

    /// Visits of `url`, oldest first.
    pub fn get_visits(&self, url: &str) -> Result<Vec<Visit>, PlacesError> {
        let url = uri::normalize(url)?;
        self.read(|c| {
            let mut stmt = c.prepare(
                "SELECT v.id, v.place_id, v.from_visit, v.visit_date, v.visit_type, v.session \
                 FROM visits v JOIN places h ON h.id = v.place_id \
                 WHERE h.url = ?1 ORDER BY v.visit_date ASC, v.id ASC",
            )?;
            let visits = stmt.query_map([&url], row_to_visit)?.collect::<Result<_, _>>()?;
            Ok(visits)
        })
    }

    pub fn get_visit(&self, visit_id: i64) -> Result<Option<Visit>, PlacesError> {
        self.read(|c| {
            Ok(c
                .query_row(
                    "SELECT id, place_id, from_visit, visit_date, visit_type, session \
                     FROM visits WHERE id = ?1",
                    [visit_id],
                    row_to_visit,
                )
                .optional()?)
        })
    }

    pub fn visit_total(&self) -> Result<i64, PlacesError> {
        self.read(|c| Ok(c.query_row("SELECT COUNT(*) FROM visits", [], |r| r.get(0))?))
    }

    pub fn place_total(&self) -> Result<i64, PlacesError> {
        self.read(|c| Ok(c.query_row("SELECT COUNT(*) FROM places", [], |r| r.get(0))?))
    }

    /// Remove one page's visits, and the page itself unless it is
    /// bookmarked, annotated or a saved query.
    pub fn remove_page(&self, url: &str) -> Result<RemoveSummary, PlacesError> {
        let url = uri::normalize(url)?;
        let summary = self.write_txn(|c| match find_place(c, &url)? {
            Some(p) => remove_place_ids(c, &[p.id], false, self),
            None => Ok(RemoveSummary::default()),
        })?;
        if summary != RemoveSummary::default() {
            self.observers().notify(|o| o.on_delete_uri(&url));
        }
        Ok(summary)
    }

    pub fn remove_pages(&self, urls: &[&str]) -> Result<RemoveSummary, PlacesError> {
        let specs = urls
            .iter()
            .map(|u| uri::normalize(u))
            .collect::<Result<Vec<_>, _>>()?;
        self.remove_where(|c| {
            let mut ids = Vec::with_capacity(specs.len());
            for spec in &specs {
                if let Some(p) = find_place(c, spec)? {
                    ids.push(p.id);
                }
            }
            Ok(ids)
        })
    }

    /// Remove every page on `host`. With `entire_domain`, subdomains go too.
    /// An empty host selects local files.
    pub fn remove_pages_from_host(
        &self,
        host: &str,
        entire_domain: bool,
    ) -> Result<RemoveSummary, PlacesError> {
        let rev = uri::reverse_host(&host.to_lowercase());
        self.remove_where(|c| {
            let ids: Vec<i64> = if entire_domain && !host.is_empty() {
                let upper = format!("{}/", &rev[..rev.len() - 1]);
                c.prepare("SELECT id FROM places WHERE rev_host >= ?1 AND rev_host < ?2")?
                    .query_map(params![rev, upper], |r| r.get(0))?
                    .collect::<Result<_, _>>()?
            } else {
                c.prepare("SELECT id FROM places WHERE rev_host = ?1")?
                    .query_map([&rev], |r| r.get(0))?
                    .collect::<Result<_, _>>()?
            };
            Ok(ids)
        })
    }

    /// Remove every page with at least one visit in `[begin, end]`.
    pub fn remove_pages_by_timeframe(
        &self,
        begin: i64,
        end: i64,
    ) -> Result<RemoveSummary, PlacesError> {
        if begin > end {
            return Err(PlacesError::Validation("begin is after end".into()));
        }
        self.remove_where(|c| {
            let ids: Vec<i64> = c
                .prepare(
                    "SELECT DISTINCT place_id FROM visits \
                     WHERE visit_date >= ?1 AND visit_date <= ?2",
                )?
                .query_map(params![begin, end], |r| r.get(0))?
                .collect::<Result<_, _>>()?;
            Ok(ids)
        })
    }

    /// Remove only the visits in `[begin, end]`. Pages left without any
    /// visit go too, unless protected; pages visited outside the range stay
    /// with their frecency invalidated.
    pub fn remove_visits_by_timeframe(
        &self,
        begin: i64,
        end: i64,
    ) -> Result<RemoveSummary, PlacesError> {
        if begin > end {
            return Err(PlacesError::Validation("begin is after end".into()));
        }
        let (summary, urls) = self.write_txn(|c| {
            let ids: Vec<i64> = c
                .prepare(
                    "SELECT DISTINCT place_id FROM visits \
                     WHERE visit_date >= ?1 AND visit_date <= ?2",
                )?
                .query_map(params![begin, end], |r| r.get(0))?
                .collect::<Result<_, _>>()?;
            if ids.is_empty() {
                return Ok((RemoveSummary::default(), Vec::new()));
            }
            let visits_removed = c.execute(
                "DELETE FROM visits WHERE visit_date >= ?1 AND visit_date <= ?2",
                params![begin, end],
            )?;
            let removed = delete_orphans(c, &ids)?;
            c.execute(
                &format!("UPDATE places SET frecency = -1 WHERE id IN ({})", id_list(&ids)),
                [],
            )?;
            Ok((RemoveSummary { visits_removed, places_removed: removed.len() }, removed))
        })?;
        if !urls.is_empty() {
            self.observers().begin_batch();
            for url in &urls {
                self.observers().notify(|o| o.on_delete_uri(url));
            }
            self.observers().end_batch();
        }
        debug!(
            places = summary.places_removed,
            visits = summary.visits_removed,
            "visits removed by timeframe"
        );
        Ok(summary)
    }

    /// Bulk removal: select place ids, remove them in one transaction, then
    /// notify inside an update batch.
    fn remove_where(
        &self,
        select: impl FnOnce(&Connection) -> Result<Vec<i64>, PlacesError>,
    ) -> Result<RemoveSummary, PlacesError> {
        let (summary, urls) = self.write_txn(|c| {
            let ids = select(c)?;
            let urls = urls_for(c, &ids)?;
            let summary = remove_place_ids(c, &ids, true, self)?;
            Ok((summary, urls))
        })?;
        if !urls.is_empty() {
            self.observers().begin_batch();
            for url in &urls {
                self.observers().notify(|o| o.on_delete_uri(url));
            }
            self.observers().end_batch();
        }
        debug!(
            places = summary.places_removed,
            visits = summary.visits_removed,
            "pages removed"
        );
        Ok(summary)
    }

    /// Clear history: every visit goes, as do unprotected places, adaptive
    /// input and the recent-event caches.
    pub fn remove_all_pages(&self) -> Result<RemoveSummary, PlacesError> {
        let summary = self.write_txn(|c| {
            let visits_removed = c.execute("DELETE FROM visits", [])?;
            let places_removed = c.execute(
                &format!("DELETE FROM places WHERE id IN (SELECT h.id FROM places h WHERE NOT {PROTECTED_PLACE})"),
                [],
            )?;
            c.execute("DELETE FROM input_history", [])?;
            c.execute("UPDATE places SET frecency = -1, typed = 0", [])?;
            frecency::fix_invalid(c, &self.config().frecency, self.now())?;
            Ok(RemoveSummary { visits_removed, places_removed })
        })?;
        self.recent_events().clear();
        self.observers().begin_batch();
        self.observers().notify(|o| o.on_clear_history());
        self.observers().end_batch();
        info!(
            places = summary.places_removed,
            visits = summary.visits_removed,
            "history cleared"
        );
        Ok(summary)
    }
}
