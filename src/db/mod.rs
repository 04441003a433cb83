//! SQLite-backed visit history: schema management, the connection pool, and
//! the `HistoryDB` service that every operation hangs off.

mod bookmarks;
mod frecency;
mod maintenance;
mod places;
mod query;
mod visits;

pub use bookmarks::{
    BookmarkItem, ItemType, MENU_FOLDER_ID, ROOT_FOLDER_ID, TAGS_FOLDER_ID, TOOLBAR_FOLDER_ID,
    UNFILED_FOLDER_ID,
};
pub use frecency::{score_visits, FrecencyInputs, SampledVisit};
pub use maintenance::{MaintenanceReport, VacuumDecision};
pub use places::RemoveSummary;
pub use visits::AddUriRequest;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collation::{compare_titles, TITLE_COLLATION};
use crate::config::Config;
use crate::error::PlacesError;
use crate::observer::{HistoryObserver, ObserverId, Observers};
use crate::recent::RecentEvents;
use crate::time::{system_clock, Clock, USECS_PER_DAY};

type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

pub const SCHEMA_VERSION: i64 = 3;

/// Memory the cache-size percentage is taken from, in KiB.
const CACHE_BUDGET_KIB: i64 = 256 * 1024;

/// Don't make a second corrupt backup within this window.
const CORRUPT_BACKUP_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Busy timeout, per-connection pragmas and the title collation for every
/// pooled connection.
#[derive(Debug)]
struct ConnectionCustomizer {
    cache_kib: i64,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for ConnectionCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys=ON; PRAGMA cache_size=-{};",
            self.cache_kib
        ))?;
        conn.create_collation(TITLE_COLLATION, compare_titles)?;
        Ok(())
    }
}

/// Why a place was visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Link = 1,
    Typed = 2,
    Bookmark = 3,
    Embed = 4,
    RedirectPermanent = 5,
    RedirectTemporary = 6,
    Download = 7,
    FramedLink = 8,
}

impl TryFrom<u8> for Transition {
    type Error = PlacesError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Transition::Link),
            2 => Ok(Transition::Typed),
            3 => Ok(Transition::Bookmark),
            4 => Ok(Transition::Embed),
            5 => Ok(Transition::RedirectPermanent),
            6 => Ok(Transition::RedirectTemporary),
            7 => Ok(Transition::Download),
            8 => Ok(Transition::FramedLink),
            _ => Err(PlacesError::Validation(format!("invalid transition type {v}"))),
        }
    }
}

impl From<Transition> for u8 {
    fn from(t: Transition) -> u8 {
        t as u8
    }
}

impl Transition {
    pub fn is_redirect(self) -> bool {
        matches!(self, Transition::RedirectPermanent | Transition::RedirectTemporary)
    }

    /// Visits of these kinds don't count towards `visit_count`.
    pub fn is_excluded_from_count(self) -> bool {
        matches!(self, Transition::Embed | Transition::Download | Transition::FramedLink)
    }
}

/// A unique URL record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub rev_host: Option<String>,
    pub visit_count: i64,
    pub hidden: bool,
    pub typed: bool,
    pub favicon_id: Option<i64>,
    pub frecency: i32,
    pub last_visit_date: Option<i64>,
}

/// One recorded navigation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Visit {
    pub id: i64,
    pub place_id: i64,
    pub from_visit: Option<i64>,
    pub visit_date: i64,
    pub transition: Transition,
    pub session: i64,
}

/// What opening the store did to its schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaStatus {
    Created,
    Upgraded,
    Downgraded,
    Ok,
}

const PLACE_COLS: &str = "h.id, h.url, h.title, h.rev_host, h.visit_count, h.hidden, h.typed, \
    h.favicon_id, h.frecency, h.last_visit_date";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS places (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    title TEXT,
    rev_host TEXT,
    visit_count INTEGER NOT NULL DEFAULT 0,
    hidden INTEGER NOT NULL DEFAULT 0,
    typed INTEGER NOT NULL DEFAULT 0,
    favicon_id INTEGER,
    frecency INTEGER NOT NULL DEFAULT -1,
    last_visit_date INTEGER
);
CREATE INDEX IF NOT EXISTS idx_places_rev_host ON places(rev_host);
CREATE INDEX IF NOT EXISTS idx_places_visit_count ON places(visit_count);
CREATE INDEX IF NOT EXISTS idx_places_frecency ON places(frecency);
CREATE INDEX IF NOT EXISTS idx_places_last_visit ON places(last_visit_date);

CREATE TABLE IF NOT EXISTS visits (
    id INTEGER PRIMARY KEY,
    from_visit INTEGER,
    place_id INTEGER NOT NULL REFERENCES places(id) ON DELETE CASCADE,
    visit_date INTEGER NOT NULL,
    visit_type INTEGER NOT NULL,
    session INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_visits_place_date ON visits(place_id, visit_date);
CREATE INDEX IF NOT EXISTS idx_visits_from ON visits(from_visit);
CREATE INDEX IF NOT EXISTS idx_visits_date ON visits(visit_date);

CREATE TABLE IF NOT EXISTS favicons (
    id INTEGER PRIMARY KEY,
    url TEXT NOT NULL UNIQUE,
    mime_type TEXT,
    expiration INTEGER
);

CREATE TABLE IF NOT EXISTS input_history (
    place_id INTEGER NOT NULL,
    input TEXT NOT NULL,
    use_count REAL NOT NULL DEFAULT 0,
    PRIMARY KEY (place_id, input)
);

CREATE TABLE IF NOT EXISTS bookmarks (
    id INTEGER PRIMARY KEY,
    type INTEGER NOT NULL,
    fk INTEGER,
    parent INTEGER,
    position INTEGER NOT NULL DEFAULT 0,
    title TEXT,
    date_added INTEGER,
    last_modified INTEGER
);
CREATE INDEX IF NOT EXISTS idx_bookmarks_fk ON bookmarks(fk, type);
CREATE INDEX IF NOT EXISTS idx_bookmarks_parent ON bookmarks(parent, position);

CREATE TABLE IF NOT EXISTS anno_attributes (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS annos (
    id INTEGER PRIMARY KEY,
    place_id INTEGER NOT NULL,
    anno_attribute_id INTEGER NOT NULL,
    content TEXT,
    date_added INTEGER,
    last_modified INTEGER,
    UNIQUE (place_id, anno_attribute_id)
);

CREATE TABLE IF NOT EXISTS places_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

// visit_count ignores undefined, embed, download and framed-link visits.
const TRIGGERS: &str = r#"
CREATE TRIGGER IF NOT EXISTS visits_afterinsert AFTER INSERT ON visits BEGIN
    UPDATE places SET
        visit_count = visit_count + (NEW.visit_type NOT IN (0, 4, 7, 8)),
        last_visit_date = MAX(IFNULL(last_visit_date, 0), NEW.visit_date)
    WHERE id = NEW.place_id;
END;

CREATE TRIGGER IF NOT EXISTS visits_afterdelete AFTER DELETE ON visits BEGIN
    UPDATE places SET
        visit_count = visit_count - (OLD.visit_type NOT IN (0, 4, 7, 8)),
        last_visit_date = (SELECT MAX(visit_date) FROM visits WHERE place_id = OLD.place_id)
    WHERE id = OLD.place_id;
END;
"#;

type MigrationStep = fn(&Connection) -> Result<(), PlacesError>;

/// Ordered upgrade steps, keyed by the version they produce. Each step probes
/// before altering so it can be re-run safely.
const MIGRATIONS: &[(i64, MigrationStep)] = &[(2, migrate_v2), (3, migrate_v3)];

fn migrate_v2(conn: &Connection) -> Result<(), PlacesError> {
    if conn.prepare("SELECT frecency FROM places LIMIT 0").is_err() {
        conn.execute(
            "ALTER TABLE places ADD COLUMN frecency INTEGER NOT NULL DEFAULT -1",
            [],
        )?;
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_places_frecency ON places(frecency);
         CREATE TABLE IF NOT EXISTS input_history (
             place_id INTEGER NOT NULL,
             input TEXT NOT NULL,
             use_count REAL NOT NULL DEFAULT 0,
             PRIMARY KEY (place_id, input)
         );",
    )?;
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<(), PlacesError> {
    if conn.prepare("SELECT last_visit_date FROM places LIMIT 0").is_err() {
        conn.execute("ALTER TABLE places ADD COLUMN last_visit_date INTEGER", [])?;
        conn.execute(
            "UPDATE places SET last_visit_date = \
             (SELECT MAX(visit_date) FROM visits WHERE place_id = places.id)",
            [],
        )?;
        // Older stores counted every visit; recount with the exclusions.
        conn.execute(
            "UPDATE places SET visit_count = (SELECT COUNT(*) FROM visits \
             WHERE place_id = places.id AND visit_type NOT IN (0, 4, 7, 8))",
            [],
        )?;
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_places_last_visit ON places(last_visit_date);
         CREATE INDEX IF NOT EXISTS idx_visits_from ON visits(from_visit);",
    )?;
    conn.execute_batch(TRIGGERS)?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, PlacesError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

/// Run `f` inside BEGIN IMMEDIATE / COMMIT, rolling back on any error.
fn in_transaction<T>(
    conn: &Connection,
    f: impl FnOnce(&Connection) -> Result<T, PlacesError>,
) -> Result<T, PlacesError> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    match f(conn) {
        Ok(v) => {
            if let Err(e) = conn.execute_batch("COMMIT") {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e.into());
            }
            Ok(v)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Bring the schema on `conn` to [`SCHEMA_VERSION`].
///
/// A store that is already current is left untouched: no DDL runs.
pub fn ensure_current_schema(conn: &Connection) -> Result<SchemaStatus, PlacesError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if version == SCHEMA_VERSION {
        return Ok(SchemaStatus::Ok);
    }

    let schema_err = |e: PlacesError| match e {
        PlacesError::Schema(_) => e,
        other => PlacesError::Schema(other.to_string()),
    };

    if version == 0 && !table_exists(conn, "places")? {
        in_transaction(conn, |c| {
            c.execute_batch(SCHEMA)?;
            c.execute_batch(TRIGGERS)?;
            bookmarks::create_roots(c)?;
            c.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            Ok(())
        })
        .map_err(schema_err)?;
        info!(version = SCHEMA_VERSION, "schema created");
        return Ok(SchemaStatus::Created);
    }

    // An unversioned store with tables predates versioning: treat it as v1.
    let from = version.max(1);
    in_transaction(conn, |c| {
        for (target, step) in MIGRATIONS {
            if *target > from || from > SCHEMA_VERSION {
                step(c)?;
            }
        }
        // Tables added after v1 that the steps above don't cover. Runs last
        // so its indexes see the migrated columns.
        c.execute_batch(SCHEMA)?;
        if table_exists(c, "bookmarks")? {
            bookmarks::create_roots(c)?;
        }
        c.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    })
    .map_err(schema_err)?;

    if from > SCHEMA_VERSION {
        warn!(from, to = SCHEMA_VERSION, "schema downgraded");
        Ok(SchemaStatus::Downgraded)
    } else {
        info!(from, to = SCHEMA_VERSION, "schema upgraded");
        Ok(SchemaStatus::Upgraded)
    }
}

/// Open a plain connection and touch the header so a locked or corrupt file
/// is reported before the pool is built.
fn probe_file(path: &str) -> Result<(), PlacesError> {
    let conn = Connection::open(path).map_err(PlacesError::from_open)?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(PlacesError::from_open)?;
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))
        .map_err(PlacesError::from_open)?;
    Ok(())
}

fn corrupt_backup_path(path: &str) -> String {
    format!("{path}.corrupt")
}

/// Copy a corrupt store aside, unless a backup made within the last day
/// exists. Best effort: failures are logged and ignored.
fn backup_corrupt_file(path: &str) {
    let backup = corrupt_backup_path(path);
    let recent = std::fs::metadata(&backup)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .is_some_and(|age| age.as_secs() < CORRUPT_BACKUP_WINDOW_SECS);
    if recent {
        info!(backup = %backup, "recent corrupt backup exists, not making another");
        return;
    }
    if let Err(e) = std::fs::copy(path, &backup) {
        warn!(error = %e, backup = %backup, "corrupt database backup failed");
    } else {
        info!(backup = %backup, "corrupt database backed up");
    }
}

fn remove_store_files(path: &str) -> Result<(), PlacesError> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let p = format!("{path}{suffix}");
        match std::fs::remove_file(&p) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PlacesError::Schema(format!("remove {p}: {e}"))),
        }
    }
    Ok(())
}

/// The history service: owns the pool, the recent-event caches and the
/// observer list. Construct one per store and share it behind an `Arc`.
pub struct HistoryDB {
    pool: Pool<SqliteConnectionManager>,
    /// Serializes write transactions; SQLite allows one writer anyway, this
    /// keeps maintenance from interleaving with visit recording.
    write_lock: Mutex<()>,
    recent: RecentEvents,
    observers: Observers,
    config: Config,
    clock: Clock,
    private_browsing: AtomicBool,
    last_session: AtomicI64,
    schema_status: SchemaStatus,
    path: String,
}

impl HistoryDB {
    fn conn(&self) -> Result<PooledConn, PlacesError> {
        self.pool.get().map_err(|e| PlacesError::Internal(format!("pool: {e}")))
    }

    /// Run `f` as one write transaction.
    pub(crate) fn write_txn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, PlacesError>,
    ) -> Result<T, PlacesError> {
        let _guard = self.write_lock.lock();
        let conn = self.conn()?;
        in_transaction(&conn, f)
    }

    /// Run `f` against a pooled connection without a transaction.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, PlacesError>,
    ) -> Result<T, PlacesError> {
        let conn = self.conn()?;
        f(&conn)
    }

    /// Open (or create) a store with default configuration.
    pub fn open(path: &str) -> Result<Self, PlacesError> {
        Self::open_with(path, Config::default(), system_clock())
    }

    pub fn open_with_config(path: &str, config: Config) -> Result<Self, PlacesError> {
        Self::open_with(path, config, system_clock())
    }

    /// Open with explicit configuration and clock.
    ///
    /// A corrupt file is backed up (at most once a day) and replaced by an
    /// empty store, reported as [`SchemaStatus::Created`]. A locked file
    /// yields [`PlacesError::Locked`].
    pub fn open_with(path: &str, config: Config, clock: Clock) -> Result<Self, PlacesError> {
        let in_memory = path == ":memory:";
        let mut recovered = false;
        if !in_memory {
            match probe_file(path) {
                Ok(()) => {}
                Err(PlacesError::Corrupt(msg)) => {
                    warn!(path, error = %msg, "database corrupt, recreating");
                    backup_corrupt_file(path);
                    remove_store_files(path)?;
                    recovered = true;
                }
                Err(e) => return Err(e),
            }
        }

        let pool_size = if in_memory { 2 } else { 8 };
        let manager = if in_memory {
            // Shared cache so all pool connections see the same in-memory DB.
            let name = uuid::Uuid::new_v4().to_string();
            SqliteConnectionManager::file(format!("file:{name}?mode=memory&cache=shared"))
        } else {
            SqliteConnectionManager::file(path)
        };
        let cache_kib =
            (CACHE_BUDGET_KIB * i64::from(config.history.cache_percentage()) / 100).max(1);
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(Duration::from_secs(10))
            .connection_customizer(Box::new(ConnectionCustomizer { cache_kib }))
            .build(manager)
            .map_err(|e| PlacesError::Internal(format!("pool: {e}")))?;

        let conn = pool.get().map_err(|e| PlacesError::Internal(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA auto_vacuum=INCREMENTAL;")
            .map_err(PlacesError::from_open)?;
        let mut schema_status = ensure_current_schema(&conn)?;
        if recovered {
            schema_status = SchemaStatus::Created;
        }
        let last_session: i64 =
            conn.query_row("SELECT IFNULL(MAX(session), 0) FROM visits", [], |r| r.get(0))?;
        drop(conn);

        let recent = RecentEvents::new(&config.history, Arc::clone(&clock));
        info!(path, status = ?schema_status, "history store opened");
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
            recent,
            observers: Observers::default(),
            config,
            clock,
            private_browsing: AtomicBool::new(false),
            last_session: AtomicI64::new(last_session),
            schema_status,
            path: path.to_string(),
        })
    }

    pub fn schema_status(&self) -> SchemaStatus {
        self.schema_status
    }

    /// Re-run the schema check on a live store.
    pub fn ensure_current_schema(&self) -> Result<SchemaStatus, PlacesError> {
        let _guard = self.write_lock.lock();
        let conn = self.conn()?;
        ensure_current_schema(&conn)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recent_events(&self) -> &RecentEvents {
        &self.recent
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn add_observer(&self, observer: Arc<dyn HistoryObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    pub(crate) fn observers(&self) -> &Observers {
        &self.observers
    }

    /// While on, visits are not recorded.
    pub fn set_private_browsing(&self, on: bool) {
        self.private_browsing.store(on, Ordering::SeqCst);
    }

    pub fn private_browsing(&self) -> bool {
        self.private_browsing.load(Ordering::SeqCst)
    }

    pub(crate) fn new_session_id(&self) -> i64 {
        self.last_session.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Database file size in bytes (via SQLite pragma).
    pub fn db_size_bytes(&self) -> Result<i64, PlacesError> {
        self.read(|c| {
            Ok(c.query_row(
                "SELECT page_count * page_size FROM pragma_page_count, pragma_page_size",
                [],
                |r| r.get(0),
            )?)
        })
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>, PlacesError> {
        self.read(|c| get_meta(c, key))
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), PlacesError> {
        let c = self.conn()?;
        set_meta(&c, key, value)
    }

    /// A stamp that doesn't parse as a number counts as missing.
    pub(crate) fn meta_i64(&self, key: &str) -> Result<Option<i64>, PlacesError> {
        Ok(self.get_meta(key)?.and_then(|v| v.parse().ok()))
    }

    /// Days since `key` was stamped, or `None` if it never was.
    pub(crate) fn days_since_meta(&self, key: &str, now: i64) -> Result<Option<i64>, PlacesError> {
        Ok(self.meta_i64(key)?.map(|t| (now - t) / USECS_PER_DAY))
    }
}

pub(crate) fn get_meta(c: &Connection, key: &str) -> Result<Option<String>, PlacesError> {
    Ok(c
        .query_row("SELECT value FROM places_meta WHERE key = ?1", [key], |r| r.get(0))
        .optional()?)
}

pub(crate) fn set_meta(c: &Connection, key: &str, value: &str) -> Result<(), PlacesError> {
    c.execute(
        "INSERT OR REPLACE INTO places_meta (key, value) VALUES (?1, ?2)",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

/// Map a row selected with [`PLACE_COLS`].
fn row_to_place(row: &rusqlite::Row) -> rusqlite::Result<Place> {
    Ok(Place {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        rev_host: row.get(3)?,
        visit_count: row.get(4)?,
        hidden: row.get::<_, i64>(5)? != 0,
        typed: row.get::<_, i64>(6)? != 0,
        favicon_id: row.get(7)?,
        frecency: row.get(8)?,
        last_visit_date: row.get(9)?,
    })
}

/// A stored type code this build doesn't know.
pub(crate) fn bad_code(column: usize, e: PlacesError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Integer, Box::new(e))
}

fn row_to_visit(row: &rusqlite::Row) -> rusqlite::Result<Visit> {
    let code: u8 = row.get(4)?;
    Ok(Visit {
        id: row.get(0)?,
        place_id: row.get(1)?,
        from_visit: row.get(2)?,
        visit_date: row.get(3)?,
        transition: Transition::try_from(code).map_err(|e| bad_code(4, e))?,
        session: row.get(5)?,
    })
}
