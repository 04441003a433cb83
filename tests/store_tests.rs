use std::sync::Arc;

use parking_lot::Mutex;
use places::config::Config;
use places::db::{HistoryDB, RemoveSummary, SchemaStatus, MENU_FOLDER_ID, SCHEMA_VERSION};
use places::error::PlacesError;
use places::observer::HistoryObserver;
use places::time::{fixed_clock, now_us, USECS_PER_DAY};

fn test_db() -> HistoryDB {
    HistoryDB::open(":memory:").expect("in-memory db")
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl HistoryObserver for Recorder {
    fn on_begin_update_batch(&self) {
        self.events.lock().push("begin".into());
    }
    fn on_end_update_batch(&self) {
        self.events.lock().push("end".into());
    }
    fn on_title_changed(&self, uri: &str, title: &str) {
        self.events.lock().push(format!("title {uri} {title}"));
    }
    fn on_delete_uri(&self, uri: &str) {
        self.events.lock().push(format!("delete {uri}"));
    }
    fn on_clear_history(&self) {
        self.events.lock().push("clear".into());
    }
    fn on_page_expired(&self, uri: &str, _visit_time: i64, whole_entry: bool) {
        self.events.lock().push(format!("expired {uri} {whole_entry}"));
    }
}

fn user_version(path: &std::path::Path) -> i64 {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap()
}

// --- Schema ---

#[test]
fn fresh_store_is_created_then_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("places.db");
    let p = path.to_str().unwrap();

    let db = HistoryDB::open(p).unwrap();
    assert_eq!(db.schema_status(), SchemaStatus::Created);
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    assert_eq!(db.ensure_current_schema().unwrap(), SchemaStatus::Ok);
    drop(db);

    let db = HistoryDB::open(p).unwrap();
    assert_eq!(db.schema_status(), SchemaStatus::Ok);
    assert!(db.is_visited("http://a.test/").unwrap());
    drop(db);
    assert_eq!(user_version(&path), SCHEMA_VERSION);
}

#[test]
fn v1_store_is_upgraded_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("old.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE places (id INTEGER PRIMARY KEY, url TEXT NOT NULL UNIQUE, title TEXT, \
                 rev_host TEXT, visit_count INTEGER NOT NULL DEFAULT 0, \
                 hidden INTEGER NOT NULL DEFAULT 0, typed INTEGER NOT NULL DEFAULT 0, \
                 favicon_id INTEGER);
             CREATE TABLE visits (id INTEGER PRIMARY KEY, from_visit INTEGER, \
                 place_id INTEGER NOT NULL, visit_date INTEGER NOT NULL, \
                 visit_type INTEGER NOT NULL, session INTEGER NOT NULL DEFAULT 0);
             INSERT INTO places (id, url, title, rev_host, visit_count) \
                 VALUES (1, 'http://old.test/', 'Old', 'tset.dlo.', 5);
             INSERT INTO visits (place_id, visit_date, visit_type, session) VALUES (1, 100, 1, 1);
             INSERT INTO visits (place_id, visit_date, visit_type, session) VALUES (1, 200, 4, 1);
             PRAGMA user_version = 1;",
        )
        .unwrap();
    }

    let db = HistoryDB::open(path.to_str().unwrap()).unwrap();
    assert_eq!(db.schema_status(), SchemaStatus::Upgraded);
    let old = db.get_place("http://old.test/").unwrap().unwrap();
    // recounted without the embed visit
    assert_eq!(old.visit_count, 1);
    assert_eq!(old.last_visit_date, Some(200));
    assert_eq!(old.frecency, -1);

    // triggers and later tables work on the upgraded store
    db.add_uri("http://old.test/", 300, false, true, None).unwrap();
    let old = db.get_place("http://old.test/").unwrap().unwrap();
    assert_eq!(old.visit_count, 2);
    assert_eq!(old.last_visit_date, Some(300));
    db.insert_bookmark(MENU_FOLDER_ID, "http://old.test/", "Old").unwrap();
    assert!(db.is_bookmarked("http://old.test/").unwrap());
    drop(db);
    assert_eq!(user_version(&path), SCHEMA_VERSION);
}

#[test]
fn newer_store_is_opened_as_downgrade() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("new.db");
    let p = path.to_str().unwrap();
    let db = HistoryDB::open(p).unwrap();
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    drop(db);
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 5).unwrap();
    }

    let db = HistoryDB::open(p).unwrap();
    assert_eq!(db.schema_status(), SchemaStatus::Downgraded);
    assert!(db.is_visited("http://a.test/").unwrap());
    drop(db);
    assert_eq!(user_version(&path), SCHEMA_VERSION);
}

#[test]
fn corrupt_file_is_backed_up_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.db");
    std::fs::write(&path, b"this is not an sqlite database".repeat(200)).unwrap();

    let db = HistoryDB::open(path.to_str().unwrap()).unwrap();
    assert_eq!(db.schema_status(), SchemaStatus::Created);
    assert_eq!(db.place_total().unwrap(), 0);
    assert!(dir.path().join("broken.db.corrupt").exists());
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    assert_eq!(db.visit_total().unwrap(), 1);
}

// --- Page operations ---

#[test]
fn titles_are_capped_and_only_reported_on_change() {
    let db = test_db();
    let rec = Arc::new(Recorder::default());
    db.add_observer(rec.clone());
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    rec.take();

    db.set_page_title("http://a.test/", "Hello").unwrap();
    db.set_page_title("http://a.test/", "Hello").unwrap();
    assert_eq!(rec.take(), ["title http://a.test/ Hello"]);

    let long = "x".repeat(5000);
    db.set_page_title("http://a.test/", &long).unwrap();
    assert_eq!(db.get_page_title("http://a.test/").unwrap().unwrap().chars().count(), 4096);
}

#[test]
fn observers_unregister_explicitly() {
    let db = test_db();
    let rec = Arc::new(Recorder::default());
    let id = db.add_observer(rec.clone());
    assert!(db.remove_observer(id));
    assert!(!db.remove_observer(id));
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    db.remove_page("http://a.test/").unwrap();
    assert!(rec.take().is_empty());
}

// --- Removal ---

#[test]
fn removing_a_page_keeps_bookmarked_ones() {
    let db = test_db();
    let rec = Arc::new(Recorder::default());
    db.add_observer(rec.clone());
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    db.add_uri("http://a.test/", 200, false, true, None).unwrap();
    db.add_uri("http://kept.test/", 300, false, true, None).unwrap();
    db.insert_bookmark(MENU_FOLDER_ID, "http://kept.test/", "Kept").unwrap();

    let s = db.remove_page("http://a.test/").unwrap();
    assert_eq!(s, RemoveSummary { visits_removed: 2, places_removed: 1 });
    assert!(db.get_place("http://a.test/").unwrap().is_none());

    let s = db.remove_page("http://kept.test/").unwrap();
    assert_eq!(s, RemoveSummary { visits_removed: 1, places_removed: 0 });
    let kept = db.get_place("http://kept.test/").unwrap().unwrap();
    assert_eq!(kept.visit_count, 0);
    assert!(kept.frecency > 0, "unvisited bookmark still ranks");

    let events: Vec<String> = rec.take().into_iter().filter(|e| e.starts_with("delete")).collect();
    assert_eq!(events, ["delete http://a.test/", "delete http://kept.test/"]);
    assert_eq!(db.remove_page("http://missing.test/").unwrap(), RemoveSummary::default());
}

#[test]
fn host_removal_can_include_subdomains() {
    let db = test_db();
    for u in ["http://example.com/", "http://www.example.com/", "http://other.com/"] {
        db.add_uri(u, 100, false, true, None).unwrap();
    }
    let s = db.remove_pages_from_host("example.com", false).unwrap();
    assert_eq!(s.places_removed, 1);
    assert!(db.is_visited("http://www.example.com/").unwrap());

    let rec = Arc::new(Recorder::default());
    db.add_observer(rec.clone());
    let s = db.remove_pages_from_host("example.com", true).unwrap();
    assert_eq!(s.places_removed, 1);
    assert!(db.is_visited("http://other.com/").unwrap());
    assert_eq!(rec.take(), ["begin", "delete http://www.example.com/", "end"]);
}

#[test]
fn timeframe_removal_takes_whole_pages() {
    let db = test_db();
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    db.add_uri("http://a.test/", 900, false, true, None).unwrap();
    db.add_uri("http://b.test/", 900, false, true, None).unwrap();

    let s = db.remove_pages_by_timeframe(50, 150).unwrap();
    assert_eq!(s, RemoveSummary { visits_removed: 2, places_removed: 1 });
    assert!(db.is_visited("http://b.test/").unwrap());
    assert!(matches!(db.remove_pages_by_timeframe(10, 5), Err(PlacesError::Validation(_))));
}

#[test]
fn visit_timeframe_removal_keeps_pages_visited_elsewhere() {
    let db = test_db();
    let rec = Arc::new(Recorder::default());
    db.add_observer(rec.clone());
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    db.add_uri("http://a.test/", 900, false, true, None).unwrap();
    db.add_uri("http://b.test/", 120, false, true, None).unwrap();
    db.add_uri("http://c.test/", 900, false, true, None).unwrap();
    rec.take();

    let s = db.remove_visits_by_timeframe(50, 150).unwrap();
    assert_eq!(s, RemoveSummary { visits_removed: 2, places_removed: 1 });
    let a = db.get_place("http://a.test/").unwrap().unwrap();
    assert_eq!(a.visit_count, 1);
    assert_eq!(a.last_visit_date, Some(900));
    assert_eq!(a.frecency, -1);
    assert!(db.get_place("http://b.test/").unwrap().is_none());
    assert_eq!(db.get_visits("http://c.test/").unwrap().len(), 1);
    assert_eq!(rec.take(), ["begin", "delete http://b.test/", "end"]);

    assert_eq!(db.remove_visits_by_timeframe(2000, 3000).unwrap(), RemoveSummary::default());
    assert!(matches!(db.remove_visits_by_timeframe(10, 5), Err(PlacesError::Validation(_))));
}

#[test]
fn clear_history_keeps_protected_pages_and_forgets_marks() {
    let db = test_db();
    let rec = Arc::new(Recorder::default());
    db.add_observer(rec.clone());
    db.mark_page_as_typed("http://typed.test/").unwrap();
    db.add_uri("http://typed.test/", 100, false, true, None).unwrap();
    db.add_uri("http://noted.test/", 100, false, true, None).unwrap();
    db.set_page_annotation("http://noted.test/", "note", "x").unwrap();
    db.mark_page_as_typed("http://pending.test/").unwrap();
    rec.take();

    let s = db.remove_all_pages().unwrap();
    assert_eq!(s.visits_removed, 2);
    assert_eq!(s.places_removed, 1);
    assert_eq!(db.visit_total().unwrap(), 0);
    let noted = db.get_place("http://noted.test/").unwrap().unwrap();
    assert!(!noted.typed);
    assert!(noted.frecency >= 0);
    assert_eq!(rec.take(), ["begin", "clear", "end"]);

    // the typed mark went with the caches
    let id = db.add_uri("http://pending.test/", 200, false, true, None).unwrap().unwrap();
    assert_ne!(db.get_visit(id).unwrap().unwrap().transition, places::db::Transition::Typed);
}

// --- Maintenance ---

fn retention_db(now: i64, max_days: u32) -> HistoryDB {
    let mut config = Config::default();
    config.history.expire_days_max = max_days;
    HistoryDB::open_with(":memory:", config, fixed_clock(now)).unwrap()
}

#[test]
fn expiration_drops_old_visits_and_orphaned_pages() {
    let now = now_us();
    let db = retention_db(now, 10);
    let rec = Arc::new(Recorder::default());
    db.add_observer(rec.clone());
    db.add_uri("http://old.test/", now - 20 * USECS_PER_DAY, false, true, None).unwrap();
    db.add_uri("http://mixed.test/", now - 30 * USECS_PER_DAY, false, true, None).unwrap();
    db.add_uri("http://mixed.test/", now - USECS_PER_DAY, false, true, None).unwrap();
    db.add_uri("http://fresh.test/", now, false, true, None).unwrap();
    rec.take();

    let s = db.expire_visits(now).unwrap();
    assert_eq!(s, RemoveSummary { visits_removed: 2, places_removed: 1 });
    assert!(db.get_place("http://old.test/").unwrap().is_none());
    assert_eq!(db.get_visits("http://mixed.test/").unwrap().len(), 1);

    let mut events = rec.take();
    events.sort();
    assert_eq!(
        events,
        ["begin", "end", "expired http://mixed.test/ false", "expired http://old.test/ true"]
    );
}

#[test]
fn site_cap_trims_down_to_minimum_retention() {
    let now = now_us();
    let mut config = Config::default();
    config.history.expire_sites_cap = 2;
    config.history.expire_days_min = 5;
    let db = HistoryDB::open_with(":memory:", config, fixed_clock(now)).unwrap();
    db.add_uri("http://oldest.test/", now - 9 * USECS_PER_DAY, false, true, None).unwrap();
    db.add_uri("http://older.test/", now - 8 * USECS_PER_DAY, false, true, None).unwrap();
    db.add_uri("http://recent1.test/", now - USECS_PER_DAY, false, true, None).unwrap();
    db.add_uri("http://recent2.test/", now, false, true, None).unwrap();

    let s = db.expire_visits(now).unwrap();
    assert_eq!(s.places_removed, 2);
    assert!(db.is_visited("http://recent1.test/").unwrap());
    assert!(db.get_place("http://oldest.test/").unwrap().is_none());
}

#[test]
fn decay_ages_positive_scores_only() {
    let db = test_db();
    db.add_uri("http://a.test/", db.now(), false, true, None).unwrap();
    let before = db.get_place("http://a.test/").unwrap().unwrap().frecency;
    assert!(before > 0);

    let decayed = db.decay_frecency().unwrap();
    assert_eq!(decayed, 1);
    let after = db.get_place("http://a.test/").unwrap().unwrap().frecency;
    assert_eq!(after, (f64::from(before) * 0.975).round() as i32);
}

#[test]
fn idle_maintenance_stamps_its_run() {
    let now = now_us();
    let db = retention_db(now, 180);
    assert_eq!(db.days_since_maintenance(now).unwrap(), None);
    let report = db.run_idle_maintenance(now).unwrap();
    assert_eq!(report.vacuum, Some(places::db::VacuumDecision::FirstRun));
    assert_eq!(db.days_since_maintenance(now + 2 * USECS_PER_DAY).unwrap(), Some(2));
}
