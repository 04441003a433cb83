use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use super::places::{delete_orphans, id_list, PROTECTED_PLACE};
use super::RemoveSummary;
use super::{frecency, get_meta, set_meta, HistoryDB};
use crate::error::PlacesError;
use crate::time::USECS_PER_DAY;

const LAST_VACUUM_KEY: &str = "last_vacuum";
const LAST_MAINTENANCE_KEY: &str = "last_maintenance";

/// Never vacuum more often than this.
pub const VACUUM_MIN_INTERVAL_DAYS: i64 = 30;
/// Vacuum regardless of fragmentation once this long has passed.
pub const VACUUM_MAX_INTERVAL_DAYS: i64 = 60;
/// Free pages over total pages that makes a vacuum worthwhile.
pub const VACUUM_FRAGMENTATION_RATIO: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VacuumDecision {
    /// No vacuum on record; start the clock.
    FirstRun,
    TooRecent,
    Overdue,
    Fragmented,
    NotFragmented,
}

impl VacuumDecision {
    pub fn should_vacuum(self) -> bool {
        matches!(self, VacuumDecision::Overdue | VacuumDecision::Fragmented)
    }

    pub fn decide(last_vacuum: Option<i64>, now: i64, free_pages: i64, page_count: i64) -> Self {
        let Some(last) = last_vacuum else {
            return VacuumDecision::FirstRun;
        };
        let days = (now - last) / USECS_PER_DAY;
        if days < VACUUM_MIN_INTERVAL_DAYS {
            VacuumDecision::TooRecent
        } else if days > VACUUM_MAX_INTERVAL_DAYS {
            VacuumDecision::Overdue
        } else if page_count > 0
            && free_pages as f64 / page_count as f64 >= VACUUM_FRAGMENTATION_RATIO
        {
            VacuumDecision::Fragmented
        } else {
            VacuumDecision::NotFragmented
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub decayed: usize,
    pub expired: RemoveSummary,
    pub vacuum: Option<VacuumDecision>,
}

fn page_stats(c: &Connection) -> Result<(i64, i64), PlacesError> {
    let free: i64 = c.query_row("PRAGMA freelist_count", [], |r| r.get(0))?;
    let pages: i64 = c.query_row("PRAGMA page_count", [], |r| r.get(0))?;
    Ok((free, pages))
}

/// Expired visit facts, gathered before deletion for notifications.
struct Expired {
    place_id: i64,
    url: String,
    last_removed: i64,
}

fn collect_expired(c: &Connection, sql: &str, arg: i64) -> Result<Vec<Expired>, PlacesError> {
    let mut stmt = c.prepare(sql)?;
    let rows = stmt
        .query_map([arg], |r| {
            Ok(Expired { place_id: r.get(0)?, url: r.get(1)?, last_removed: r.get(2)? })
        })?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}

impl HistoryDB {
    /// Vacuum if the heuristic says so. The journal is switched to TRUNCATE
    /// for the duration and back to WAL after.
    pub fn vacuum_if_needed(&self, now: i64) -> Result<VacuumDecision, PlacesError> {
        let _guard = self.write_lock.lock();
        let c = self.conn()?;
        let last = get_meta(&c, LAST_VACUUM_KEY)?.and_then(|v| v.parse().ok());
        let (free, pages) = page_stats(&c)?;
        let decision = VacuumDecision::decide(last, now, free, pages);
        match decision {
            VacuumDecision::FirstRun => set_meta(&c, LAST_VACUUM_KEY, &now.to_string())?,
            d if d.should_vacuum() => {
                c.execute_batch("PRAGMA journal_mode=TRUNCATE;")?;
                let result = c.execute_batch("VACUUM;");
                // Restore WAL even when the vacuum failed.
                c.execute_batch("PRAGMA journal_mode=WAL;")?;
                result?;
                set_meta(&c, LAST_VACUUM_KEY, &now.to_string())?;
                info!(free_pages = free, pages, ?decision, "database vacuumed");
            }
            _ => {}
        }
        Ok(decision)
    }

    /// Drop visits older than the retention window. When the store holds
    /// more places than the site cap, the least recently visited pages older
    /// than the minimum retention go too. Orphaned pages are removed.
    pub fn expire_visits(&self, now: i64) -> Result<RemoveSummary, PlacesError> {
        let hist = &self.config().history;
        let max_cutoff = now - i64::from(hist.expire_days_max) * USECS_PER_DAY;
        let min_cutoff = now - i64::from(hist.expire_days_min) * USECS_PER_DAY;
        let cap = i64::from(hist.expire_sites_cap);

        let (summary, expired, removed_urls) = self.write_txn(|c| {
            let mut expired = collect_expired(
                c,
                "SELECT h.id, h.url, MAX(v.visit_date) FROM visits v \
                 JOIN places h ON h.id = v.place_id \
                 WHERE v.visit_date < ?1 GROUP BY h.id",
                max_cutoff,
            )?;
            let mut visits_removed =
                c.execute("DELETE FROM visits WHERE visit_date < ?1", [max_cutoff])?;

            let places: i64 = c.query_row("SELECT COUNT(*) FROM places", [], |r| r.get(0))?;
            if places > cap {
                let excess = places - cap;
                let over_cap = collect_expired(
                    c,
                    &format!(
                        "SELECT h.id, h.url, h.last_visit_date FROM places h \
                         WHERE h.last_visit_date < ?1 AND NOT {PROTECTED_PLACE} \
                         ORDER BY h.last_visit_date ASC LIMIT {excess}"
                    ),
                    min_cutoff,
                )?;
                if !over_cap.is_empty() {
                    let ids: Vec<i64> = over_cap.iter().map(|e| e.place_id).collect();
                    visits_removed += c.execute(
                        &format!("DELETE FROM visits WHERE place_id IN ({})", id_list(&ids)),
                        [],
                    )?;
                }
                for e in over_cap {
                    if !expired.iter().any(|x| x.place_id == e.place_id) {
                        expired.push(e);
                    }
                }
            }

            let ids: Vec<i64> = expired.iter().map(|e| e.place_id).collect();
            let removed_urls = delete_orphans(c, &ids)?;
            // Survivors keep ranking on what is left.
            for e in expired.iter().filter(|e| !removed_urls.contains(&e.url)) {
                frecency::update_frecency(c, e.place_id, &self.config().frecency, now)?;
            }
            let summary = RemoveSummary { visits_removed, places_removed: removed_urls.len() };
            Ok((summary, expired, removed_urls))
        })?;

        if !expired.is_empty() {
            self.observers().begin_batch();
            for e in &expired {
                let whole = removed_urls.contains(&e.url);
                self.observers().notify(|o| o.on_page_expired(&e.url, e.last_removed, whole));
            }
            self.observers().end_batch();
            info!(
                visits = summary.visits_removed,
                places = summary.places_removed,
                "history expired"
            );
        }
        Ok(summary)
    }

    /// The daily pass: decay, expiration, then the vacuum heuristic. Every
    /// step runs even if an earlier one fails; failures are logged and
    /// reported together, to be retried at the next window.
    pub fn run_idle_maintenance(&self, now: i64) -> Result<MaintenanceReport, PlacesError> {
        let mut report = MaintenanceReport::default();
        let mut failures = Vec::new();

        match self.decay_frecency() {
            Ok(n) => report.decayed = n,
            Err(e) => failures.push(format!("decay: {e}")),
        }
        match self.expire_visits(now) {
            Ok(s) => report.expired = s,
            Err(e) => failures.push(format!("expire: {e}")),
        }
        match self.vacuum_if_needed(now) {
            Ok(d) => report.vacuum = Some(d),
            Err(e) => failures.push(format!("vacuum: {e}")),
        }

        if let Err(e) = self.set_meta(LAST_MAINTENANCE_KEY, &now.to_string()) {
            failures.push(format!("stamp: {e}"));
        }
        if failures.is_empty() {
            Ok(report)
        } else {
            let msg = failures.join("; ");
            warn!(error = %msg, "maintenance failed");
            Err(PlacesError::Maintenance(msg))
        }
    }

    /// Days since the last idle maintenance pass, if there was one.
    pub fn days_since_maintenance(&self, now: i64) -> Result<Option<i64>, PlacesError> {
        self.days_since_meta(LAST_MAINTENANCE_KEY, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = USECS_PER_DAY;

    #[test]
    fn vacuum_heuristic() {
        let now = 1_000 * DAY;
        assert_eq!(VacuumDecision::decide(None, now, 50, 100), VacuumDecision::FirstRun);
        assert_eq!(VacuumDecision::decide(Some(now - 10 * DAY), now, 90, 100), VacuumDecision::TooRecent);
        assert_eq!(VacuumDecision::decide(Some(now - 61 * DAY), now, 0, 100), VacuumDecision::Overdue);
        assert_eq!(VacuumDecision::decide(Some(now - 45 * DAY), now, 10, 100), VacuumDecision::Fragmented);
        assert_eq!(VacuumDecision::decide(Some(now - 45 * DAY), now, 9, 100), VacuumDecision::NotFragmented);
        assert!(!VacuumDecision::TooRecent.should_vacuum());
    }
}
