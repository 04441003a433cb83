//! Subscriber list for history change notifications.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::db::Transition;

/// Payload of a recorded visit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitEvent {
    pub uri: String,
    pub visit_id: i64,
    pub time: i64,
    pub session_id: i64,
    pub referring_visit_id: Option<i64>,
    pub transition: Transition,
}

/// Implement the callbacks you care about; the rest are no-ops.
pub trait HistoryObserver: Send + Sync {
    fn on_begin_update_batch(&self) {}
    fn on_end_update_batch(&self) {}
    fn on_visit(&self, _event: &VisitEvent) {}
    fn on_title_changed(&self, _uri: &str, _title: &str) {}
    fn on_delete_uri(&self, _uri: &str) {}
    fn on_clear_history(&self) {}
    fn on_page_expired(&self, _uri: &str, _visit_time: i64, _whole_entry: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub struct Observers {
    list: RwLock<Vec<(ObserverId, Arc<dyn HistoryObserver>)>>,
    next_id: AtomicU64,
    batch_depth: AtomicUsize,
}

impl Observers {
    pub fn add(&self, observer: Arc<dyn HistoryObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.list.write().push((id, observer));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut list = self.list.write();
        let before = list.len();
        list.retain(|(i, _)| *i != id);
        list.len() != before
    }

    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }

    /// Call `f` on every observer. The list is snapshotted first so a
    /// callback may register or unregister without deadlocking.
    pub fn notify(&self, f: impl Fn(&dyn HistoryObserver)) {
        let snapshot: Vec<Arc<dyn HistoryObserver>> =
            self.list.read().iter().map(|(_, o)| Arc::clone(o)).collect();
        for o in snapshot {
            f(o.as_ref());
        }
    }

    /// Only the outermost begin/end pair reaches observers.
    pub fn begin_batch(&self) {
        if self.batch_depth.fetch_add(1, Ordering::SeqCst) == 0 {
            self.notify(|o| o.on_begin_update_batch());
        }
    }

    pub fn end_batch(&self) {
        let prev = self
            .batch_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(1)))
            .unwrap_or(0);
        if prev == 1 {
            self.notify(|o| o.on_end_update_batch());
        }
    }

    pub fn in_batch(&self) -> bool {
        self.batch_depth.load(Ordering::SeqCst) > 0
    }
}

/// Logs every notification at debug level. The daemon registers one.
pub struct TracingObserver;

impl HistoryObserver for TracingObserver {
    fn on_visit(&self, e: &VisitEvent) {
        debug!(uri = %e.uri, visit_id = e.visit_id, session = e.session_id, transition = ?e.transition, "visit");
    }

    fn on_title_changed(&self, uri: &str, title: &str) {
        debug!(uri, title, "title changed");
    }

    fn on_delete_uri(&self, uri: &str) {
        debug!(uri, "uri deleted");
    }

    fn on_clear_history(&self) {
        debug!("history cleared");
    }

    fn on_page_expired(&self, uri: &str, visit_time: i64, whole_entry: bool) {
        debug!(uri, visit_time, whole_entry, "page expired");
    }
}
