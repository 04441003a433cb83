//! Short-lived facts about URLs: "the user just typed this", "this came from
//! a bookmark", "this was reached via a redirect from that". They are used to
//! classify the next visit to the URL and are consumed on lookup.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::HistoryConfig;
use crate::time::{Clock, USECS_PER_SEC};

/// Hard ceiling relative to the sweep length. Only reached when every entry
/// is still fresh, and then the least recently inserted ones go first.
const CAPACITY_FACTOR: usize = 16;

struct Stamped<V> {
    at: i64,
    value: V,
}

/// A string-keyed cache whose entries count only within `window_us` of their
/// insertion. Stale entries are filtered on lookup and swept in bulk once the
/// map grows past `sweep_len`.
pub struct TimedCache<V> {
    entries: Mutex<LruCache<String, Stamped<V>>>,
    window_us: i64,
    sweep_len: usize,
}

impl<V> TimedCache<V> {
    pub fn new(window_us: i64, sweep_len: usize) -> Self {
        let cap = NonZeroUsize::new(sweep_len.saturating_mul(CAPACITY_FACTOR))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            window_us,
            sweep_len,
        }
    }

    /// Insert or replace `key`, stamping it with `now`.
    pub fn insert(&self, key: impl Into<String>, value: V, now: i64) {
        let mut entries = self.entries.lock();
        entries.put(key.into(), Stamped { at: now, value });
        if entries.len() > self.sweep_len {
            Self::sweep(&mut entries, now - self.window_us);
        }
    }

    /// Remove `key` and return its value if it is still within the window.
    pub fn take(&self, key: &str, now: i64) -> Option<V> {
        self.take_stamped(key, now).map(|(_, value)| value)
    }

    /// Like [`take`](Self::take), also returning when the entry was inserted.
    pub fn take_stamped(&self, key: &str, now: i64) -> Option<(i64, V)> {
        let entry = self.entries.lock().pop(key)?;
        (now - entry.at < self.window_us).then_some((entry.at, entry.value))
    }

    /// Drop every entry older than the window. Returns how many were removed.
    pub fn expire(&self, now: i64) -> usize {
        Self::sweep(&mut self.entries.lock(), now - self.window_us)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn sweep(entries: &mut LruCache<String, Stamped<V>>, cutoff: i64) -> usize {
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.at < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for k in &stale {
            entries.pop(k);
        }
        stale.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectKind {
    Permanent,
    Temporary,
}

/// Where a redirected URL came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectInfo {
    pub source: String,
    pub created_at: i64,
    pub kind: RedirectKind,
}

/// An entry taken out of one of the caches. Kept by the recorder so it can
/// be put back when the visit it classified is rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumed {
    Typed { url: String, at: i64 },
    Bookmarked { url: String, at: i64 },
    Redirect { dest: String, info: RedirectInfo },
}

/// The three recent-event caches, sharing one window and clock.
pub struct RecentEvents {
    typed: TimedCache<()>,
    bookmarked: TimedCache<()>,
    redirects: TimedCache<RedirectInfo>,
    clock: Clock,
}

impl RecentEvents {
    pub fn new(cfg: &HistoryConfig, clock: Clock) -> Self {
        let window = cfg.recent_event_threshold_secs as i64 * USECS_PER_SEC;
        let sweep = cfg.recent_event_max_len;
        Self {
            typed: TimedCache::new(window, sweep),
            bookmarked: TimedCache::new(window, sweep),
            redirects: TimedCache::new(window, sweep),
            clock,
        }
    }

    pub fn mark_typed(&self, url: &str) {
        self.typed.insert(url, (), (self.clock)());
    }

    pub fn mark_bookmarked(&self, url: &str) {
        self.bookmarked.insert(url, (), (self.clock)());
    }

    /// Consumes the entry: a typed mark classifies one visit only.
    pub fn was_recently_typed(&self, url: &str) -> bool {
        self.take_typed(url).is_some()
    }

    pub fn was_recently_bookmarked(&self, url: &str) -> bool {
        self.take_bookmarked(url).is_some()
    }

    pub fn take_typed(&self, url: &str) -> Option<Consumed> {
        let (at, ()) = self.typed.take_stamped(url, (self.clock)())?;
        Some(Consumed::Typed { url: url.to_string(), at })
    }

    pub fn take_bookmarked(&self, url: &str) -> Option<Consumed> {
        let (at, ()) = self.bookmarked.take_stamped(url, (self.clock)())?;
        Some(Consumed::Bookmarked { url: url.to_string(), at })
    }

    /// Remember that `dest` was reached by redirecting from `source`. A later
    /// redirect to the same destination replaces the earlier one.
    pub fn record_redirect(&self, source: &str, dest: &str, is_temporary: bool) {
        let now = (self.clock)();
        let kind = if is_temporary { RedirectKind::Temporary } else { RedirectKind::Permanent };
        self.redirects.insert(
            dest,
            RedirectInfo { source: source.to_string(), created_at: now, kind },
            now,
        );
    }

    pub fn take_redirect_for(&self, dest: &str) -> Option<RedirectInfo> {
        self.redirects.take(dest, (self.clock)())
    }

    /// Put taken entries back with their original stamps.
    pub fn restore(&self, consumed: impl IntoIterator<Item = Consumed>) {
        for entry in consumed {
            match entry {
                Consumed::Typed { url, at } => self.typed.insert(url, (), at),
                Consumed::Bookmarked { url, at } => self.bookmarked.insert(url, (), at),
                Consumed::Redirect { dest, info } => {
                    let at = info.created_at;
                    self.redirects.insert(dest, info, at);
                }
            }
        }
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn clear(&self) {
        self.typed.clear();
        self.bookmarked.clear();
        self.redirects.clear();
    }
}
