//! Recording visits: turning "this URI was loaded" into visit rows with the
//! right transition, referrer link and session.

use rusqlite::{params, Connection};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::places::{insert_place, last_visit, visit_stats};
use super::{frecency, HistoryDB, Transition};
use crate::error::PlacesError;
use crate::observer::VisitEvent;
use crate::recent::{Consumed, RedirectKind};
use crate::uri;

/// One "a URI was visited" report.
#[derive(Debug, Clone, Deserialize)]
pub struct AddUriRequest {
    pub uri: String,
    /// Microseconds; defaults to now.
    #[serde(default)]
    pub time: Option<i64>,
    /// The URI redirected somewhere else.
    #[serde(default)]
    pub is_redirect: bool,
    #[serde(default = "default_toplevel")]
    pub is_toplevel: bool,
    #[serde(default)]
    pub referrer: Option<String>,
}

fn default_toplevel() -> bool {
    true
}

impl AddUriRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), time: None, is_redirect: false, is_toplevel: true, referrer: None }
    }

    pub fn at(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn redirect(mut self) -> Self {
        self.is_redirect = true;
        self
    }

    pub fn embedded(mut self) -> Self {
        self.is_toplevel = false;
        self
    }

    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }
}

/// A visit as recorded: its id and the session it landed in.
type Recorded = (i64, i64);

/// What a recording leaves to do once its transaction is settled.
#[derive(Default)]
struct Pending {
    /// Sent to observers after commit.
    events: Vec<VisitEvent>,
    /// Put back into the recent-event caches on rollback.
    consumed: Vec<Consumed>,
}

impl HistoryDB {
    pub fn record(&self, req: &AddUriRequest) -> Result<Option<i64>, PlacesError> {
        let time = req.time.unwrap_or_else(|| self.now());
        self.add_uri(&req.uri, time, req.is_redirect, req.is_toplevel, req.referrer.as_deref())
    }

    /// Record a visit to `uri`, resolving any pending redirect chain and the
    /// referrer into their own visits. Everything is written in one
    /// transaction; observers hear about it after commit.
    ///
    /// Returns the id of the visit for `uri`, or `None` when nothing was
    /// recorded (private browsing, or a reload with itself as referrer).
    pub fn add_uri(
        &self,
        uri: &str,
        time: i64,
        is_redirect: bool,
        is_toplevel: bool,
        referrer: Option<&str>,
    ) -> Result<Option<i64>, PlacesError> {
        let Some(url) = self.recordable(uri)? else {
            return Ok(None);
        };
        let referrer = referrer.map(uri::parse).transpose()?;

        let mut pending = Pending::default();
        let recorded = self.write_txn(|c| {
            self.add_visit_chain(c, &url, time, is_toplevel, is_redirect, referrer.as_ref(), &mut pending)
        });
        self.settle(recorded, pending)
    }

    /// Record one visit with a caller-chosen transition. Nothing is
    /// inferred: typed and bookmark marks and pending redirects are left
    /// alone. A referrer without visits gets a link visit of its own, and
    /// `session` of `None` starts a new session.
    pub fn add_visit(
        &self,
        uri: &str,
        time: i64,
        referrer: Option<&str>,
        transition: Transition,
        is_redirect: bool,
        session: Option<i64>,
    ) -> Result<Option<i64>, PlacesError> {
        let Some(url) = self.recordable(uri)? else {
            return Ok(None);
        };
        let referrer = referrer.map(uri::parse).transpose()?;
        let session = session.unwrap_or_else(|| self.new_session_id());

        let mut pending = Pending::default();
        let recorded = self.write_txn(|c| {
            self.insert_visit(c, &url, time, referrer.as_ref(), transition, is_redirect, session, &mut pending)
        });
        self.settle(recorded, pending)
    }

    /// Record that `source` was downloaded. The visit doesn't count towards
    /// `visit_count`, and a page first seen through a download stays hidden.
    pub fn add_download(
        &self,
        source: &str,
        referrer: Option<&str>,
        start_time: i64,
    ) -> Result<Option<i64>, PlacesError> {
        self.add_visit(source, start_time, referrer, Transition::Download, false, None)
    }

    /// Parsed `uri`, or `None` while private browsing is on.
    fn recordable(&self, uri: &str) -> Result<Option<Url>, PlacesError> {
        let url = uri::parse(uri)?;
        if !uri::can_add(&url) {
            return Err(PlacesError::DisallowedScheme(url.scheme().to_string()));
        }
        if self.private_browsing() {
            debug!(uri = %url, "private browsing, visit not recorded");
            return Ok(None);
        }
        Ok(Some(url))
    }

    /// Notify observers after a commit, or put consumed cache entries back
    /// after a rollback.
    fn settle(
        &self,
        recorded: Result<Option<Recorded>, PlacesError>,
        pending: Pending,
    ) -> Result<Option<i64>, PlacesError> {
        match recorded {
            Ok(recorded) => {
                for event in &pending.events {
                    self.observers().notify(|o| o.on_visit(event));
                }
                Ok(recorded.map(|(visit_id, _)| visit_id))
            }
            Err(e) => {
                if !pending.consumed.is_empty() {
                    debug!(entries = pending.consumed.len(), "visit rolled back, restoring recent events");
                    self.recent_events().restore(pending.consumed);
                }
                Err(e)
            }
        }
    }

    /// Work out how `url` was reached and record it, visiting redirect
    /// sources first. Each source is recorded one microsecond before its
    /// target so chains keep their order.
    #[allow(clippy::too_many_arguments)]
    fn add_visit_chain(
        &self,
        c: &Connection,
        url: &Url,
        time: i64,
        is_toplevel: bool,
        is_redirect: bool,
        referrer: Option<&Url>,
        pending: &mut Pending,
    ) -> Result<Option<Recorded>, PlacesError> {
        let spec = url.as_str();
        let recent = self.recent_events();
        let (transition, session, from) = if let Some(redirect) = recent.take_redirect_for(spec) {
            pending
                .consumed
                .push(Consumed::Redirect { dest: spec.to_string(), info: redirect.clone() });
            let source = uri::parse(&redirect.source)?;
            let chained =
                self.add_visit_chain(c, &source, time - 1, is_toplevel, true, referrer, pending)?;
            let session = match chained {
                Some((_, session)) => session,
                None => self.new_session_id(),
            };
            // Redirects inside frames stay out of the visible history.
            let transition = match (is_toplevel, redirect.kind) {
                (false, _) => Transition::Embed,
                (true, RedirectKind::Temporary) => Transition::RedirectTemporary,
                (true, RedirectKind::Permanent) => Transition::RedirectPermanent,
            };
            debug!(uri = spec, source = %source, ?transition, "redirect resolved");
            (transition, session, Some(source))
        } else if let Some(r) = referrer {
            if r.as_str() == spec {
                debug!(uri = spec, "self-referring reload, no visit");
                return Ok(None);
            }
            let transition = if is_toplevel { Transition::Link } else { Transition::Embed };
            let session = match last_visit(c, r.as_str())? {
                Some((_, session)) => session,
                None => self.new_session_id(),
            };
            (transition, session, Some(r.clone()))
        } else {
            let transition = if let Some(mark) = recent.take_typed(spec) {
                pending.consumed.push(mark);
                Transition::Typed
            } else if let Some(mark) = recent.take_bookmarked(spec) {
                pending.consumed.push(mark);
                Transition::Bookmark
            } else if is_toplevel {
                Transition::Link
            } else {
                Transition::Embed
            };
            (transition, self.new_session_id(), None)
        };

        self.insert_visit(c, url, time, from.as_ref(), transition, is_redirect, session, pending)
    }

    /// Create or update the page, then insert the visit row. A referring URL
    /// without any visit gets a link visit of its own just before this one.
    #[allow(clippy::too_many_arguments)]
    fn insert_visit(
        &self,
        c: &Connection,
        url: &Url,
        time: i64,
        referring: Option<&Url>,
        transition: Transition,
        is_redirect: bool,
        session: i64,
        pending: &mut Pending,
    ) -> Result<Option<Recorded>, PlacesError> {
        if !uri::can_add(url) {
            return Ok(None);
        }
        // Embeds, framed links and downloads never make a page visible.
        let background = transition.is_excluded_from_count();

        let (place_id, hidden) = match visit_stats(c, url.as_str())? {
            Some(stats) => {
                // Pages that redirect away stay hidden unless typed.
                let hidden = stats.hidden
                    && !((!is_redirect || transition == Transition::Typed) && !background);
                let typed = stats.typed || transition == Transition::Typed;
                c.execute(
                    "UPDATE places SET hidden = ?1, typed = ?2 WHERE id = ?3",
                    params![hidden as i64, typed as i64, stats.id],
                )?;
                (stats.id, hidden)
            }
            None => {
                let hidden = background || is_redirect;
                let id = insert_place(c, url, hidden, transition == Transition::Typed)?;
                (id, hidden)
            }
        };

        let referring_visit = match referring {
            Some(r) => match last_visit(c, r.as_str())? {
                Some((visit_id, _)) => Some(visit_id),
                None => self
                    .insert_visit(c, r, time - 1, None, Transition::Link, false, session, pending)?
                    .map(|(visit_id, _)| visit_id),
            },
            None => None,
        };

        c.execute(
            "INSERT INTO visits (from_visit, place_id, visit_date, visit_type, session) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![referring_visit, place_id, time, u8::from(transition), session],
        )?;
        let visit_id = c.last_insert_rowid();

        frecency::update_frecency(c, place_id, &self.config().frecency, self.now())?;

        debug!(
            uri = %url,
            visit_id,
            session,
            ?transition,
            from_visit = ?referring_visit,
            "visit recorded"
        );
        if !hidden && !background {
            pending.events.push(VisitEvent {
                uri: url.to_string(),
                visit_id,
                time,
                session_id: session,
                referring_visit_id: referring_visit,
                transition,
            });
        }
        Ok(Some((visit_id, session)))
    }

    /// Note that `source` redirected to `dest`; the next visit to `dest`
    /// records the redirect chain.
    pub fn record_redirect(
        &self,
        source: &str,
        dest: &str,
        is_temporary: bool,
    ) -> Result<(), PlacesError> {
        let source = uri::normalize(source)?;
        let dest = uri::normalize(dest)?;
        self.recent_events().record_redirect(&source, &dest, is_temporary);
        Ok(())
    }
}

#[cfg(test)]
#[path = "visits_tests.rs"]
mod tests;
