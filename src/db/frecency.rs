//! Frecency: a blend of how often and how recently a page was visited, with
//! bonuses for how the user got there.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{HistoryDB, Transition};
use crate::config::FrecencyConfig;
use crate::error::PlacesError;
use crate::time::{age_in_days, start_of_local_day};

/// Multiplier applied to every positive frecency by the periodic decay.
pub const DECAY_RATE: f64 = 0.975;

/// Adaptive input rows whose use count falls below this are dropped.
const MIN_INPUT_USE_COUNT: f64 = 0.01;

/// One sampled visit. `transition` is the type that earns the bonus: for a
/// redirect it is the type of the visit that led into it. `None` covers
/// legacy rows with no recorded type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampledVisit {
    pub transition: Option<Transition>,
    pub visit_date: i64,
}

/// Everything the score depends on, gathered up front so the arithmetic can
/// be exercised without a database.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrecencyInputs {
    /// Most recent visits first, at most `num_visits` of them.
    pub sampled: Vec<SampledVisit>,
    /// Every visit row the place has.
    pub full_visit_count: i64,
    /// The place's `visit_count` column.
    pub visit_count: i64,
    pub typed: bool,
    pub bookmarked: bool,
}

fn transition_bonus(cfg: &FrecencyConfig, t: Option<Transition>) -> i32 {
    match t {
        Some(Transition::Link) => cfg.link_visit_bonus,
        Some(Transition::Typed) => cfg.typed_visit_bonus,
        Some(Transition::Bookmark) => cfg.bookmark_visit_bonus,
        Some(Transition::Embed) => cfg.embed_visit_bonus,
        Some(Transition::Download) => cfg.download_visit_bonus,
        Some(Transition::RedirectPermanent) => cfg.perm_redirect_visit_bonus,
        Some(Transition::RedirectTemporary) => cfg.temp_redirect_visit_bonus,
        Some(Transition::FramedLink) | None => cfg.default_visit_bonus,
    }
}

/// Score a place from its inputs.
///
/// Visits that earn no points at all leave the place at `-visit_count`: still
/// ordered among themselves, but below anything with real relevance.
pub fn score_visits(cfg: &FrecencyConfig, inputs: &FrecencyInputs, now: i64) -> i32 {
    let normalized_now = start_of_local_day(now);
    let mut points = 0.0f64;

    for visit in &inputs.sampled {
        let mut bonus = transition_bonus(cfg, visit.transition);
        if inputs.bookmarked {
            bonus += cfg.bookmark_visit_bonus;
        }
        if bonus != 0 {
            let weight = cfg.bucket_weight(age_in_days(normalized_now, visit.visit_date));
            points += f64::from(weight) * (f64::from(bonus) / 100.0);
        }
    }

    let sampled = inputs.sampled.len() as f64;
    if sampled > 0.0 {
        if points == 0.0 {
            return clamp(-(inputs.visit_count as f64));
        }
        return clamp((inputs.full_visit_count as f64 * points.ceil() / sampled).ceil());
    }

    // Never visited: a bookmark or a typed-but-unvisited entry still ranks.
    let mut bonus = 0;
    if inputs.bookmarked {
        bonus += cfg.unvisited_bookmark_bonus;
    }
    if inputs.typed {
        bonus += cfg.unvisited_typed_bonus;
    }
    let points = f64::from(cfg.first_bucket_weight) * (f64::from(bonus) / 100.0);
    let mut count = inputs.visit_count;
    if count == 0 && inputs.bookmarked {
        count = 1;
    }
    clamp((count as f64 * points.ceil()).ceil())
}

fn clamp(v: f64) -> i32 {
    v.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

fn is_bookmarked(c: &Connection, place_id: i64) -> Result<bool, PlacesError> {
    Ok(c
        .query_row(
            "SELECT 1 FROM bookmarks WHERE fk = ?1 AND type = 1 LIMIT 1",
            [place_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(crate) fn gather_inputs(
    c: &Connection,
    place_id: i64,
    typed: bool,
    visit_count: i64,
    bookmarked: bool,
    cfg: &FrecencyConfig,
) -> Result<FrecencyInputs, PlacesError> {
    // Redirect visits take the type of the visit they came from.
    let mut stmt = c.prepare_cached(
        "SELECT v.visit_date, \
             COALESCE((SELECT r.visit_type FROM visits r \
                       WHERE v.visit_type IN (5, 6) AND r.id = v.from_visit), v.visit_type) \
         FROM visits v WHERE v.place_id = ?1 \
         ORDER BY v.visit_date DESC, v.id DESC LIMIT ?2",
    )?;
    let sampled = stmt
        .query_map(params![place_id, cfg.num_visits], |r| {
            let code: i64 = r.get(1)?;
            Ok(SampledVisit {
                visit_date: r.get(0)?,
                transition: u8::try_from(code).ok().and_then(|c| Transition::try_from(c).ok()),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let full_visit_count = if sampled.is_empty() {
        0
    } else {
        c.query_row(
            "SELECT COUNT(*) FROM visits WHERE place_id = ?1",
            [place_id],
            |r| r.get(0),
        )?
    };
    Ok(FrecencyInputs { sampled, full_visit_count, visit_count, typed, bookmarked })
}

pub(crate) fn calculate(
    c: &Connection,
    place_id: i64,
    typed: bool,
    visit_count: i64,
    bookmarked: bool,
    cfg: &FrecencyConfig,
    now: i64,
) -> Result<i32, PlacesError> {
    let inputs = gather_inputs(c, place_id, typed, visit_count, bookmarked, cfg)?;
    Ok(score_visits(cfg, &inputs, now))
}

/// Recompute and store a place's frecency. Returns the new value when the
/// stored one changed.
///
/// A known frecency is never replaced by a negative one, and a page that
/// earns a non-zero score is unhidden.
pub(crate) fn update_frecency(
    c: &Connection,
    place_id: i64,
    cfg: &FrecencyConfig,
    now: i64,
) -> Result<Option<i32>, PlacesError> {
    let Some((old, typed, visit_count)) = c
        .query_row(
            "SELECT frecency, typed, visit_count FROM places WHERE id = ?1",
            [place_id],
            |r| Ok((r.get::<_, i32>(0)?, r.get::<_, i64>(1)? != 0, r.get::<_, i64>(2)?)),
        )
        .optional()?
    else {
        return Err(PlacesError::NotFound);
    };
    let bookmarked = is_bookmarked(c, place_id)?;
    let new = calculate(c, place_id, typed, visit_count, bookmarked, cfg, now)?;
    if new == old || (old != 0 && new < 0) {
        return Ok(None);
    }
    c.execute(
        "UPDATE places SET frecency = ?1, hidden = CASE WHEN ?1 <> 0 THEN 0 ELSE hidden END \
         WHERE id = ?2",
        params![new, place_id],
    )?;
    Ok(Some(new))
}

/// Recompute every place whose frecency is the invalid sentinel.
pub(crate) fn fix_invalid(
    c: &Connection,
    cfg: &FrecencyConfig,
    now: i64,
) -> Result<usize, PlacesError> {
    let ids: Vec<i64> = c
        .prepare("SELECT id FROM places WHERE frecency < 0")?
        .query_map([], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    let mut fixed = 0;
    for id in ids {
        if update_frecency(c, id, cfg, now)?.is_some() {
            fixed += 1;
        }
    }
    Ok(fixed)
}

impl HistoryDB {
    /// Compute a place's frecency without storing it.
    pub fn calculate_frecency(
        &self,
        place_id: i64,
        typed: bool,
        visit_count: i64,
        bookmarked: bool,
    ) -> Result<i32, PlacesError> {
        let now = self.now();
        self.read(|c| calculate(c, place_id, typed, visit_count, bookmarked, &self.config().frecency, now))
    }

    /// Recompute and persist one place's frecency, returning the stored value.
    pub fn update_frecency(&self, place_id: i64) -> Result<i32, PlacesError> {
        let now = self.now();
        self.write_txn(|c| {
            update_frecency(c, place_id, &self.config().frecency, now)?;
            Ok(c.query_row("SELECT frecency FROM places WHERE id = ?1", [place_id], |r| r.get(0))?)
        })
    }

    /// Recompute every place left with an invalid (negative) frecency.
    pub fn fix_invalid_frecencies(&self) -> Result<usize, PlacesError> {
        let now = self.now();
        let fixed = self.write_txn(|c| fix_invalid(c, &self.config().frecency, now))?;
        if fixed > 0 {
            info!(places = fixed, "invalid frecencies recomputed");
        }
        Ok(fixed)
    }

    /// Age every positive frecency and every adaptive input counter.
    pub fn decay_frecency(&self) -> Result<usize, PlacesError> {
        let now = self.now();
        let decayed = self.write_txn(|c| {
            fix_invalid(c, &self.config().frecency, now)?;
            let n = c.execute(
                "UPDATE places SET frecency = ROUND(frecency * ?1) WHERE frecency > 0",
                [DECAY_RATE],
            )?;
            c.execute("UPDATE input_history SET use_count = use_count * ?1", [DECAY_RATE])?;
            c.execute(
                "DELETE FROM input_history WHERE use_count < ?1",
                [MIN_INPUT_USE_COUNT],
            )?;
            Ok(n)
        })?;
        info!(places = decayed, "frecency decayed");
        Ok(decayed)
    }
}

#[cfg(test)]
#[path = "frecency_tests.rs"]
mod tests;
