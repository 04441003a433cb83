//! Tunables for ranking, retention and the recent-event window.
//!
//! Everything has a default; a JSON file can override any subset and
//! `PLACES_*` environment variables override the file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PlacesError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrecencyConfig {
    /// How many of the most recent visits are sampled.
    #[serde(default = "default_num_visits")]
    pub num_visits: u32,
    #[serde(default = "default_first_bucket_cutoff")]
    pub first_bucket_cutoff_days: i64,
    #[serde(default = "default_second_bucket_cutoff")]
    pub second_bucket_cutoff_days: i64,
    #[serde(default = "default_third_bucket_cutoff")]
    pub third_bucket_cutoff_days: i64,
    #[serde(default = "default_fourth_bucket_cutoff")]
    pub fourth_bucket_cutoff_days: i64,
    #[serde(default = "default_first_bucket_weight")]
    pub first_bucket_weight: i32,
    #[serde(default = "default_second_bucket_weight")]
    pub second_bucket_weight: i32,
    #[serde(default = "default_third_bucket_weight")]
    pub third_bucket_weight: i32,
    #[serde(default = "default_fourth_bucket_weight")]
    pub fourth_bucket_weight: i32,
    #[serde(default = "default_default_bucket_weight")]
    pub default_bucket_weight: i32,
    #[serde(default)]
    pub embed_visit_bonus: i32,
    #[serde(default = "default_link_visit_bonus")]
    pub link_visit_bonus: i32,
    #[serde(default = "default_typed_visit_bonus")]
    pub typed_visit_bonus: i32,
    #[serde(default = "default_bookmark_visit_bonus")]
    pub bookmark_visit_bonus: i32,
    #[serde(default)]
    pub download_visit_bonus: i32,
    #[serde(default)]
    pub perm_redirect_visit_bonus: i32,
    #[serde(default)]
    pub temp_redirect_visit_bonus: i32,
    #[serde(default)]
    pub default_visit_bonus: i32,
    #[serde(default = "default_unvisited_bookmark_bonus")]
    pub unvisited_bookmark_bonus: i32,
    #[serde(default = "default_unvisited_typed_bonus")]
    pub unvisited_typed_bonus: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    /// Visits younger than this are never expired to satisfy the site cap.
    #[serde(default)]
    pub expire_days_min: u32,
    /// Visits older than this are always expired.
    #[serde(default = "default_expire_days_max")]
    pub expire_days_max: u32,
    /// Above this many places, expiration also trims down to `expire_days_min`.
    #[serde(default = "default_expire_sites_cap")]
    pub expire_sites_cap: u32,
    /// Share of the memory budget given to the SQLite page cache, 0..=50.
    #[serde(default = "default_db_cache_percentage")]
    pub db_cache_percentage: u32,
    #[serde(default = "default_recent_event_threshold_secs")]
    pub recent_event_threshold_secs: u64,
    #[serde(default = "default_recent_event_max_len")]
    pub recent_event_max_len: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub frecency: FrecencyConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl Default for FrecencyConfig {
    fn default() -> Self {
        Self {
            num_visits: default_num_visits(),
            first_bucket_cutoff_days: default_first_bucket_cutoff(),
            second_bucket_cutoff_days: default_second_bucket_cutoff(),
            third_bucket_cutoff_days: default_third_bucket_cutoff(),
            fourth_bucket_cutoff_days: default_fourth_bucket_cutoff(),
            first_bucket_weight: default_first_bucket_weight(),
            second_bucket_weight: default_second_bucket_weight(),
            third_bucket_weight: default_third_bucket_weight(),
            fourth_bucket_weight: default_fourth_bucket_weight(),
            default_bucket_weight: default_default_bucket_weight(),
            embed_visit_bonus: 0,
            link_visit_bonus: default_link_visit_bonus(),
            typed_visit_bonus: default_typed_visit_bonus(),
            bookmark_visit_bonus: default_bookmark_visit_bonus(),
            download_visit_bonus: 0,
            perm_redirect_visit_bonus: 0,
            temp_redirect_visit_bonus: 0,
            default_visit_bonus: 0,
            unvisited_bookmark_bonus: default_unvisited_bookmark_bonus(),
            unvisited_typed_bonus: default_unvisited_typed_bonus(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            expire_days_min: 0,
            expire_days_max: default_expire_days_max(),
            expire_sites_cap: default_expire_sites_cap(),
            db_cache_percentage: default_db_cache_percentage(),
            recent_event_threshold_secs: default_recent_event_threshold_secs(),
            recent_event_max_len: default_recent_event_max_len(),
        }
    }
}

impl FrecencyConfig {
    /// Weight of the age bucket a visit `age_days` old falls into.
    pub fn bucket_weight(&self, age_days: i64) -> i32 {
        if age_days <= self.first_bucket_cutoff_days {
            self.first_bucket_weight
        } else if age_days <= self.second_bucket_cutoff_days {
            self.second_bucket_weight
        } else if age_days <= self.third_bucket_cutoff_days {
            self.third_bucket_weight
        } else if age_days <= self.fourth_bucket_cutoff_days {
            self.fourth_bucket_weight
        } else {
            self.default_bucket_weight
        }
    }
}

impl HistoryConfig {
    pub fn cache_percentage(&self) -> u32 {
        self.db_cache_percentage.min(50)
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PlacesError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PlacesError::Validation(format!("config {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| PlacesError::Validation(format!("config {}: {e}", path.display())))
    }

    /// Apply `PLACES_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|k| std::env::var(k).ok());
        self
    }

    fn apply_vars(&mut self, get: impl Fn(&str) -> Option<String>) {
        fn set<T: std::str::FromStr>(slot: &mut T, v: Option<String>) {
            if let Some(parsed) = v.and_then(|s| s.trim().parse().ok()) {
                *slot = parsed;
            }
        }
        let f = &mut self.frecency;
        set(&mut f.num_visits, get("PLACES_FRECENCY_NUM_VISITS"));
        set(&mut f.first_bucket_cutoff_days, get("PLACES_FRECENCY_FIRST_BUCKET_CUTOFF"));
        set(&mut f.second_bucket_cutoff_days, get("PLACES_FRECENCY_SECOND_BUCKET_CUTOFF"));
        set(&mut f.third_bucket_cutoff_days, get("PLACES_FRECENCY_THIRD_BUCKET_CUTOFF"));
        set(&mut f.fourth_bucket_cutoff_days, get("PLACES_FRECENCY_FOURTH_BUCKET_CUTOFF"));
        set(&mut f.first_bucket_weight, get("PLACES_FRECENCY_FIRST_BUCKET_WEIGHT"));
        set(&mut f.second_bucket_weight, get("PLACES_FRECENCY_SECOND_BUCKET_WEIGHT"));
        set(&mut f.third_bucket_weight, get("PLACES_FRECENCY_THIRD_BUCKET_WEIGHT"));
        set(&mut f.fourth_bucket_weight, get("PLACES_FRECENCY_FOURTH_BUCKET_WEIGHT"));
        set(&mut f.default_bucket_weight, get("PLACES_FRECENCY_DEFAULT_BUCKET_WEIGHT"));
        set(&mut f.embed_visit_bonus, get("PLACES_FRECENCY_EMBED_BONUS"));
        set(&mut f.link_visit_bonus, get("PLACES_FRECENCY_LINK_BONUS"));
        set(&mut f.typed_visit_bonus, get("PLACES_FRECENCY_TYPED_BONUS"));
        set(&mut f.bookmark_visit_bonus, get("PLACES_FRECENCY_BOOKMARK_BONUS"));
        set(&mut f.download_visit_bonus, get("PLACES_FRECENCY_DOWNLOAD_BONUS"));
        set(&mut f.perm_redirect_visit_bonus, get("PLACES_FRECENCY_PERM_REDIRECT_BONUS"));
        set(&mut f.temp_redirect_visit_bonus, get("PLACES_FRECENCY_TEMP_REDIRECT_BONUS"));
        set(&mut f.default_visit_bonus, get("PLACES_FRECENCY_DEFAULT_BONUS"));
        set(&mut f.unvisited_bookmark_bonus, get("PLACES_FRECENCY_UNVISITED_BOOKMARK_BONUS"));
        set(&mut f.unvisited_typed_bonus, get("PLACES_FRECENCY_UNVISITED_TYPED_BONUS"));

        let h = &mut self.history;
        set(&mut h.expire_days_min, get("PLACES_EXPIRE_DAYS_MIN"));
        set(&mut h.expire_days_max, get("PLACES_EXPIRE_DAYS_MAX"));
        set(&mut h.expire_sites_cap, get("PLACES_EXPIRE_SITES_CAP"));
        set(&mut h.db_cache_percentage, get("PLACES_DB_CACHE_PERCENTAGE"));
        set(&mut h.recent_event_threshold_secs, get("PLACES_RECENT_EVENT_SECS"));
        set(&mut h.recent_event_max_len, get("PLACES_RECENT_EVENT_MAX_LEN"));
    }
}

fn default_num_visits() -> u32 {
    10
}

fn default_first_bucket_cutoff() -> i64 {
    4
}

fn default_second_bucket_cutoff() -> i64 {
    14
}

fn default_third_bucket_cutoff() -> i64 {
    31
}

fn default_fourth_bucket_cutoff() -> i64 {
    90
}

fn default_first_bucket_weight() -> i32 {
    100
}

fn default_second_bucket_weight() -> i32 {
    70
}

fn default_third_bucket_weight() -> i32 {
    50
}

fn default_fourth_bucket_weight() -> i32 {
    30
}

fn default_default_bucket_weight() -> i32 {
    10
}

fn default_link_visit_bonus() -> i32 {
    100
}

fn default_typed_visit_bonus() -> i32 {
    2000
}

fn default_bookmark_visit_bonus() -> i32 {
    75
}

fn default_unvisited_bookmark_bonus() -> i32 {
    140
}

fn default_unvisited_typed_bonus() -> i32 {
    200
}

fn default_expire_days_max() -> u32 {
    180
}

fn default_expire_sites_cap() -> u32 {
    40_000
}

fn default_db_cache_percentage() -> u32 {
    6
}

fn default_recent_event_threshold_secs() -> u64 {
    15 * 60
}

fn default_recent_event_max_len() -> usize {
    128
}
