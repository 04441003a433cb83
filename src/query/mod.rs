//! Declarative history queries: a predicate (`Query`) plus result shaping
//! (`QueryOptions`). Several queries OR together under one set of options.

mod compile;
mod sql;
mod uri;

pub(crate) use compile::{child_sort, col};
pub use compile::{compile, day_buckets, CompilePath, CompiledQuery, DayBucket, Plan};
pub use sql::{Expr, Param, Piece, Rendered, SqlValue};
pub use uri::{parse_query_uri, to_query_uri};

use serde::{Deserialize, Serialize};

use crate::error::PlacesError;
use crate::time::TimeRef;

macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(try_from = "u16", into = "u16")]
        pub enum $name {
            #[default]
            $($variant = $code),+
        }

        impl TryFrom<u16> for $name {
            type Error = PlacesError;

            fn try_from(v: u16) -> Result<Self, Self::Error> {
                match v {
                    $($code => Ok($name::$variant),)+
                    _ => Err(PlacesError::QueryParse(format!(
                        concat!("invalid ", stringify!($name), " {}"),
                        v
                    ))),
                }
            }
        }

        impl From<$name> for u16 {
            fn from(v: $name) -> u16 {
                v as u16
            }
        }
    };
}

coded_enum!(
    /// Result ordering. Codes are part of the `place:` string format.
    SortMode {
        None = 0,
        TitleAsc = 1,
        TitleDesc = 2,
        DateAsc = 3,
        DateDesc = 4,
        UriAsc = 5,
        UriDesc = 6,
        VisitCountAsc = 7,
        VisitCountDesc = 8,
        DateAddedAsc = 11,
        DateAddedDesc = 12,
        LastModifiedAsc = 13,
        LastModifiedDesc = 14,
        TagsAsc = 17,
        TagsDesc = 18,
    }
);

coded_enum!(
    /// Shape of each result row.
    ResultType {
        Uri = 0,
        Visit = 1,
        FullVisit = 2,
        DateQuery = 3,
        SiteQuery = 4,
        TagQuery = 6,
        TagContents = 7,
    }
);

coded_enum!(
    QueryType {
        History = 0,
        Bookmarks = 1,
    }
);

coded_enum!(
    /// Which side of a redirect is listed.
    RedirectsMode {
        All = 0,
        Source = 1,
        Target = 2,
    }
);

impl SortMode {
    pub fn is_descending(self) -> bool {
        matches!(
            self,
            SortMode::TitleDesc
                | SortMode::DateDesc
                | SortMode::UriDesc
                | SortMode::VisitCountDesc
                | SortMode::DateAddedDesc
                | SortMode::LastModifiedDesc
                | SortMode::TagsDesc
        )
    }
}

impl ResultType {
    /// Grouping results produce containers, not pages.
    pub fn is_container_query(self) -> bool {
        matches!(self, ResultType::DateQuery | ResultType::SiteQuery | ResultType::TagQuery)
    }
}

/// One predicate. Unset constraints match everything; set ones AND together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub begin_time: i64,
    pub begin_time_ref: TimeRef,
    pub end_time: i64,
    pub end_time_ref: TimeRef,
    /// Whitespace separated; every term must match title, URL or tags.
    pub search_terms: String,
    /// -1 leaves the bound unset.
    pub min_visits: i32,
    pub max_visits: i32,
    pub only_bookmarked: bool,
    /// `Some("")` selects local files.
    pub domain: Option<String>,
    pub domain_is_host: bool,
    pub uri: Option<String>,
    pub uri_is_prefix: bool,
    pub annotation: Option<String>,
    pub annotation_is_not: bool,
    pub tags: Vec<String>,
    pub tags_are_not: bool,
    pub folders: Vec<i64>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            begin_time: 0,
            begin_time_ref: TimeRef::Epoch,
            end_time: 0,
            end_time_ref: TimeRef::Epoch,
            search_terms: String::new(),
            min_visits: -1,
            max_visits: -1,
            only_bookmarked: false,
            domain: None,
            domain_is_host: false,
            uri: None,
            uri_is_prefix: false,
            annotation: None,
            annotation_is_not: false,
            tags: Vec::new(),
            tags_are_not: false,
            folders: Vec::new(),
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_begin_time(&self) -> bool {
        self.begin_time != 0 || self.begin_time_ref != TimeRef::Epoch
    }

    pub fn has_end_time(&self) -> bool {
        self.end_time != 0 || self.end_time_ref != TimeRef::Epoch
    }

    pub fn has_search_terms(&self) -> bool {
        !self.search_terms.trim().is_empty()
    }

    pub fn search_term_list(&self) -> Vec<String> {
        self.search_terms.split_whitespace().map(str::to_lowercase).collect()
    }

    pub fn begin(mut self, time: i64, reference: TimeRef) -> Self {
        self.begin_time = time;
        self.begin_time_ref = reference;
        self
    }

    pub fn end(mut self, time: i64, reference: TimeRef) -> Self {
        self.end_time = time;
        self.end_time_ref = reference;
        self
    }

    /// Absolute time range, both ends inclusive.
    pub fn between(self, begin: i64, end: i64) -> Self {
        self.begin(begin, TimeRef::Epoch).end(end, TimeRef::Epoch)
    }

    pub fn terms(mut self, terms: impl Into<String>) -> Self {
        self.search_terms = terms.into();
        self
    }

    pub fn visits(mut self, min: i32, max: i32) -> Self {
        self.min_visits = min;
        self.max_visits = max;
        self
    }

    pub fn only_bookmarked(mut self) -> Self {
        self.only_bookmarked = true;
        self
    }

    /// Exact host when `is_host`, otherwise the host and all its subdomains.
    pub fn domain(mut self, domain: impl Into<String>, is_host: bool) -> Self {
        self.domain = Some(domain.into());
        self.domain_is_host = is_host;
        self
    }

    pub fn uri(mut self, uri: impl Into<String>, is_prefix: bool) -> Self {
        self.uri = Some(uri.into());
        self.uri_is_prefix = is_prefix;
        self
    }

    pub fn annotation(mut self, name: impl Into<String>, is_not: bool) -> Self {
        self.annotation = Some(name.into());
        self.annotation_is_not = is_not;
        self
    }

    pub fn tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>, are_not: bool) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self.tags_are_not = are_not;
        self
    }

    pub fn folder(mut self, folder: i64) -> Self {
        self.folders.push(folder);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub sort: SortMode,
    pub result_type: ResultType,
    pub query_type: QueryType,
    /// 0 means no cap.
    pub max_results: u32,
    pub include_hidden: bool,
    pub redirects_mode: RedirectsMode,
    /// Only plain bookmarks; no folders, separators or queries.
    pub exclude_items: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            sort: SortMode::None,
            result_type: ResultType::Uri,
            query_type: QueryType::History,
            max_results: 0,
            include_hidden: false,
            redirects_mode: RedirectsMode::All,
            exclude_items: false,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: SortMode) -> Self {
        self.sort = sort;
        self
    }

    pub fn result_type(mut self, t: ResultType) -> Self {
        self.result_type = t;
        self
    }

    pub fn query_type(mut self, t: QueryType) -> Self {
        self.query_type = t;
        self
    }

    pub fn max_results(mut self, n: u32) -> Self {
        self.max_results = n;
        self
    }

    pub fn include_hidden(mut self) -> Self {
        self.include_hidden = true;
        self
    }

    pub fn redirects(mut self, mode: RedirectsMode) -> Self {
        self.redirects_mode = mode;
        self
    }

    pub fn exclude_items(mut self) -> Self {
        self.exclude_items = true;
        self
    }
}

/// The single folder a query set lists, when that's all it does. Such
/// queries are answered by enumerating the folder instead of compiling SQL.
pub fn simple_folder(queries: &[Query], options: &QueryOptions) -> Option<i64> {
    let [q] = queries else { return None };
    let [folder] = q.folders.as_slice() else { return None };
    if options.max_results > 0 || options.result_type != ResultType::Uri {
        return None;
    }
    let unconstrained = !q.has_begin_time()
        && !q.has_end_time()
        && !q.has_search_terms()
        && q.min_visits < 0
        && q.max_visits < 0
        && !q.only_bookmarked
        && q.domain.is_none()
        && q.uri.is_none()
        && q.annotation.is_none()
        && q.tags.is_empty();
    unconstrained.then_some(*folder)
}
