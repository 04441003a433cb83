//! Turning a query set into a plan: a bare folder listing, the narrow
//! recent/most-visited statement, or the general predicate compiler with a
//! result-type specific SELECT.

use tracing::debug;

use super::sql::{Expr, Param, Piece, Rendered};
use super::{simple_folder, Query, QueryOptions, QueryType, RedirectsMode, ResultType, SortMode};
use crate::collation::TITLE_COLLATION;
use crate::config::HistoryConfig;
use crate::db::TAGS_FOLDER_ID;
use crate::error::PlacesError;
use crate::time::{local_day_offset, local_month_label, normalize_time, start_of_local_day, start_of_local_month};
use crate::uri::{self, reverse_host};

/// Previous months listed on their own before "Older than 6 months".
const MAX_MONTH_BUCKETS: u32 = 6;

/// Every row-producing SELECT yields these columns, in this order.
pub(crate) mod col {
    pub const PLACE_ID: usize = 0;
    pub const URL: usize = 1;
    pub const TITLE: usize = 2;
    pub const REV_HOST: usize = 3;
    pub const VISIT_COUNT: usize = 4;
    pub const TIME: usize = 5;
    pub const FAVICON: usize = 6;
    pub const SESSION: usize = 7;
    pub const ITEM_ID: usize = 8;
    pub const DATE_ADDED: usize = 9;
    pub const LAST_MODIFIED: usize = 10;
    pub const PARENT: usize = 11;
    pub const TAGS: usize = 12;
    pub const VISIT_ID: usize = 13;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilePath {
    Optimized,
    FolderShortcut,
    General,
}

/// One day-grouping container and the window that decides whether it shows.
#[derive(Debug, Clone, PartialEq)]
pub struct DayBucket {
    pub title: String,
    /// Container range, carried into the child query.
    pub begin: i64,
    pub end: i64,
    pub search_begin: i64,
    pub search_end: i64,
    /// Child `place:` query listing the bucket's pages.
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// List a bookmark folder's children by position.
    Folder { folder: i64 },
    /// One statement whose rows are materialized as nodes.
    Rows(Rendered),
    /// Buckets to probe with `probe` (binds `:begin` and `:end`).
    Days { buckets: Vec<DayBucket>, probe: String },
    /// Distinct reversed hosts, plus a probe for local files.
    Sites { hosts: Rendered, local_files: Rendered, sort: SortMode, time_suffix: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub plan: Plan,
    pub path: CompilePath,
    /// Rows must go through the post-query filter; LIMIT was not applied.
    pub needs_filter: bool,
    /// Ordering SQL could not express, applied after fetching.
    pub sort_after: Option<SortMode>,
}

/// The SQL for "recently visited" and "most visited" listings: one query,
/// no predicates, a cap, and a recency or visit-count order.
fn is_optimizable(queries: &[Query], o: &QueryOptions) -> bool {
    let [q] = queries else { return false };
    o.query_type == QueryType::History
        && o.result_type == ResultType::Uri
        && matches!(o.sort, SortMode::DateDesc | SortMode::VisitCountDesc)
        && o.max_results > 0
        && !o.exclude_items
        && !o.include_hidden
        && q.min_visits < 0
        && q.max_visits < 0
        && !q.has_begin_time()
        && !q.has_end_time()
        && !q.has_search_terms()
        && !q.only_bookmarked
        && q.domain.is_none()
        && q.annotation.is_none()
        && q.uri.is_none()
        && q.folders.is_empty()
        && q.tags.is_empty()
}

fn needs_filter(queries: &[Query], o: &QueryOptions) -> bool {
    if o.result_type.is_container_query() {
        return false;
    }
    o.query_type == QueryType::Bookmarks
        || queries.iter().any(|q| !q.folders.is_empty() || q.has_search_terms())
}

fn tags_fragment(place: &str) -> String {
    format!(
        "(SELECT GROUP_CONCAT(t.title, ',') FROM bookmarks bt \
         JOIN bookmarks t ON t.id = bt.parent \
         WHERE bt.fk = {place} AND t.parent = {TAGS_FOLDER_ID})"
    )
}

fn redirect_visit_filter(mode: RedirectsMode) -> &'static str {
    match mode {
        RedirectsMode::All => "",
        RedirectsMode::Source => " AND v.visit_type NOT IN (5, 6)",
        RedirectsMode::Target => {
            " AND NOT EXISTS (SELECT id FROM visits WHERE from_visit = v.id \
             AND visit_type IN (5, 6))"
        }
    }
}

fn visit_options(o: &QueryOptions) -> String {
    let mut s = redirect_visit_filter(o.redirects_mode).to_string();
    if !o.include_hidden {
        s.push_str(" AND v.visit_type NOT IN (0, 4)");
    }
    s
}

fn place_options(o: &QueryOptions) -> &'static str {
    if o.include_hidden {
        ""
    } else {
        " AND h.hidden <> 1"
    }
}

fn optimized(o: &QueryOptions) -> Rendered {
    let redirects = match o.redirects_mode {
        RedirectsMode::All => "",
        RedirectsMode::Source => {
            " AND NOT EXISTS (SELECT id FROM visits WHERE place_id = h.id \
             AND visit_type IN (5, 6))"
        }
        RedirectsMode::Target => {
            " AND NOT EXISTS (SELECT id FROM visits vt WHERE vt.place_id = h.id \
             AND EXISTS (SELECT id FROM visits WHERE from_visit = vt.id \
             AND visit_type IN (5, 6)))"
        }
    };
    let order = if o.sort == SortMode::DateDesc {
        "h.last_visit_date DESC"
    } else {
        "h.visit_count DESC"
    };
    Rendered::new(format!(
        "SELECT h.id, h.url, h.title, h.rev_host, h.visit_count, h.last_visit_date, f.url, \
         NULL, NULL, NULL, NULL, NULL, {tags}, NULL \
         FROM places h LEFT JOIN favicons f ON h.favicon_id = f.id \
         WHERE h.hidden <> 1 \
         AND EXISTS (SELECT id FROM visits WHERE place_id = h.id AND visit_type NOT IN (0, 4))\
         {redirects} ORDER BY {order}, h.id ASC LIMIT {max}",
        tags = tags_fragment("h.id"),
        max = o.max_results,
    ))
}

/// Predicate for query `index`. Times are normalized against `now`.
fn query_expr(q: &Query, index: usize, o: &QueryOptions, now: i64) -> Expr {
    let bookmark_rows =
        o.query_type == QueryType::Bookmarks || o.result_type == ResultType::TagContents;
    let time_col = if bookmark_rows { "h.last_visit_date" } else { "v.visit_date" };
    let mut and = Vec::new();

    if q.has_begin_time() {
        let t = normalize_time(q.begin_time_ref, q.begin_time, now);
        and.push(Expr::compare(time_col, ">=", Param::new("begin_time", index, t)));
    }
    if q.has_end_time() {
        let t = normalize_time(q.end_time_ref, q.end_time, now);
        and.push(Expr::compare(time_col, "<=", Param::new("end_time", index, t)));
    }
    if q.min_visits >= 0 {
        let p = Param::new("min_visits", index, i64::from(q.min_visits));
        and.push(Expr::compare("h.visit_count", ">=", p));
    }
    if q.max_visits >= 0 {
        let p = Param::new("max_visits", index, i64::from(q.max_visits));
        and.push(Expr::compare("h.visit_count", "<=", p));
    }
    if q.only_bookmarked && o.query_type != QueryType::Bookmarks {
        and.push(Expr::raw(
            "EXISTS (SELECT b.fk FROM bookmarks b WHERE b.type = 1 AND b.fk = h.id)",
        ));
    }
    if let Some(domain) = &q.domain {
        let lower = reverse_host(&domain.to_lowercase());
        if q.domain_is_host {
            and.push(Expr::compare("h.rev_host", "=", Param::new("domain_lower", index, lower)));
        } else {
            // "moc.elpmaxe." .. "moc.elpmaxe/" covers the host and every subdomain.
            let mut upper = lower[..lower.len() - 1].to_string();
            upper.push('/');
            and.push(Expr::compare("h.rev_host", ">=", Param::new("domain_lower", index, lower)));
            and.push(Expr::compare("h.rev_host", "<", Param::new("domain_upper", index, upper)));
        }
    }
    if let Some(raw) = &q.uri {
        if q.uri_is_prefix {
            // Stored URLs are normalized. Prefixes that don't parse, such as
            // a bare "http:", are matched as written.
            let prefix = uri::normalize(raw).unwrap_or_else(|_| raw.clone());
            let upper = format!("{prefix}\u{7f}");
            and.push(Expr::compare("h.url", ">=", Param::new("uri", index, prefix)));
            and.push(Expr::compare("h.url", "<=", Param::new("uri_upper", index, upper)));
        } else {
            let exact = uri::normalize(raw).unwrap_or_else(|_| raw.clone());
            and.push(Expr::compare("h.url", "=", Param::new("uri", index, exact)));
        }
    }
    if let Some(anno) = &q.annotation {
        and.push(
            Expr::Raw(vec![
                Piece::Sql(
                    "EXISTS (SELECT anno.id FROM annos anno \
                     JOIN anno_attributes n ON anno.anno_attribute_id = n.id \
                     WHERE anno.place_id = h.id AND n.name = "
                        .into(),
                ),
                Piece::Param(Param::new("anno", index, anno.as_str())),
                Piece::Sql(")".into()),
            ])
            .negate(q.annotation_is_not),
        );
    }
    if !q.tags.is_empty() {
        let mut tags: Vec<&str> = q.tags.iter().map(String::as_str).collect();
        tags.sort_unstable();
        tags.dedup();
        let list = tags
            .iter()
            .enumerate()
            .map(|(i, t)| Param::new(&format!("tag{i}_"), index, *t))
            .collect();
        let mut pieces = vec![
            Piece::Sql(format!(
                "h.id IN (SELECT bms.fk FROM bookmarks bms \
                 JOIN bookmarks tags ON bms.parent = tags.id \
                 WHERE tags.parent = {TAGS_FOLDER_ID} AND tags.title IN ("
            )),
            Piece::List(list),
            Piece::Sql(")".into()),
        ];
        if !q.tags_are_not {
            pieces.push(Piece::Sql(" GROUP BY bms.fk HAVING count(*) >= ".into()));
            pieces.push(Piece::Param(Param::new("tag_count", index, tags.len() as i64)));
        }
        pieces.push(Piece::Sql(")".into()));
        and.push(Expr::Raw(pieces).negate(q.tags_are_not));
    }
    if o.result_type == ResultType::TagContents {
        if let [folder] = q.folders.as_slice() {
            and.push(Expr::compare("b.parent", "=", Param::new("parent", index, *folder)));
        }
    }
    Expr::And(and)
}

/// Columns a result shape can order by.
struct Columns {
    title: &'static str,
    date: &'static str,
    tie: &'static str,
    dates: Option<(&'static str, &'static str)>,
}

fn order_by(sort: SortMode, max_results: u32, cols: &Columns) -> String {
    let dir = if sort.is_descending() { "DESC" } else { "ASC" };
    let key = match sort {
        // A capped title listing keeps the most recent rows; titles are
        // ordered after fetching.
        SortMode::TitleAsc | SortMode::TitleDesc if max_results > 0 => {
            Some(format!("{} DESC", cols.date))
        }
        SortMode::TitleAsc | SortMode::TitleDesc => {
            Some(format!("{} COLLATE {TITLE_COLLATION} {dir}", cols.title))
        }
        SortMode::DateAsc | SortMode::DateDesc => Some(format!("{} {dir}", cols.date)),
        SortMode::UriAsc | SortMode::UriDesc => Some(format!("h.url {dir}")),
        SortMode::VisitCountAsc | SortMode::VisitCountDesc => {
            Some(format!("h.visit_count {dir}"))
        }
        SortMode::DateAddedAsc | SortMode::DateAddedDesc => {
            cols.dates.map(|(added, _)| format!("{added} {dir}"))
        }
        SortMode::LastModifiedAsc | SortMode::LastModifiedDesc => {
            cols.dates.map(|(_, modified)| format!("{modified} {dir}"))
        }
        SortMode::None | SortMode::TagsAsc | SortMode::TagsDesc => None,
    };
    match key {
        Some(k) => format!(" ORDER BY {k}, {}", cols.tie),
        None => format!(" ORDER BY {}", cols.tie),
    }
}

fn conditions_clause(conds: &Option<Rendered>) -> Rendered {
    match conds {
        Some(c) => {
            let mut r = Rendered::new(" AND (");
            r.append(c.clone());
            r.push_str(")");
            r
        }
        None => Rendered::default(),
    }
}

fn select_history(o: &QueryOptions, conds: &Option<Rendered>, visits: bool) -> (Rendered, Columns) {
    let (time, session, visit_id, group) = if visits {
        ("v.visit_date", "v.session", "v.id", "")
    } else {
        ("h.last_visit_date", "NULL", "NULL", " GROUP BY h.id")
    };
    let mut r = Rendered::new(format!(
        "SELECT h.id, h.url, h.title, h.rev_host, h.visit_count, {time}, f.url, {session}, \
         NULL, NULL, NULL, NULL, {tags}, {visit_id} \
         FROM places h JOIN visits v ON h.id = v.place_id \
         LEFT JOIN favicons f ON h.favicon_id = f.id \
         WHERE 1{vopts}{popts}",
        tags = tags_fragment("h.id"),
        vopts = visit_options(o),
        popts = place_options(o),
    ));
    r.append(conditions_clause(conds));
    r.push_str(group);
    let cols = Columns {
        title: "h.title",
        date: time,
        tie: if visits { "h.id ASC, v.id ASC" } else { "h.id ASC" },
        dates: None,
    };
    (r, cols)
}

fn select_bookmarks(conds: &Option<Rendered>) -> (Rendered, Columns) {
    let mut r = Rendered::new(format!(
        "SELECT b.fk, h.url, COALESCE(b.title, h.title), h.rev_host, h.visit_count, \
         h.last_visit_date, f.url, NULL, b.id, b.date_added, b.last_modified, b.parent, \
         {tags}, NULL \
         FROM bookmarks b JOIN places h ON b.fk = h.id AND b.type = 1 \
         LEFT JOIN favicons f ON h.favicon_id = f.id \
         WHERE NOT EXISTS (SELECT id FROM bookmarks WHERE id = b.parent AND parent = {TAGS_FOLDER_ID})",
        tags = tags_fragment("h.id"),
    ));
    r.append(conditions_clause(conds));
    let cols = Columns {
        title: "COALESCE(b.title, h.title)",
        date: "h.last_visit_date",
        tie: "h.id ASC, b.id ASC",
        dates: Some(("b.date_added", "b.last_modified")),
    };
    (r, cols)
}

/// Every bookmark of the pages filed under one tag. Rows come grouped by
/// page, most recently modified first, and duplicates are dropped later.
fn select_tag_contents(conds: &Option<Rendered>) -> Rendered {
    let mut r = Rendered::new(
        "SELECT b2.fk, h.url, COALESCE(b2.title, h.title), h.rev_host, h.visit_count, \
         h.last_visit_date, f.url, NULL, b2.id, b2.date_added, b2.last_modified, b2.parent, ",
    );
    r.push_str(&tags_fragment("h.id"));
    r.push_str(
        ", NULL FROM bookmarks b2 \
         JOIN (SELECT b.fk FROM bookmarks b JOIN places h ON h.id = b.fk WHERE b.type = 1",
    );
    r.append(conditions_clause(conds));
    r.push_str(&format!(
        ") seed ON b2.fk = seed.fk \
         JOIN places h ON b2.fk = h.id \
         LEFT JOIN favicons f ON h.favicon_id = f.id \
         WHERE b2.type = 1 \
         AND NOT EXISTS (SELECT id FROM bookmarks WHERE id = b2.parent AND parent = {TAGS_FOLDER_ID}) \
         GROUP BY b2.id ORDER BY b2.fk DESC, b2.last_modified DESC"
    ));
    r
}

fn select_tags(sort: SortMode) -> Rendered {
    let dir = if sort.is_descending() { "DESC" } else { "ASC" };
    let order = match sort {
        SortMode::DateAddedAsc | SortMode::DateAddedDesc => format!("date_added {dir}"),
        SortMode::LastModifiedAsc | SortMode::LastModifiedDesc => format!("last_modified {dir}"),
        SortMode::TitleDesc => format!("title COLLATE {TITLE_COLLATION} DESC"),
        _ => format!("title COLLATE {TITLE_COLLATION} ASC"),
    };
    Rendered::new(format!(
        "SELECT NULL, 'place:folder=' || id || '&queryType=1&type=7', title, NULL, NULL, NULL, \
         NULL, NULL, id, date_added, last_modified, parent, NULL, NULL \
         FROM bookmarks WHERE parent = {TAGS_FOLDER_ID} ORDER BY {order}, id ASC"
    ))
}

/// Sort code handed to grouping children; unsorted parents list children by title.
pub(crate) fn child_sort(sort: SortMode) -> u16 {
    if sort == SortMode::None {
        u16::from(SortMode::TitleAsc)
    } else {
        u16::from(sort)
    }
}

/// Day containers relative to the local calendar day of `now`.
pub fn day_buckets(now: i64, expire_days_max: u32, sort: SortMode) -> Vec<DayBucket> {
    let today = start_of_local_day(now);
    let tomorrow = local_day_offset(now, 1);
    let month = start_of_local_month(now, 0);
    let months = MAX_MONTH_BUCKETS.min(expire_days_max / 30);
    let mut out = Vec::new();

    let mut push = |title: String, begin: i64, end: i64, search_begin: i64, search_end: i64| {
        let uri = format!(
            "place:type={}&sort={}&beginTime={begin}&endTime={end}",
            u16::from(ResultType::Uri),
            child_sort(sort),
        );
        out.push(DayBucket { title, begin, end, search_begin, search_end, uri });
    };

    push("Today".into(), today, tomorrow, today, tomorrow);
    let yesterday = local_day_offset(now, -1);
    push("Yesterday".into(), yesterday, today, yesterday, today);
    let week = local_day_offset(now, -7);
    push("Last 7 days".into(), week, tomorrow, week, local_day_offset(now, -2));
    push("This month".into(), month, tomorrow, month, week);
    for i in 1..=months {
        if i == MAX_MONTH_BUCKETS {
            let end = start_of_local_month(now, MAX_MONTH_BUCKETS - 1);
            push("Older than 6 months".into(), 0, end, 0, end);
        } else {
            let begin = start_of_local_month(now, i);
            let end = start_of_local_month(now, i - 1);
            push(local_month_label(begin, now), begin, end, begin, end);
        }
    }
    out
}

/// Compile `queries` under `options`. `now` resolves relative times and day
/// boundaries.
pub fn compile(
    queries: &[Query],
    options: &QueryOptions,
    now: i64,
    history: &HistoryConfig,
) -> Result<CompiledQuery, PlacesError> {
    if queries.is_empty() {
        return Err(PlacesError::EmptyQueryList);
    }

    if let Some(folder) = simple_folder(queries, options) {
        debug!(folder, "query compiled to folder listing");
        return Ok(CompiledQuery {
            plan: Plan::Folder { folder },
            path: CompilePath::FolderShortcut,
            needs_filter: false,
            sort_after: None,
        });
    }

    if is_optimizable(queries, options) {
        debug!(sort = ?options.sort, max = options.max_results, "query compiled to optimized history listing");
        return Ok(CompiledQuery {
            plan: Plan::Rows(optimized(options)),
            path: CompilePath::Optimized,
            needs_filter: false,
            sort_after: None,
        });
    }

    let expr = Expr::Or(
        queries
            .iter()
            .enumerate()
            .map(|(i, q)| query_expr(q, i, options, now))
            .collect(),
    );
    let conds = (!expr.is_trivial()).then(|| expr.render());
    let filter = needs_filter(queries, options);

    let plan = match options.result_type {
        ResultType::DateQuery => {
            let probe = format!(
                "SELECT EXISTS (SELECT 1 FROM visits v WHERE v.visit_date >= :begin \
                 AND v.visit_date < :end AND v.visit_type NOT IN (0, 4){})",
                redirect_visit_filter(options.redirects_mode)
            );
            Plan::Days {
                buckets: day_buckets(now, history.expire_days_max, options.sort),
                probe,
            }
        }
        ResultType::SiteQuery => {
            let mut hosts = Rendered::new(format!(
                "SELECT DISTINCT h.rev_host FROM places h JOIN visits v ON v.place_id = h.id \
                 WHERE h.rev_host <> '.' AND h.visit_count > 0{}{}",
                visit_options(options),
                place_options(options),
            ));
            hosts.append(conditions_clause(&conds));
            let mut local_files = Rendered::new(format!(
                "SELECT EXISTS (SELECT h.id FROM places h JOIN visits v ON v.place_id = h.id \
                 WHERE h.rev_host = '.' AND h.url BETWEEN 'file://' AND 'file:/~'{}{}",
                visit_options(options),
                place_options(options),
            ));
            local_files.append(conditions_clause(&conds));
            local_files.push_str(")");
            let mut time_suffix = String::new();
            let q = &queries[0];
            if q.has_begin_time() {
                let t = normalize_time(q.begin_time_ref, q.begin_time, now);
                time_suffix.push_str(&format!("&beginTime={t}"));
            }
            if q.has_end_time() {
                let t = normalize_time(q.end_time_ref, q.end_time, now);
                time_suffix.push_str(&format!("&endTime={t}"));
            }
            Plan::Sites { hosts, local_files, sort: options.sort, time_suffix }
        }
        ResultType::TagQuery => Plan::Rows(select_tags(options.sort)),
        ResultType::TagContents => Plan::Rows(select_tag_contents(&conds)),
        ResultType::Uri | ResultType::Visit | ResultType::FullVisit => {
            let (mut r, cols) = match (options.result_type, options.query_type) {
                (ResultType::Uri, QueryType::Bookmarks) => select_bookmarks(&conds),
                (ResultType::Uri, QueryType::History) => select_history(options, &conds, false),
                _ => select_history(options, &conds, true),
            };
            r.push_str(&order_by(options.sort, options.max_results, &cols));
            if !filter && options.max_results > 0 {
                r.push_str(&format!(" LIMIT {}", options.max_results));
            }
            Plan::Rows(r)
        }
    };

    let sort_after = match options.sort {
        SortMode::TitleAsc | SortMode::TitleDesc
            if options.max_results > 0 && !options.result_type.is_container_query() =>
        {
            Some(options.sort)
        }
        SortMode::TagsAsc | SortMode::TagsDesc => Some(options.sort),
        _ => None,
    };
    debug!(
        queries = queries.len(),
        result_type = ?options.result_type,
        needs_filter = filter,
        "query compiled to general statement"
    );
    Ok(CompiledQuery { plan, path: CompilePath::General, needs_filter: filter, sort_after })
}

#[cfg(test)]
#[path = "compile_tests.rs"]
mod tests;
