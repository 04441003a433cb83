//! The `place:` string form of a query set: `key=value` pairs joined by `&`,
//! queries separated by `OR`. Saved queries live in history under this form.

use std::borrow::Cow;

use super::{Query, QueryOptions, RedirectsMode, ResultType, SortMode, QueryType};
use crate::db::{
    MENU_FOLDER_ID, ROOT_FOLDER_ID, TAGS_FOLDER_ID, TOOLBAR_FOLDER_ID, UNFILED_FOLDER_ID,
};
use crate::error::PlacesError;
use crate::time::TimeRef;
use crate::uri::QUERY_SCHEME;

const OR_SEPARATOR: &str = "OR";

fn escape(s: &str) -> Cow<'_, str> {
    urlencoding::encode(s)
}

struct Pairs(Vec<String>);

impl Pairs {
    fn push(&mut self, key: &str, value: impl std::fmt::Display) {
        self.0.push(format!("{key}={value}"));
    }

    fn flag(&mut self, key: &str, on: bool) {
        if on {
            self.push(key, 1);
        }
    }
}

fn encode_query(q: &Query, out: &mut Pairs) {
    if q.has_begin_time() {
        out.push("beginTime", q.begin_time);
        if q.begin_time_ref != TimeRef::Epoch {
            out.push("beginTimeRef", u8::from(q.begin_time_ref));
        }
    }
    if q.has_end_time() {
        out.push("endTime", q.end_time);
        if q.end_time_ref != TimeRef::Epoch {
            out.push("endTimeRef", u8::from(q.end_time_ref));
        }
    }
    if q.has_search_terms() {
        out.push("terms", escape(&q.search_terms));
    }
    if q.min_visits >= 0 {
        out.push("minVisits", q.min_visits);
    }
    if q.max_visits >= 0 {
        out.push("maxVisits", q.max_visits);
    }
    out.flag("onlyBookmarked", q.only_bookmarked);
    // Flags are written on their own so a query decodes to the same value
    // even when the field they qualify is unset.
    out.flag("domainIsHost", q.domain_is_host);
    if let Some(domain) = &q.domain {
        out.push("domain", escape(domain));
    }
    out.flag("uriIsPrefix", q.uri_is_prefix);
    if let Some(uri) = &q.uri {
        out.push("uri", escape(uri));
    }
    if let Some(anno) = &q.annotation {
        let key = if q.annotation_is_not { "!annotation" } else { "annotation" };
        out.push(key, escape(anno));
    }
    for tag in &q.tags {
        out.push("tag", escape(tag));
    }
    out.flag("!tags", q.tags_are_not);
    for folder in &q.folders {
        out.push("folder", folder);
    }
}

fn encode_options(o: &QueryOptions, out: &mut Pairs) {
    if o.sort != SortMode::None {
        out.push("sort", u16::from(o.sort));
    }
    if o.result_type != ResultType::Uri {
        out.push("type", u16::from(o.result_type));
    }
    if o.query_type != QueryType::History {
        out.push("queryType", u16::from(o.query_type));
    }
    if o.max_results > 0 {
        out.push("maxResults", o.max_results);
    }
    out.flag("includeHidden", o.include_hidden);
    if o.redirects_mode != RedirectsMode::All {
        out.push("redirectsMode", u16::from(o.redirects_mode));
    }
    out.flag("excludeItems", o.exclude_items);
}

/// Serialize a query set. Only non-default values are written.
pub fn to_query_uri(queries: &[Query], options: &QueryOptions) -> String {
    let mut pairs = Pairs(Vec::new());
    for (i, q) in queries.iter().enumerate() {
        if i > 0 {
            pairs.0.push(OR_SEPARATOR.to_string());
        }
        encode_query(q, &mut pairs);
    }
    encode_options(options, &mut pairs);
    format!("{QUERY_SCHEME}:{}", pairs.0.join("&"))
}

fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, PlacesError> {
    value
        .parse()
        .map_err(|_| PlacesError::QueryParse(format!("{key}: not a number: {value:?}")))
}

fn boolean(key: &str, value: &str) -> Result<bool, PlacesError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(PlacesError::QueryParse(format!("{key}: not a boolean: {value:?}"))),
    }
}

fn folder_id(value: &str) -> Result<i64, PlacesError> {
    match value {
        "PLACES_ROOT" => Ok(ROOT_FOLDER_ID),
        "BOOKMARKS_MENU" => Ok(MENU_FOLDER_ID),
        "TOOLBAR" => Ok(TOOLBAR_FOLDER_ID),
        "TAGS" => Ok(TAGS_FOLDER_ID),
        "UNFILED_BOOKMARKS" => Ok(UNFILED_FOLDER_ID),
        _ => number("folder", value),
    }
}

fn time_ref(key: &str, value: &str) -> Result<TimeRef, PlacesError> {
    TimeRef::try_from(number::<u8>(key, value)?)
}

/// Parse a `place:` string back into queries and options. Unknown keys are
/// skipped; malformed values fail the whole string.
pub fn parse_query_uri(spec: &str) -> Result<(Vec<Query>, QueryOptions), PlacesError> {
    let body = spec
        .strip_prefix(QUERY_SCHEME)
        .and_then(|s| s.strip_prefix(':'))
        .ok_or_else(|| PlacesError::QueryParse(format!("not a {QUERY_SCHEME}: uri")))?;

    let mut queries = vec![Query::default()];
    let mut options = QueryOptions::default();

    for token in body.split('&').filter(|t| !t.is_empty()) {
        if token == OR_SEPARATOR {
            queries.push(Query::default());
            continue;
        }
        let Some((key, raw)) = token.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(raw)
            .map_err(|e| PlacesError::QueryParse(format!("{key}: {e}")))?;
        let value = value.as_ref();
        let q = queries.last_mut().ok_or(PlacesError::EmptyQueryList)?;

        match key {
            "beginTime" => q.begin_time = number(key, value)?,
            "beginTimeRef" => q.begin_time_ref = time_ref(key, value)?,
            "endTime" => q.end_time = number(key, value)?,
            "endTimeRef" => q.end_time_ref = time_ref(key, value)?,
            "terms" => q.search_terms = value.to_string(),
            "minVisits" => q.min_visits = number(key, value)?,
            "maxVisits" => q.max_visits = number(key, value)?,
            "onlyBookmarked" => q.only_bookmarked = boolean(key, value)?,
            "domainIsHost" => q.domain_is_host = boolean(key, value)?,
            "domain" => q.domain = Some(value.to_string()),
            "uriIsPrefix" => q.uri_is_prefix = boolean(key, value)?,
            "uri" => q.uri = Some(value.to_string()),
            "annotation" => {
                q.annotation = Some(value.to_string());
                q.annotation_is_not = false;
            }
            "!annotation" => {
                q.annotation = Some(value.to_string());
                q.annotation_is_not = true;
            }
            "tag" => q.tags.push(value.to_string()),
            "!tags" => q.tags_are_not = boolean(key, value)?,
            "folder" => q.folders.push(folder_id(value)?),
            "sort" => options.sort = SortMode::try_from(number::<u16>(key, value)?)?,
            "type" => options.result_type = ResultType::try_from(number::<u16>(key, value)?)?,
            "queryType" => options.query_type = QueryType::try_from(number::<u16>(key, value)?)?,
            "maxResults" => options.max_results = number(key, value)?,
            "includeHidden" => options.include_hidden = boolean(key, value)?,
            "redirectsMode" => {
                options.redirects_mode = RedirectsMode::try_from(number::<u16>(key, value)?)?
            }
            "excludeItems" => options.exclude_items = boolean(key, value)?,
            _ => {}
        }
    }
    Ok((queries, options))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_encode_to_bare_scheme() {
        assert_eq!(to_query_uri(&[Query::new()], &QueryOptions::new()), "place:");
        let (qs, opts) = parse_query_uri("place:").unwrap();
        assert_eq!(qs, vec![Query::new()]);
        assert_eq!(opts, QueryOptions::new());
    }

    #[test]
    fn round_trips_every_field() {
        let q0 = Query::new()
            .begin(-3_600_000_000, TimeRef::Now)
            .end(5, TimeRef::Today)
            .terms("rust book & more")
            .visits(2, 10)
            .only_bookmarked()
            .domain("example.com", false)
            .uri("http://example.com/a?b=c", true)
            .annotation("note/x", true)
            .tags(["a b", "c"], true)
            .folder(3)
            .folder(7);
        let q1 = Query::new().domain("", true);
        let opts = QueryOptions::new()
            .sort(SortMode::VisitCountDesc)
            .result_type(ResultType::Visit)
            .query_type(QueryType::Bookmarks)
            .max_results(25)
            .include_hidden()
            .redirects(RedirectsMode::Target)
            .exclude_items();

        let s = to_query_uri(&[q0.clone(), q1.clone()], &opts);
        assert!(s.contains("&OR&"));
        assert!(s.contains("terms=rust%20book%20%26%20more"));
        let (qs, parsed) = parse_query_uri(&s).unwrap();
        assert_eq!(qs, vec![q0, q1]);
        assert_eq!(parsed, opts);
    }

    #[test]
    fn flags_survive_without_their_values() {
        let q = Query::new().tags(Vec::<String>::new(), true);
        let s = to_query_uri(&[q.clone()], &QueryOptions::new());
        assert_eq!(s, "place:!tags=1");
        let (qs, _) = parse_query_uri(&s).unwrap();
        assert_eq!(qs, vec![q]);

        let mut host_only = Query::new();
        host_only.domain_is_host = true;
        host_only.uri_is_prefix = true;
        let (qs, _) = parse_query_uri(&to_query_uri(&[host_only.clone()], &QueryOptions::new())).unwrap();
        assert_eq!(qs, vec![host_only]);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let (qs, opts) = parse_query_uri("place:folder=TOOLBAR&expandQueries=0&sort=1").unwrap();
        assert_eq!(qs[0].folders, vec![TOOLBAR_FOLDER_ID]);
        assert_eq!(opts.sort, SortMode::TitleAsc);
    }

    #[test]
    fn malformed_values_fail() {
        for bad in [
            "place:maxResults=ten",
            "place:sort=99",
            "place:beginTime=1x",
            "place:onlyBookmarked=maybe",
            "place:folder=nowhere",
            "http://example.com/",
        ] {
            assert!(matches!(parse_query_uri(bad), Err(PlacesError::QueryParse(_))), "{bad}");
        }
    }

    #[test]
    fn grouping_child_uris_parse() {
        let (qs, opts) =
            parse_query_uri("place:type=0&sort=4&domain=a.test&domainIsHost=true&beginTime=5&endTime=9")
                .unwrap();
        assert_eq!(qs[0].domain.as_deref(), Some("a.test"));
        assert!(qs[0].domain_is_host);
        assert_eq!((qs[0].begin_time, qs[0].end_time), (5, 9));
        assert_eq!(opts.sort, SortMode::DateDesc);
    }
}
