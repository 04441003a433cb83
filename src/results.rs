//! Result nodes and the in-memory stage of query execution: rows become
//! typed nodes, saved `place:` URLs become nested query or folder nodes, and
//! predicates SQL couldn't express are applied here.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use crate::collation::compare_titles;
use crate::error::PlacesError;
use crate::query::{col, parse_query_uri, simple_folder, Query, QueryOptions, ResultType, SortMode};
use crate::uri;

/// Longest parent chain walked while resolving folder membership.
const MAX_FOLDER_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Uri,
    Visit,
    FullVisit,
    Query,
    Folder,
    Separator,
}

impl NodeType {
    /// Page-like nodes, as opposed to containers and separators.
    pub fn is_uri(self) -> bool {
        matches!(self, NodeType::Uri | NodeType::Visit | NodeType::FullVisit)
    }
}

/// Queries and options behind a query node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedQuery {
    pub queries: Vec<Query>,
    pub options: QueryOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultNode {
    pub node_type: NodeType,
    pub uri: String,
    pub title: Option<String>,
    pub place_id: Option<i64>,
    pub access_count: i64,
    pub time: Option<i64>,
    pub icon: Option<String>,
    pub session_id: Option<i64>,
    pub visit_id: Option<i64>,
    /// Bookmark item the row came from.
    pub item_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub date_added: Option<i64>,
    pub last_modified: Option<i64>,
    /// Comma-separated tag names.
    pub tags: Option<String>,
    /// Folder listed by a folder node.
    pub folder_id: Option<i64>,
    /// `None` on a query node means its URL did not parse; it has no children.
    pub query: Option<SavedQuery>,
}

impl ResultNode {
    pub fn new(node_type: NodeType, uri: impl Into<String>) -> Self {
        Self {
            node_type,
            uri: uri.into(),
            title: None,
            place_id: None,
            access_count: 0,
            time: None,
            icon: None,
            session_id: None,
            visit_id: None,
            item_id: None,
            parent_id: None,
            date_added: None,
            last_modified: None,
            tags: None,
            folder_id: None,
            query: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_time(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn folder(folder_id: i64, title: Option<String>) -> Self {
        let mut node = Self::new(NodeType::Folder, format!("{}:folder={folder_id}", uri::QUERY_SCHEME));
        node.folder_id = Some(folder_id);
        node.title = title;
        node
    }
}

/// Node for a saved `place:` URL. A URL that doesn't parse still yields a
/// query node, one that lists nothing.
pub fn query_node(spec: &str, title: Option<String>, item_id: Option<i64>) -> ResultNode {
    match parse_query_uri(spec) {
        Ok((queries, options)) => {
            if let Some(folder) = simple_folder(&queries, &options) {
                let mut node = ResultNode::folder(folder, title);
                node.item_id = item_id;
                return node;
            }
            let mut node = ResultNode::new(NodeType::Query, spec);
            node.title = title;
            node.item_id = item_id;
            node.query = Some(SavedQuery { queries, options });
            node
        }
        Err(e) => {
            warn!(uri = spec, error = %e, "malformed saved query");
            let mut node = ResultNode::new(NodeType::Query, spec);
            node.title = title;
            node.item_id = item_id;
            node
        }
    }
}

fn node_type_for(result_type: ResultType) -> NodeType {
    match result_type {
        ResultType::Visit => NodeType::Visit,
        ResultType::FullVisit => NodeType::FullVisit,
        _ => NodeType::Uri,
    }
}

/// Map a row in the compiler's column layout.
pub(crate) fn row_to_node(row: &rusqlite::Row, options: &QueryOptions) -> rusqlite::Result<ResultNode> {
    let url: String = row.get(col::URL)?;
    let title: Option<String> = row.get(col::TITLE)?;
    let item_id: Option<i64> = row.get(col::ITEM_ID)?;

    let mut node = if uri::is_query_uri(&url) {
        query_node(&url, title, item_id)
    } else {
        let mut node = ResultNode::new(node_type_for(options.result_type), url);
        node.title = title;
        node.item_id = item_id;
        node.place_id = row.get(col::PLACE_ID)?;
        node.session_id = row.get(col::SESSION)?;
        node.visit_id = row.get(col::VISIT_ID)?;
        node.tags = row.get(col::TAGS)?;
        node
    };
    node.access_count = row.get::<_, Option<i64>>(col::VISIT_COUNT)?.unwrap_or(0);
    node.time = row.get(col::TIME)?;
    node.icon = row.get(col::FAVICON)?;
    if item_id.is_some() {
        // The root's parent is not a real folder.
        node.parent_id = row.get::<_, Option<i64>>(col::PARENT)?.filter(|p| *p > 0);
        node.date_added = row.get(col::DATE_ADDED)?;
        node.last_modified = row.get(col::LAST_MODIFIED)?;
    }
    Ok(node)
}

fn unescape(s: &str) -> String {
    urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_else(|_| s.to_string())
}

fn matches_terms(node: &ResultNode, terms: &[String]) -> bool {
    let title = node.title.as_deref().unwrap_or("").to_lowercase();
    let url = unescape(&node.uri).to_lowercase();
    let tags = node.tags.as_deref().unwrap_or("").to_lowercase();
    terms
        .iter()
        .all(|t| title.contains(t.as_str()) || url.contains(t.as_str()) || tags.contains(t.as_str()))
}

/// Per-query folder membership, memoized as ancestors are walked.
struct FolderScope {
    include: HashSet<i64>,
    exclude: HashSet<i64>,
}

impl FolderScope {
    fn contains<F>(&mut self, parent: i64, parent_of: &mut F) -> Result<bool, PlacesError>
    where
        F: FnMut(i64) -> Result<Option<i64>, PlacesError>,
    {
        if self.exclude.contains(&parent) {
            return Ok(false);
        }
        if self.include.contains(&parent) {
            return Ok(true);
        }
        let mut walked = vec![parent];
        let mut current = parent;
        let mut belongs = false;
        while walked.len() <= MAX_FOLDER_DEPTH {
            match parent_of(current)? {
                Some(p) if p > 0 => current = p,
                _ => break,
            }
            if self.exclude.contains(&current) {
                break;
            }
            if self.include.contains(&current) {
                belongs = true;
                break;
            }
            walked.push(current);
        }
        let cache = if belongs { &mut self.include } else { &mut self.exclude };
        cache.extend(walked);
        Ok(belongs)
    }
}

/// Apply search terms and folder membership to `nodes`, keeping rows that
/// satisfy at least one query, then enforce the result cap.
///
/// `parent_of` resolves a bookmark folder's parent.
pub fn filter_result_set<F>(
    nodes: Vec<ResultNode>,
    queries: &[Query],
    options: &QueryOptions,
    mut parent_of: F,
) -> Result<Vec<ResultNode>, PlacesError>
where
    F: FnMut(i64) -> Result<Option<i64>, PlacesError>,
{
    let terms: Vec<Vec<String>> = queries.iter().map(Query::search_term_list).collect();
    let mut scopes: Vec<FolderScope> = queries
        .iter()
        .map(|q| FolderScope { include: q.folders.iter().copied().collect(), exclude: HashSet::new() })
        .collect();
    let tag_contents = options.result_type == ResultType::TagContents;
    let cap = options.max_results as usize;

    let mut out: Vec<ResultNode> = Vec::new();
    let mut previous_uri: Option<String> = None;
    for node in nodes {
        if !node.node_type.is_uri() {
            continue;
        }
        // Tag contents arrive grouped by page; keep the first row of each.
        if tag_contents && previous_uri.as_deref() == Some(node.uri.as_str()) {
            continue;
        }
        previous_uri = Some(node.uri.clone());
        let parent = if node.item_id.is_some() { node.parent_id.unwrap_or(-1) } else { -1 };

        let mut keep = false;
        for (i, q) in queries.iter().enumerate() {
            if !terms[i].is_empty() && !matches_terms(&node, &terms[i]) {
                continue;
            }
            if !q.folders.is_empty() && !tag_contents && !scopes[i].contains(parent, &mut parent_of)? {
                continue;
            }
            keep = true;
            break;
        }
        if keep {
            out.push(node);
            if cap > 0 && out.len() >= cap {
                break;
            }
        }
    }
    Ok(out)
}

/// Orderings that happen after fetching: titles under a result cap, and tags.
pub fn sort_nodes(nodes: &mut [ResultNode], sort: SortMode) {
    nodes.sort_by(|a, b| compare_titles(sort_text(a, sort), sort_text(b, sort)));
    if sort.is_descending() {
        nodes.reverse();
    }
}

fn sort_text(node: &ResultNode, sort: SortMode) -> &str {
    match sort {
        SortMode::TagsAsc | SortMode::TagsDesc => node.tags.as_deref().unwrap_or(""),
        _ => node.title.as_deref().unwrap_or(""),
    }
}
