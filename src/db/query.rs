//! Running compiled queries against the store.

use rusqlite::{named_params, Connection};
use tracing::debug;

use super::bookmarks::parent_of;
use super::HistoryDB;
use crate::error::PlacesError;
use crate::query::{child_sort, compile, parse_query_uri, Plan, Query, QueryOptions, Rendered, SortMode};
use crate::results::{filter_result_set, query_node, row_to_node, sort_nodes, NodeType, ResultNode};
use crate::uri::{self, unreverse_host};

const FOLDER_SQL: &str = "SELECT b.id, b.type, b.title, b.date_added, b.last_modified, b.parent, \
     h.id, h.url, h.title, h.visit_count, h.last_visit_date, f.url \
     FROM bookmarks b LEFT JOIN places h ON b.fk = h.id \
     LEFT JOIN favicons f ON h.favicon_id = f.id \
     WHERE b.parent = ?1 ORDER BY b.position, b.id";

fn folder_row(row: &rusqlite::Row, options: &QueryOptions) -> rusqlite::Result<Option<ResultNode>> {
    let id: i64 = row.get(0)?;
    let kind: u8 = row.get(1)?;
    let title: Option<String> = row.get(2)?;
    let url: Option<String> = row.get(7)?;

    let mut node = match (kind, url) {
        (2, _) if !options.exclude_items => ResultNode::folder(id, title),
        (3, _) if !options.exclude_items => ResultNode::new(NodeType::Separator, ""),
        (1, Some(url)) if uri::is_query_uri(&url) => {
            if options.exclude_items {
                return Ok(None);
            }
            query_node(&url, title, Some(id))
        }
        (1, Some(url)) => {
            let mut n = ResultNode::new(NodeType::Uri, url);
            n.title = title.or(row.get(8)?);
            n.place_id = row.get(6)?;
            n.access_count = row.get::<_, Option<i64>>(9)?.unwrap_or(0);
            n.time = row.get(10)?;
            n.icon = row.get(11)?;
            n
        }
        _ => return Ok(None),
    };
    node.item_id = Some(id);
    node.date_added = row.get(3)?;
    node.last_modified = row.get(4)?;
    node.parent_id = row.get(5)?;
    Ok(Some(node))
}

fn list_folder(c: &Connection, folder: i64, options: &QueryOptions) -> Result<Vec<ResultNode>, PlacesError> {
    let mut stmt = c.prepare(FOLDER_SQL)?;
    let rows = stmt.query_map([folder], |r| folder_row(r, options))?;
    let mut out = Vec::new();
    for row in rows {
        if let Some(node) = row? {
            out.push(node);
        }
    }
    Ok(out)
}

fn fetch_rows(c: &Connection, r: &Rendered, options: &QueryOptions) -> Result<Vec<ResultNode>, PlacesError> {
    let mut stmt = c.prepare(&r.sql)?;
    let params = r.named_params();
    let nodes = stmt
        .query_map(params.as_slice(), |row| row_to_node(row, options))?
        .collect::<Result<_, _>>()?;
    Ok(nodes)
}

fn site_nodes(
    c: &Connection,
    hosts: &Rendered,
    local_files: &Rendered,
    sort: SortMode,
    time_suffix: &str,
) -> Result<Vec<ResultNode>, PlacesError> {
    let child = |domain: &str| {
        format!(
            "{}:type=0&sort={}&domain={}&domainIsHost=1{time_suffix}",
            uri::QUERY_SCHEME,
            child_sort(sort),
            urlencoding::encode(domain),
        )
    };
    let mut out = Vec::new();

    let mut stmt = c.prepare(&local_files.sql)?;
    let params = local_files.named_params();
    let has_local: bool = stmt.query_row(params.as_slice(), |r| r.get(0))?;
    if has_local {
        out.push(query_node(&child(""), Some("Local files".into()), None));
    }

    let mut stmt = c.prepare(&hosts.sql)?;
    let params = hosts.named_params();
    let mut names: Vec<String> = stmt
        .query_map(params.as_slice(), |r| r.get::<_, Option<String>>(0))?
        .filter_map(|r| r.transpose())
        .map(|r| r.map(|rev| unreverse_host(&rev)))
        .collect::<Result<_, _>>()?;
    names.retain(|h| !h.is_empty());
    names.sort_by_key(|h| h.to_lowercase());
    names.dedup();
    if sort == SortMode::TitleDesc {
        names.reverse();
    }
    out.extend(names.into_iter().map(|h| {
        let spec = child(&h);
        query_node(&spec, Some(h), None)
    }));
    Ok(out)
}

impl HistoryDB {
    /// Run `queries` (ORed together) under `options`.
    pub fn execute_query(&self, queries: &[Query], options: &QueryOptions) -> Result<Vec<ResultNode>, PlacesError> {
        let now = self.now();
        let compiled = compile(queries, options, now, &self.config().history)?;
        self.read(|c| {
            let mut nodes = match &compiled.plan {
                Plan::Folder { folder } => list_folder(c, *folder, options)?,
                Plan::Rows(r) => fetch_rows(c, r, options)?,
                Plan::Days { buckets, probe } => {
                    let mut stmt = c.prepare(probe)?;
                    let mut out = Vec::new();
                    for b in buckets {
                        let found: bool = stmt.query_row(
                            named_params! { ":begin": b.search_begin, ":end": b.search_end },
                            |r| r.get(0),
                        )?;
                        if found {
                            out.push(query_node(&b.uri, Some(b.title.clone()), None).with_time(b.begin));
                        }
                    }
                    out
                }
                Plan::Sites { hosts, local_files, sort, time_suffix } => {
                    site_nodes(c, hosts, local_files, *sort, time_suffix)?
                }
            };
            if compiled.needs_filter {
                nodes = filter_result_set(nodes, queries, options, |id| parent_of(c, id))?;
            }
            if let Some(sort) = compiled.sort_after {
                sort_nodes(&mut nodes, sort);
            }
            debug!(path = ?compiled.path, results = nodes.len(), "query executed");
            Ok(nodes)
        })
    }

    /// Run a serialized `place:` query.
    pub fn query_uri(&self, spec: &str) -> Result<Vec<ResultNode>, PlacesError> {
        let (queries, options) = parse_query_uri(spec)?;
        self.execute_query(&queries, &options)
    }

    /// Contents of a container node. Pages, separators and query nodes whose
    /// URL didn't parse have none.
    pub fn node_children(&self, node: &ResultNode) -> Result<Vec<ResultNode>, PlacesError> {
        match (node.node_type, node.folder_id, &node.query) {
            (NodeType::Folder, Some(folder), _) => {
                self.execute_query(&[Query::new().folder(folder)], &QueryOptions::new())
            }
            (NodeType::Query, _, Some(saved)) => self.execute_query(&saved.queries, &saved.options),
            _ => Ok(Vec::new()),
        }
    }
}
