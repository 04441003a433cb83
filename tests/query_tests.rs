use places::config::Config;
use places::db::{HistoryDB, MENU_FOLDER_ID, TOOLBAR_FOLDER_ID};
use places::error::PlacesError;
use places::query::{parse_query_uri, to_query_uri, Query, QueryOptions, QueryType, ResultType, SortMode};
use places::results::{NodeType, ResultNode};
use places::time::{fixed_clock, local_day_offset, now_us, USECS_PER_SEC};

fn test_db() -> HistoryDB {
    HistoryDB::open(":memory:").expect("in-memory db")
}

fn uris(nodes: &[ResultNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.uri.as_str()).collect()
}

fn titles(nodes: &[ResultNode]) -> Vec<&str> {
    nodes.iter().map(|n| n.title.as_deref().unwrap_or("")).collect()
}

#[test]
fn time_range_sorted_by_date() {
    let db = test_db();
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    db.add_uri("http://b.test/", 200, false, true, None).unwrap();
    db.add_uri("http://c.test/", 400, false, true, None).unwrap();

    let q = Query::new().between(0, 300);
    let out = db.execute_query(&[q], &QueryOptions::new().sort(SortMode::DateAsc)).unwrap();
    assert_eq!(uris(&out), ["http://a.test/", "http://b.test/"]);
    assert_eq!(out[0].time, Some(100));
    assert_eq!(out[0].access_count, 1);
    assert_eq!(out[0].node_type, NodeType::Uri);
}

#[test]
fn empty_query_list_fails() {
    let db = test_db();
    assert!(matches!(db.execute_query(&[], &QueryOptions::new()), Err(PlacesError::EmptyQueryList)));
}

#[test]
fn domain_query_covers_subdomains_only() {
    let db = test_db();
    for (i, u) in ["http://example.com/", "http://sub.example.com/x", "http://notexample.com/"]
        .iter()
        .enumerate()
    {
        db.add_uri(u, 100 + i as i64, false, true, None).unwrap();
    }
    let opts = QueryOptions::new().sort(SortMode::UriAsc);
    let subtree = db.execute_query(&[Query::new().domain("example.com", false)], &opts).unwrap();
    assert_eq!(uris(&subtree), ["http://example.com/", "http://sub.example.com/x"]);

    let host = db.execute_query(&[Query::new().domain("example.com", true)], &opts).unwrap();
    assert_eq!(uris(&host), ["http://example.com/"]);
}

#[test]
fn ored_queries_union_their_matches() {
    let db = test_db();
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    db.add_uri("http://b.test/", 200, false, true, None).unwrap();
    db.add_uri("http://c.test/", 300, false, true, None).unwrap();
    let qs = [Query::new().domain("a.test", true), Query::new().between(250, 350)];
    let out = db.execute_query(&qs, &QueryOptions::new().sort(SortMode::DateDesc)).unwrap();
    assert_eq!(uris(&out), ["http://c.test/", "http://a.test/"]);
}

#[test]
fn equal_sort_keys_order_by_place_id() {
    let db = test_db();
    for u in ["http://z.test/", "http://y.test/", "http://x.test/"] {
        db.add_uri(u, 500, false, true, None).unwrap();
    }
    // Optimized and general paths agree on ties.
    let fast = db
        .execute_query(&[Query::new()], &QueryOptions::new().sort(SortMode::DateDesc).max_results(10))
        .unwrap();
    let general = db
        .execute_query(&[Query::new().visits(1, -1)], &QueryOptions::new().sort(SortMode::DateDesc))
        .unwrap();
    assert_eq!(uris(&fast), ["http://z.test/", "http://y.test/", "http://x.test/"]);
    assert_eq!(uris(&fast), uris(&general));
}

#[test]
fn hidden_and_embedded_pages_need_include_hidden() {
    let db = test_db();
    db.add_uri("http://page.test/", 100, false, true, None).unwrap();
    db.add_uri("http://ads.test/frame", 110, false, false, None).unwrap();
    let q = Query::new().between(0, 1000);
    let visible = db.execute_query(&[q.clone()], &QueryOptions::new()).unwrap();
    assert_eq!(uris(&visible), ["http://page.test/"]);
    let all = db.execute_query(&[q], &QueryOptions::new().include_hidden()).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn visit_results_list_each_visit() {
    let db = test_db();
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    db.add_uri("http://a.test/", 200, false, true, None).unwrap();
    let opts = QueryOptions::new().result_type(ResultType::Visit).sort(SortMode::DateAsc);
    let out = db.execute_query(&[Query::new().between(0, 1000)], &opts).unwrap();
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|n| n.node_type == NodeType::Visit && n.visit_id.is_some()));
    assert_eq!(out[0].time, Some(100));
    assert_eq!(out[1].time, Some(200));
}

#[test]
fn search_terms_match_title_url_and_tags_with_cap() {
    let db = test_db();
    db.add_uri("http://docs.test/rust", 100, false, true, None).unwrap();
    db.add_uri("http://blog.test/", 200, false, true, None).unwrap();
    db.set_page_title("http://blog.test/", "Learning Rust").unwrap();
    db.add_uri("http://misc.test/", 300, false, true, None).unwrap();
    db.tag_uri("http://misc.test/", &["rust"]).unwrap();
    db.add_uri("http://other.test/", 400, false, true, None).unwrap();

    let opts = QueryOptions::new().sort(SortMode::DateDesc);
    let out = db.execute_query(&[Query::new().terms("RUST")], &opts).unwrap();
    assert_eq!(uris(&out), ["http://misc.test/", "http://blog.test/", "http://docs.test/rust"]);

    let capped = db.execute_query(&[Query::new().terms("rust")], &opts.max_results(2)).unwrap();
    assert_eq!(capped.len(), 2);
}

#[test]
fn capped_title_sort_keeps_recent_rows_then_orders_titles() {
    let db = test_db();
    let pages = [("http://a.test/", "Zulu", 100), ("http://b.test/", "alpha", 200), ("http://c.test/", "Mike", 300)];
    for (u, title, t) in pages {
        db.add_uri(u, t, false, true, None).unwrap();
        db.set_page_title(u, title).unwrap();
    }
    let opts = QueryOptions::new().sort(SortMode::TitleAsc).max_results(2);
    let out = db.execute_query(&[Query::new().visits(1, -1)], &opts).unwrap();
    assert_eq!(titles(&out), ["alpha", "Mike"]);
}

#[test]
fn accented_titles_sort_beside_their_base_letters() {
    let db = test_db();
    let pages = [("http://z.test/", "zebra", 100), ("http://e.test/", "Ébène", 200), ("http://a.test/", "apple", 300)];
    for (u, title, t) in pages {
        db.add_uri(u, t, false, true, None).unwrap();
        db.set_page_title(u, title).unwrap();
    }
    let q = [Query::new().visits(1, -1)];
    let uncapped = db.execute_query(&q, &QueryOptions::new().sort(SortMode::TitleAsc)).unwrap();
    assert_eq!(titles(&uncapped), ["apple", "Ébène", "zebra"]);

    let capped = db.execute_query(&q, &QueryOptions::new().sort(SortMode::TitleAsc).max_results(3)).unwrap();
    assert_eq!(titles(&capped), ["apple", "Ébène", "zebra"]);

    let desc = db.execute_query(&q, &QueryOptions::new().sort(SortMode::TitleDesc)).unwrap();
    assert_eq!(titles(&desc), ["zebra", "Ébène", "apple"]);
}

#[test]
fn uri_queries_match_equivalent_spellings() {
    let db = test_db();
    db.add_uri("http://example.com/", 100, false, true, None).unwrap();
    db.add_uri("http://example.com/docs/intro", 200, false, true, None).unwrap();
    db.add_uri("http://other.test/", 300, false, true, None).unwrap();
    let opts = QueryOptions::new().sort(SortMode::UriAsc);

    let exact = db.execute_query(&[Query::new().uri("http://Example.com", false)], &opts).unwrap();
    assert_eq!(uris(&exact), ["http://example.com/"]);

    let prefix = db.execute_query(&[Query::new().uri("HTTP://EXAMPLE.COM/docs", true)], &opts).unwrap();
    assert_eq!(uris(&prefix), ["http://example.com/docs/intro"]);

    // Not a URL on its own; matched as written.
    let scheme = db.execute_query(&[Query::new().uri("http:", true)], &opts).unwrap();
    assert_eq!(scheme.len(), 3);
}

#[test]
fn annotations_and_tags_filter_pages() {
    let db = test_db();
    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    db.add_uri("http://b.test/", 200, false, true, None).unwrap();
    db.set_page_annotation("http://a.test/", "note", "keep").unwrap();
    db.tag_uri("http://b.test/", &["x", "y"]).unwrap();
    db.tag_uri("http://a.test/", &["x"]).unwrap();

    let opts = QueryOptions::new().sort(SortMode::UriAsc);
    let annotated = db.execute_query(&[Query::new().annotation("note", false)], &opts).unwrap();
    assert_eq!(uris(&annotated), ["http://a.test/"]);
    let not_annotated = db.execute_query(&[Query::new().annotation("note", true)], &opts).unwrap();
    assert_eq!(uris(&not_annotated), ["http://b.test/"]);

    let both = db.execute_query(&[Query::new().tags(["x", "y"], false)], &opts).unwrap();
    assert_eq!(uris(&both), ["http://b.test/"]);
    let neither = db.execute_query(&[Query::new().tags(["y"], true)], &opts).unwrap();
    assert_eq!(uris(&neither), ["http://a.test/"]);
}

#[test]
fn folder_listing_materializes_every_item_kind() {
    let db = test_db();
    let dev = db.create_folder(MENU_FOLDER_ID, "Dev").unwrap();
    let a = db.insert_bookmark(MENU_FOLDER_ID, "http://a.test/", "A").unwrap();
    db.insert_separator(MENU_FOLDER_ID).unwrap();
    db.insert_bookmark(MENU_FOLDER_ID, "place:sort=banana", "Broken").unwrap();
    db.insert_bookmark(MENU_FOLDER_ID, "place:domain=a.test&domainIsHost=1", "Saved").unwrap();

    let out = db.execute_query(&[Query::new().folder(MENU_FOLDER_ID)], &QueryOptions::new()).unwrap();
    let kinds: Vec<NodeType> = out.iter().map(|n| n.node_type).collect();
    assert_eq!(
        kinds,
        [NodeType::Folder, NodeType::Uri, NodeType::Separator, NodeType::Query, NodeType::Query]
    );
    assert_eq!(out[0].folder_id, Some(dev));
    assert_eq!(out[1].item_id, Some(a));
    assert_eq!(out[1].title.as_deref(), Some("A"));

    // A malformed saved query is listed but has nothing inside.
    assert!(out[3].query.is_none());
    assert!(db.node_children(&out[3]).unwrap().is_empty());

    db.add_uri("http://a.test/", 100, false, true, None).unwrap();
    let saved = db.node_children(&out[4]).unwrap();
    assert_eq!(uris(&saved), ["http://a.test/"]);

    let only_items = db
        .execute_query(&[Query::new().folder(MENU_FOLDER_ID)], &QueryOptions::new().exclude_items())
        .unwrap();
    assert_eq!(uris(&only_items), ["http://a.test/"]);
}

#[test]
fn bookmark_query_filters_by_folder_subtree() {
    let db = test_db();
    let dev = db.create_folder(MENU_FOLDER_ID, "Dev").unwrap();
    db.insert_bookmark(MENU_FOLDER_ID, "http://a.test/", "rust top").unwrap();
    db.insert_bookmark(dev, "http://b.test/", "rust nested").unwrap();
    db.insert_bookmark(TOOLBAR_FOLDER_ID, "http://c.test/", "rust elsewhere").unwrap();

    let q = Query::new().folder(MENU_FOLDER_ID).terms("rust");
    let opts = QueryOptions::new().query_type(QueryType::Bookmarks).sort(SortMode::UriAsc);
    let out = db.execute_query(&[q], &opts).unwrap();
    assert_eq!(uris(&out), ["http://a.test/", "http://b.test/"]);
    assert_eq!(out[1].parent_id, Some(dev));
}

#[test]
fn tag_grouping_lists_tags_then_their_pages() {
    let db = test_db();
    db.insert_bookmark(MENU_FOLDER_ID, "http://a.test/", "A").unwrap();
    db.tag_uri("http://a.test/", &["rust", "db"]).unwrap();
    db.insert_bookmark(MENU_FOLDER_ID, "http://b.test/", "B").unwrap();
    db.tag_uri("http://b.test/", &["rust"]).unwrap();

    let tags = db
        .execute_query(&[Query::new()], &QueryOptions::new().result_type(ResultType::TagQuery))
        .unwrap();
    assert_eq!(titles(&tags), ["db", "rust"]);
    assert!(tags.iter().all(|n| n.node_type == NodeType::Query));

    let rust = db.node_children(&tags[1]).unwrap();
    let mut pages = uris(&rust);
    pages.sort_unstable();
    assert_eq!(pages, ["http://a.test/", "http://b.test/"]);
    let a = rust.iter().find(|n| n.uri == "http://a.test/").unwrap();
    assert_eq!(a.tags.as_deref().map(|t| t.len()), Some("rust,db".len()));
}

#[test]
fn site_grouping_lists_hosts_and_local_files() {
    let db = test_db();
    db.add_uri("http://b.test/x", 100, false, true, None).unwrap();
    db.add_uri("http://a.test/", 200, false, true, None).unwrap();
    db.add_uri("http://a.test/y", 300, false, true, None).unwrap();
    db.add_uri("file:///tmp/notes.txt", 400, false, true, None).unwrap();

    let opts = QueryOptions::new().result_type(ResultType::SiteQuery);
    let sites = db.execute_query(&[Query::new()], &opts).unwrap();
    assert_eq!(titles(&sites), ["Local files", "a.test", "b.test"]);

    let a = db.node_children(&sites[1]).unwrap();
    assert_eq!(a.len(), 2);
    let local = db.node_children(&sites[0]).unwrap();
    assert_eq!(uris(&local), ["file:///tmp/notes.txt"]);
}

#[test]
fn day_grouping_shows_buckets_with_visits() {
    let now = now_us();
    let db = HistoryDB::open_with(":memory:", Config::default(), fixed_clock(now)).unwrap();
    db.add_uri("http://today.test/", now, false, true, None).unwrap();
    let three_days_ago = local_day_offset(now, -3) + 3600 * USECS_PER_SEC;
    db.add_uri("http://earlier.test/", three_days_ago, false, true, None).unwrap();

    let opts = QueryOptions::new().result_type(ResultType::DateQuery);
    let days = db.execute_query(&[Query::new()], &opts).unwrap();
    assert_eq!(titles(&days), ["Today", "Last 7 days"]);

    let today = db.node_children(&days[0]).unwrap();
    assert_eq!(uris(&today), ["http://today.test/"]);
    let week = db.node_children(&days[1]).unwrap();
    assert!(uris(&week).contains(&"http://earlier.test/"));
}

#[test]
fn serialized_queries_run_and_round_trip() {
    let db = test_db();
    db.add_uri("http://example.com/", 100, false, true, None).unwrap();
    db.add_uri("http://sub.example.com/", 200, false, true, None).unwrap();

    let out = db.query_uri("place:domain=example.com&sort=5").unwrap();
    assert_eq!(uris(&out), ["http://example.com/", "http://sub.example.com/"]);

    let queries = [Query::new().domain("example.com", true).terms("a b"), Query::new().folder(2)];
    let opts = QueryOptions::new().sort(SortMode::VisitCountDesc).max_results(4);
    let spec = to_query_uri(&queries, &opts);
    let (back, back_opts) = parse_query_uri(&spec).unwrap();
    assert_eq!(back, queries);
    assert_eq!(back_opts, opts);

    assert!(matches!(db.query_uri("place:maxResults=lots"), Err(PlacesError::QueryParse(_))));
}
