//! Facts about URIs that the store cares about: whether they may be recorded,
//! the reversed host used for domain lookups, and fallback titles.

use url::Url;

use crate::error::PlacesError;

/// Longest URL spec accepted into history.
pub const MAX_URI_LEN: usize = 65536;

/// Titles are truncated to this many characters.
pub const MAX_TITLE_LEN: usize = 4096;

/// Schemes that never produce history entries.
const DISALLOWED_SCHEMES: &[&str] = &[
    "about",
    "imap",
    "news",
    "mailbox",
    "moz-anno",
    "view-source",
    "chrome",
    "resource",
    "data",
    "javascript",
    "wyciwyg",
];

/// Saved queries are stored as places with this scheme.
pub const QUERY_SCHEME: &str = "place";

/// Parse and normalize a URL spec, enforcing the length cap.
pub fn parse(spec: &str) -> Result<Url, PlacesError> {
    if spec.len() > MAX_URI_LEN {
        return Err(PlacesError::UriTooLong);
    }
    let url = Url::parse(spec).map_err(|e| PlacesError::InvalidUri(format!("{spec}: {e}")))?;
    if url.as_str().len() > MAX_URI_LEN {
        return Err(PlacesError::UriTooLong);
    }
    Ok(url)
}

/// Normalized spec string, the key used by the recent-event caches.
pub fn normalize(spec: &str) -> Result<String, PlacesError> {
    parse(spec).map(String::from)
}

/// Whether visits to this URL are recorded at all.
pub fn can_add(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" | "ftp" | "file" => true,
        s => !DISALLOWED_SCHEMES.contains(&s),
    }
}

pub fn is_query_uri(spec: &str) -> bool {
    spec.len() > QUERY_SCHEME.len()
        && spec.starts_with(QUERY_SCHEME)
        && spec.as_bytes()[QUERY_SCHEME.len()] == b':'
}

/// "www.example.com" -> "moc.elpmaxe.www."
pub fn reverse_host(host: &str) -> String {
    let mut rev: String = host.chars().rev().collect();
    rev.push('.');
    rev
}

/// Inverse of [`reverse_host`]. The local-files marker "." maps to "".
pub fn unreverse_host(rev: &str) -> String {
    rev.strip_suffix('.').unwrap_or(rev).chars().rev().collect()
}

/// Reversed host for a URL: "." for file URLs, `None` when there is no host.
pub fn reversed_host(url: &Url) -> Option<String> {
    if url.scheme() == "file" {
        return Some(reverse_host(url.host_str().unwrap_or("")));
    }
    url.host_str().map(|h| reverse_host(&h.to_lowercase()))
}

/// Fallback title for a page we have no title for: file name, then path,
/// then host.
pub fn title_from_uri(url: &Url) -> String {
    let decode = |s: &str| {
        urlencoding::decode(s)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| s.to_string())
    };
    if let Some(name) = url
        .path_segments()
        .and_then(|mut segs| segs.next_back())
        .filter(|s| !s.is_empty())
    {
        return truncate_title(&decode(name));
    }
    let path = url.path().trim_matches('/');
    if !path.is_empty() && url.cannot_be_a_base() {
        return truncate_title(&decode(path));
    }
    if let Some(host) = url.host_str() {
        return truncate_title(host);
    }
    truncate_title(url.as_str())
}

pub fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE_LEN {
        title.to_string()
    } else {
        title.chars().take(MAX_TITLE_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_hosts() {
        let u = parse("http://Sub.Example.com/x").unwrap();
        assert_eq!(reversed_host(&u).as_deref(), Some("moc.elpmaxe.bus."));
        let f = parse("file:///tmp/a.txt").unwrap();
        assert_eq!(reversed_host(&f).as_deref(), Some("."));
        let q = parse("place:sort=4").unwrap();
        assert_eq!(reversed_host(&q), None);
        assert_eq!(unreverse_host("moc.elpmaxe."), "example.com");
        assert_eq!(unreverse_host("."), "");
    }

    #[test]
    fn scheme_filter() {
        assert!(can_add(&parse("https://a.test/").unwrap()));
        assert!(can_add(&parse("place:folder=2").unwrap()));
        assert!(!can_add(&parse("about:blank").unwrap()));
        assert!(!can_add(&parse("data:text/plain,hi").unwrap()));
        assert!(!can_add(&parse("javascript:void(0)").unwrap()));
    }

    #[test]
    fn length_cap() {
        let long = format!("http://a.test/{}", "x".repeat(MAX_URI_LEN));
        assert!(matches!(parse(&long), Err(PlacesError::UriTooLong)));
    }

    #[test]
    fn generated_titles() {
        assert_eq!(title_from_uri(&parse("http://a.test/dir/file%20one.html").unwrap()), "file one.html");
        assert_eq!(title_from_uri(&parse("http://a.test/").unwrap()), "a.test");
        assert_eq!(title_from_uri(&parse("http://a.test/dir/").unwrap()), "a.test");
    }

    #[test]
    fn query_uri_detection() {
        assert!(is_query_uri("place:folder=2"));
        assert!(!is_query_uri("placebo:x"));
        assert!(!is_query_uri("place"));
    }
}
