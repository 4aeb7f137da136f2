//! Markup helpers: normalization, cache keys, link and text extraction.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

const SKIPPED_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

/// Re-serializes markup through an HTML5 parser so snapshots are well formed.
pub fn normalize_markup(markup: &str) -> String {
    Html::parse_document(markup).html()
}

/// Markup with the bodies of script, style, noscript and template elements
/// removed. The tags themselves and their attributes stay.
pub fn strip_inert(markup: &str) -> String {
    let mut document = Html::parse_document(markup);
    let inert: Vec<_> = document
        .tree
        .nodes()
        .filter(|node| {
            node.value()
                .as_element()
                .is_some_and(|el| SKIPPED_TAGS.contains(&el.name()))
        })
        .flat_map(|node| node.children().map(|child| child.id()).collect::<Vec<_>>())
        .collect();
    for id in inert {
        if let Some(mut child) = document.tree.get_mut(id) {
            child.detach();
        }
    }
    document.html()
}

/// Filesystem-safe name for a URL.
///
/// Scheme, query and fragment are dropped, a leading `www.` is removed and
/// path separators become `_`. Distinct URLs can map to the same key.
pub fn cache_key(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let rest = rest.strip_prefix("www.").unwrap_or(rest);

    let key: String = rest
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let key = key.trim_matches('_');

    if key.is_empty() {
        "index".to_string()
    } else {
        key.to_string()
    }
}

/// Anchor targets in `markup`, resolved against `base`, fragment stripped,
/// deduplicated in document order.
pub fn extract_links(base: &Url, markup: &str) -> Vec<Url> {
    let document = Html::parse_document(markup);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&anchors) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() {
            continue;
        }
        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        resolved.set_fragment(None);
        if seen.insert(resolved.to_string()) {
            links.push(resolved);
        }
    }
    links
}

/// Scheme, host and port equality. Opaque origins (`mailto:`, `javascript:`)
/// never match.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin().is_tuple() && a.origin() == b.origin()
}

/// Same-origin subset of the page's links.
pub fn same_origin_links(base: &Url, markup: &str) -> Vec<Url> {
    extract_links(base, markup)
        .into_iter()
        .filter(|link| same_origin(base, link))
        .collect()
}

/// Visible text of the page, whitespace-joined.
pub fn extract_text(markup: &str) -> String {
    let document = Html::parse_document(markup);
    let mut parts = Vec::new();
    collect_text(document.root_element(), &mut parts);
    parts.join(" ")
}

fn collect_text(node: ElementRef<'_>, out: &mut Vec<String>) {
    for child in node.children() {
        if let Some(element) = ElementRef::wrap(child) {
            if SKIPPED_TAGS.contains(&element.value().name()) {
                continue;
            }
            collect_text(element, out);
        } else if let Some(text) = child.value().as_text() {
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !text.is_empty() {
                out.push(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_strips_scheme_and_www() {
        assert_eq!(cache_key("https://www.example.com/login"), "example.com_login");
        assert_eq!(cache_key("http://example.com/a/b/"), "example.com_a_b");
        assert_eq!(cache_key("https://example.com"), "example.com");
    }

    #[test]
    fn cache_key_ignores_query_and_fragment() {
        assert_eq!(
            cache_key("https://example.com/login?next=/home#top"),
            "example.com_login"
        );
    }

    #[test]
    fn cache_key_is_filesystem_safe() {
        assert_eq!(cache_key("http://localhost:8080/app"), "localhost_8080_app");
        assert_eq!(cache_key("https://"), "index");
    }

    #[test]
    fn cache_key_collisions_are_possible() {
        assert_eq!(
            cache_key("https://example.com/a/b"),
            cache_key("http://www.example.com/a_b")
        );
    }

    #[test]
    fn links_are_resolved_and_deduplicated() {
        let base = Url::parse("https://example.com/start").unwrap();
        let markup = r##"
            <a href="/about">About</a>
            <a href="about">About again</a>
            <a href="https://example.com/about#team">Team</a>
            <a href="https://other.org/x">Other</a>
            <a href="">Empty</a>
            <a>No href</a>
        "##;
        let links: Vec<String> = extract_links(&base, markup)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            links,
            vec!["https://example.com/about", "https://other.org/x"]
        );
    }

    #[test]
    fn same_origin_filter_checks_scheme_host_port() {
        let base = Url::parse("https://example.com/").unwrap();
        let markup = r#"
            <a href="http://example.com/plain">http</a>
            <a href="https://example.com:8443/port">port</a>
            <a href="mailto:me@example.com">mail</a>
            <a href="/ok">ok</a>
        "#;
        let links: Vec<String> = same_origin_links(&base, markup)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(links, vec!["https://example.com/ok"]);
    }

    #[test]
    fn text_skips_scripts_and_collapses_whitespace() {
        let markup = r#"<html><head><style>p{}</style></head>
            <body><h1>Sign   in</h1><script>var x = 1;</script><p>Welcome back</p></body></html>"#;
        assert_eq!(extract_text(markup), "Sign in Welcome back");
    }

    #[test]
    fn inert_bodies_are_dropped_but_tags_kept() {
        let markup = r#"<html><head><script src="/app.js"></script><script>var big = 1;</script>
            <style>.x { color: red }</style></head>
            <body><input id="email" name="email"></body></html>"#;
        let stripped = strip_inert(markup);
        assert!(stripped.contains(r#"<script src="/app.js"></script>"#));
        assert!(stripped.contains("<style></style>"));
        assert!(!stripped.contains("var big"));
        assert!(!stripped.contains("color: red"));
        assert!(stripped.contains(r#"<input id="email" name="email">"#));
    }

    #[test]
    fn normalization_closes_tags() {
        let html = normalize_markup("<p>unclosed");
        assert!(html.contains("<p>unclosed</p>"));
        assert!(html.starts_with("<html>"));
    }
}
