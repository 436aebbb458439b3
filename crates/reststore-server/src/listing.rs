//! JSON and HTML renderings of a collection listing.

use std::fmt::Write as _;

use serde_json::{Map, Value};

/// `{"<collection name>": ["a/", "c/", "b.txt"]}`.
pub fn render_json(collection_name: &str, names: &[String]) -> Value {
    let mut map = Map::new();
    map.insert(collection_name.to_string(), Value::from(names.to_vec()));
    Value::Object(map)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Browser index page for the collection served at `url_path`.
///
/// `url_path` is the full request path ending in `/`; `prefix` is the part of
/// it that is not storage path.
pub fn render_html(url_path: &str, prefix: &str, names: &[String]) -> String {
    let storage_path = url_path.strip_prefix(prefix).unwrap_or(url_path);
    let mut html = String::new();
    html.push_str("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>");
    html.push_str(&escape_html(url_path));
    html.push_str("</title></head><body>\n<h1>");

    // Breadcrumb: one link per ancestor collection.
    let mut href = prefix.to_string();
    let _ = write!(html, "<a href=\"{}/\">root</a>", escape_html(&href));
    for segment in storage_path.split('/').filter(|s| !s.is_empty()) {
        href.push('/');
        href.push_str(segment);
        let _ = write!(
            html,
            " / <a href=\"{}/\">{}</a>",
            escape_html(&href),
            escape_html(segment)
        );
    }
    html.push_str("</h1>\n<ul>\n");

    if storage_path.trim_matches('/') != "" {
        html.push_str("<li><a href=\"../\">..</a></li>\n");
    }
    for name in names {
        let _ = writeln!(
            html,
            "<li><a href=\"{0}\">{0}</a></li>",
            escape_html(name)
        );
    }
    html.push_str("</ul>\n</body></html>\n");
    html
}
