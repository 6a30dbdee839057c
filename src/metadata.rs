//! Page metadata extraction.
//!
//! Pulls the title, description and Open Graph image out of an HTML page.
//! Every field is looked up on its own, so a page missing one of them (or a
//! selector that fails to compile) only loses that field.
//!
//! Malformed or non-HTML input is not an error: the HTML5 parser recovers
//! from anything, and a document without the expected elements simply yields
//! a `Metadata` with only `url` set.

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// The queried URL, always present.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `og:image` exactly as the page wrote it; relative URLs are kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

pub fn extract(html: &str, source_url: &str) -> Metadata {
    let doc = Html::parse_document(html);

    Metadata {
        url: source_url.to_string(),
        title: first_text(&doc, "title"),
        description: first_content(&doc, r#"meta[name="description"]"#),
        image: first_content(&doc, r#"meta[property="og:image"]"#),
    }
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let selector = compile(selector)?;
    let text = doc.select(&selector).next()?.text().collect::<String>();
    non_empty(&text)
}

fn first_content(doc: &Html, selector: &str) -> Option<String> {
    let selector = compile(selector)?;
    doc.select(&selector)
        .next()?
        .value()
        .attr("content")
        .and_then(non_empty)
}

fn compile(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!("Skipping metadata selector {}: {:?}", selector, e);
            None
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"<!doctype html>
<html><head>
  <title>  Trade #42 </title>
  <meta name="description" content="A preview of trade 42">
  <meta property="og:image" content="https://cdn.example.com/42.png">
</head><body><title>ignored second title</title></body></html>"#;

    #[test]
    fn extracts_all_fields() {
        let meta = extract(FULL, "https://example.com/t/42");
        assert_eq!(meta.url, "https://example.com/t/42");
        assert_eq!(meta.title.as_deref(), Some("Trade #42"));
        assert_eq!(meta.description.as_deref(), Some("A preview of trade 42"));
        assert_eq!(meta.image.as_deref(), Some("https://cdn.example.com/42.png"));
    }

    #[test]
    fn missing_og_image_is_absent() {
        let html = r#"<html><head><title>T</title><meta name="description" content="d"></head></html>"#;
        let meta = extract(html, "https://example.com");
        assert_eq!(meta.title.as_deref(), Some("T"));
        assert_eq!(meta.description.as_deref(), Some("d"));
        assert_eq!(meta.image, None);

        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("image").is_none());
    }

    #[test]
    fn relative_image_is_kept_verbatim() {
        let html = r#"<meta property="og:image" content="/img/cover.png">"#;
        let meta = extract(html, "https://example.com/page");
        assert_eq!(meta.image.as_deref(), Some("/img/cover.png"));
    }

    #[test]
    fn non_html_yields_url_only() {
        let meta = extract("\u{0}\u{1}{\"json\": true}<<<>>>", "https://example.com/x");
        assert_eq!(
            meta,
            Metadata {
                url: "https://example.com/x".into(),
                title: None,
                description: None,
                image: None,
            }
        );
    }

    #[test]
    fn blank_values_are_absent() {
        let html = r#"<title>   </title><meta name="description" content="">"#;
        let meta = extract(html, "u");
        assert_eq!(meta.title, None);
        assert_eq!(meta.description, None);
    }
}
