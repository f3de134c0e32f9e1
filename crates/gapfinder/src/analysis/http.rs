//! reqwest-based [`Fetcher`].

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Node, Selector};
use tracing::{debug, warn};

use crate::error::FetchError;

use super::{FetchedDocument, Fetcher};

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static VENUE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#"meta[name="citation_conference_title"], meta[name="citation_journal_title"]"#,
    )
    .unwrap()
});
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static RE_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Elements whose text never counts as document content.
const SKIPPED: [&str; 4] = ["script", "style", "noscript", "template"];

/// Fetches documents over HTTP(S). HTML bodies are reduced to text.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_ms: u64,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gapfinder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self {
            client,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        debug!(host = %crate::sanitize::redact_url(url), "HTTP fetch starting");
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else {
                FetchError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "HTTP fetch rejected");
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        parse_document(url, &body)
    }
}

/// Extracts title, venue and plain text from an HTML (or plain text) body.
pub fn parse_document(url: &str, body: &str) -> Result<FetchedDocument, FetchError> {
    let document = Html::parse_document(body);
    let raw_content = body_text(&document);
    if raw_content.is_empty() {
        return Err(FetchError::EmptyContent);
    }
    let title = extract_title(&document).unwrap_or_else(|| url.to_string());
    let venue = document
        .select(&VENUE)
        .filter_map(|meta| meta.value().attr("content"))
        .map(collapse_whitespace)
        .find(|v| !v.is_empty());

    Ok(FetchedDocument {
        title,
        venue,
        raw_content,
    })
}

pub fn extract_title(document: &Html) -> Option<String> {
    document
        .select(&TITLE)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// Text nodes under `<body>`, entities decoded. Comments are not text nodes.
fn body_text(document: &Html) -> String {
    let root = document
        .select(&BODY)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut text = String::new();
    for node in root.descendants() {
        let Node::Text(chunk) = node.value() else {
            continue;
        };
        let skipped = node
            .parent()
            .and_then(|parent| parent.value().as_element().map(|el| el.name()))
            .is_some_and(|name| SKIPPED.iter().any(|s| *s == name));
        if !skipped {
            text.push_str(chunk);
            text.push(' ');
        }
    }
    collapse_whitespace(&text)
}

fn collapse_whitespace(s: &str) -> String {
    RE_SPACE.replace_all(s, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head>
        <title>
          Sparse Attention at Scale
        </title>
        <meta name="citation_conference_title" content="NeurIPS 2025">
        <style>body { color: red; }</style>
        </head><body><h1>Abstract</h1><p>We leave   open the question of data.</p>
        <script>var x = 1;</script></body></html>"#;

    fn title_of(html: &str) -> Option<String> {
        extract_title(&Html::parse_document(html))
    }

    #[test]
    fn test_extract_title() {
        assert_eq!(
            title_of(PAGE).as_deref(),
            Some("Sparse Attention at Scale")
        );
        assert_eq!(title_of("<p>no title</p>"), None);
        assert_eq!(title_of("<title>  </title>"), None);
    }

    #[test]
    fn test_entities_are_decoded_and_comments_dropped() {
        let html = "<html><head><title>Data &amp; Compute Gaps</title></head><body>\
                    <!-- <title>x</title> --><p>a&lt;b &eacute;</p></body></html>";
        let doc = parse_document("https://example.org/p/2", html).unwrap();
        assert_eq!(doc.title, "Data & Compute Gaps");
        assert_eq!(doc.raw_content, "a<b \u{e9}");
    }

    #[test]
    fn test_parse_document() {
        let doc = parse_document("https://example.org/p/1", PAGE).unwrap();
        assert_eq!(doc.title, "Sparse Attention at Scale");
        assert_eq!(doc.venue.as_deref(), Some("NeurIPS 2025"));
        assert!(doc.raw_content.contains("We leave open the question of data."));
        assert!(!doc.raw_content.contains("color: red"));
        assert!(!doc.raw_content.contains("var x"));
    }

    #[test]
    fn test_plain_text_falls_back_to_url_title() {
        let doc = parse_document("https://example.org/p.txt", "just text").unwrap();
        assert_eq!(doc.title, "https://example.org/p.txt");
        assert_eq!(doc.raw_content, "just text");
        assert!(doc.venue.is_none());
    }

    #[test]
    fn test_empty_body_is_an_error() {
        assert_eq!(
            parse_document("https://example.org", "<html> </html>"),
            Err(FetchError::EmptyContent)
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_transient_request_error() {
        let fetcher = HttpFetcher::new(Duration::from_secs(2)).unwrap();
        let err = fetcher.fetch("http://127.0.0.1:1/paper").await.unwrap_err();
        assert!(matches!(err, FetchError::Request(_)), "{:?}", err);
        assert!(err.is_transient());
    }
}
