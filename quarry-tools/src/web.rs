//! Web backends: search and page scraping.
//!
//! Lightweight web access that works without browser automation.
//! - [`DuckDuckGoRetriever`]: search via DuckDuckGo instant answers (no API key).
//! - [`HttpScraper`]: fetch a URL and extract readable text, title and images.

use async_trait::async_trait;
use quarry_core::config::{RetrievalConfig, ScraperConfig};
use quarry_core::error::{RetrieverError, ScrapeError};
use quarry_core::research::{CandidateItem, ScrapedPage, Scraper, SourceRetriever};
use std::time::Duration;
use tracing::debug;
use url::Url;

const DUCKDUCKGO_ENDPOINT: &str = "https://api.duckduckgo.com/";

// ---------------------------------------------------------------------------
// DuckDuckGoRetriever
// ---------------------------------------------------------------------------

/// Search the web using the DuckDuckGo instant answers API.
///
/// Collects the abstract link, related topics (including grouped topics) and
/// direct results. Domain restrictions are sent as `site:` terms and also
/// enforced on the returned URLs.
pub struct DuckDuckGoRetriever {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
}

impl DuckDuckGoRetriever {
    pub fn new(config: &RetrievalConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            endpoint: DUCKDUCKGO_ENDPOINT.to_string(),
            max_results: config.max_results_per_query.max(1),
        })
    }

    /// Point at a different instant-answer compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_url(&self, query: &str, domains: &[String]) -> String {
        format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            self.endpoint,
            urlencoding::encode(&scoped_query(query, domains))
        )
    }
}

#[async_trait]
impl SourceRetriever for DuckDuckGoRetriever {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(
        &self,
        query: &str,
        domains: &[String],
    ) -> Result<Vec<CandidateItem>, RetrieverError> {
        let response = self
            .client
            .get(self.request_url(query, domains))
            .send()
            .await
            .map_err(|e| RetrieverError::Request {
                backend: self.name().to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RetrieverError::Request {
                backend: self.name().to_string(),
                message: format!("HTTP {status}"),
            });
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| RetrieverError::ResponseParse {
                    backend: self.name().to_string(),
                    message: e.to_string(),
                })?;

        let items: Vec<CandidateItem> = parse_instant_answer(&body, self.name())
            .into_iter()
            .filter(|item| domain_allowed(&item.url, domains))
            .take(self.max_results)
            .collect();
        debug!(query, results = items.len(), "DuckDuckGo search complete");
        Ok(items)
    }
}

/// Append `site:` restrictions for a domain allowlist.
fn scoped_query(query: &str, domains: &[String]) -> String {
    let sites: Vec<String> = domains
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(|d| format!("site:{d}"))
        .collect();
    if sites.is_empty() {
        query.to_string()
    } else {
        format!("{query} ({})", sites.join(" OR "))
    }
}

/// Whether `url`'s host is one of `domains` or a subdomain of one. An empty
/// allowlist admits everything.
fn domain_allowed(url: &str, domains: &[String]) -> bool {
    if domains.is_empty() {
        return true;
    }
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase));
    let Some(host) = host else {
        return false;
    };
    domains.iter().any(|domain| {
        let domain = domain.trim().trim_start_matches("www.").to_ascii_lowercase();
        let host = host.trim_start_matches("www.");
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

/// Extract candidates from an instant-answer response body.
fn parse_instant_answer(body: &serde_json::Value, source: &str) -> Vec<CandidateItem> {
    let mut items = Vec::new();

    let abstract_url = body.get("AbstractURL").and_then(|v| v.as_str()).unwrap_or("");
    if !abstract_url.is_empty() {
        let heading = body.get("Heading").and_then(|v| v.as_str()).unwrap_or("");
        let snippet = body.get("AbstractText").and_then(|v| v.as_str()).unwrap_or("");
        items.push(CandidateItem {
            title: heading.to_string(),
            url: abstract_url.to_string(),
            snippet: snippet.to_string(),
            source: source.to_string(),
        });
    }

    for key in ["Results", "RelatedTopics"] {
        if let Some(entries) = body.get(key).and_then(|v| v.as_array()) {
            collect_topics(entries, source, &mut items);
        }
    }
    items
}

fn collect_topics(entries: &[serde_json::Value], source: &str, items: &mut Vec<CandidateItem>) {
    for entry in entries {
        // Grouped topics nest their entries one level down.
        if let Some(nested) = entry.get("Topics").and_then(|v| v.as_array()) {
            collect_topics(nested, source, items);
            continue;
        }
        let url = entry.get("FirstURL").and_then(|v| v.as_str()).unwrap_or("");
        let text = entry.get("Text").and_then(|v| v.as_str()).unwrap_or("");
        if url.is_empty() || text.is_empty() {
            continue;
        }
        let title = text.split(" - ").next().unwrap_or(text).trim();
        items.push(CandidateItem {
            title: title.to_string(),
            url: url.to_string(),
            snippet: text.to_string(),
            source: source.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// HttpScraper
// ---------------------------------------------------------------------------

/// Fetch a URL and extract readable text content.
///
/// HTML is stripped to text; plain text is returned as-is. Other content
/// types (PDFs, images, archives) are rejected.
pub struct HttpScraper {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpScraper {
    pub fn new(config: &ScraperConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            timeout: config.timeout(),
            max_body_bytes: config.max_body_bytes.max(1),
        })
    }

    /// Read the body chunk by chunk, stopping once `max_body_bytes` are in.
    async fn read_body(
        &self,
        url: &str,
        mut response: reqwest::Response,
    ) -> Result<String, ScrapeError> {
        let limit = self.max_body_bytes;
        let expected = response.content_length().unwrap_or(0) as usize;
        let mut body = Vec::with_capacity(expected.min(limit));
        while let Some(chunk) = response.chunk().await.map_err(|e| ScrapeError::Request {
            url: url.to_string(),
            message: format!("Failed to read response body: {e}"),
        })? {
            if !append_capped(&mut body, &chunk, limit) {
                debug!(url, limit, "Response body truncated at size limit");
                break;
            }
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Append as much of `chunk` as fits under `limit`. Returns `false` once
/// the buffer is full.
fn append_capped(body: &mut Vec<u8>, chunk: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(body.len());
    body.extend_from_slice(&chunk[..chunk.len().min(room)]);
    body.len() < limit
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn fetch(&self, url: &str) -> Result<ScrapedPage, ScrapeError> {
        let base = Url::parse(url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| ScrapeError::InvalidUrl {
                url: url.to_string(),
            })?;

        let response = self.client.get(base.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                ScrapeError::Timeout {
                    url: url.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                ScrapeError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let is_html =
            content_type.contains("text/html") || content_type.contains("application/xhtml");
        let is_text = content_type.is_empty() || content_type.starts_with("text/");
        if !is_html && !is_text {
            return Err(ScrapeError::UnsupportedContent {
                url: url.to_string(),
                content_type,
            });
        }

        let body = self.read_body(url, response).await?;

        Ok(if is_html {
            ScrapedPage {
                title: extract_title(&body).unwrap_or_default(),
                text: extract_text_from_html(&body),
                images: extract_image_urls(&body, &base),
            }
        } else {
            ScrapedPage {
                title: String::new(),
                text: body,
                images: Vec::new(),
            }
        })
    }
}

/// Simple HTML-to-text extraction.
///
/// Strips tags, drops script/style/noscript bodies and the document head,
/// and breaks lines at block elements.
pub fn extract_text_from_html(html: &str) -> String {
    let mut text = String::new();
    let mut in_tag = false;
    let mut skip_depth = 0usize;
    let mut tag_name = String::new();
    let mut building_tag = false;

    for ch in html.chars() {
        if ch == '<' {
            in_tag = true;
            building_tag = true;
            tag_name.clear();
            continue;
        }
        if ch == '>' && in_tag {
            in_tag = false;
            building_tag = false;

            let tag = tag_name.to_ascii_lowercase();
            let (closing, name) = match tag.strip_prefix('/') {
                Some(name) => (true, name),
                None => (false, tag.as_str()),
            };
            if matches!(name, "script" | "style" | "noscript" | "head") {
                if closing {
                    skip_depth = skip_depth.saturating_sub(1);
                } else {
                    skip_depth += 1;
                }
            }
            if is_block_element(name) {
                text.push('\n');
            }
            continue;
        }
        if in_tag {
            if building_tag && (ch.is_alphanumeric() || (ch == '/' && tag_name.is_empty())) {
                tag_name.push(ch);
            } else {
                building_tag = false;
            }
            continue;
        }
        if skip_depth > 0 {
            continue;
        }
        text.push(ch);
    }

    let text = decode_entities(&text);

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_block_element(name: &str) -> bool {
    matches!(
        name,
        "p" | "br"
            | "div"
            | "section"
            | "article"
            | "li"
            | "tr"
            | "td"
            | "blockquote"
            | "pre"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
    )
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Contents of the first `<title>` element.
pub fn extract_title(html: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `html`.
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;
    let title = decode_entities(html[start..end].trim());
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// Absolute `src` URLs of `<img>` tags, resolved against `base`, unique
/// and in document order. Inline `data:` images are skipped.
pub fn extract_image_urls(html: &str, base: &Url) -> Vec<String> {
    let lower = html.to_ascii_lowercase();
    let mut images: Vec<String> = Vec::new();
    let mut cursor = 0;
    while let Some(found) = lower[cursor..].find("<img") {
        let tag_start = cursor + found;
        let Some(tag_len) = lower[tag_start..].find('>') else {
            break;
        };
        let tag_end = tag_start + tag_len;
        cursor = tag_end + 1;

        let tag = &html[tag_start..tag_end];
        let Some(src) = attribute_value(tag, &lower[tag_start..tag_end], "src") else {
            continue;
        };
        if src.starts_with("data:") {
            continue;
        }
        if let Ok(resolved) = base.join(src) {
            let resolved = resolved.to_string();
            if !images.contains(&resolved) {
                images.push(resolved);
            }
        }
    }
    images
}

/// Quoted or bare value of `name=` inside one tag.
fn attribute_value<'a>(tag: &'a str, lower_tag: &str, name: &str) -> Option<&'a str> {
    let needle = format!(" {name}=");
    let pos = lower_tag.find(&needle)? + needle.len();
    let rest = &tag[pos..];
    let value = match rest.chars().next()? {
        quote @ ('"' | '\'') => {
            let inner = &rest[1..];
            &inner[..inner.find(quote)?]
        }
        _ => rest
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_end_matches('/'),
    };
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}
