//! Source Fetcher & Extractor (§4.1).

use crate::error::AppError;
use async_trait::async_trait;
use scraper::{Html, Node, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

/// Schemes and hosts that are never worth following.
const DROPPED_SCHEMES: &[&str] = &["mailto", "tel", "javascript", "whatsapp", "data", "file"];
const DEFAULT_SOCIAL_DENYLIST: &[&str] =
    &["facebook.com", "twitter.com", "x.com", "instagram.com", "linkedin.com", "tiktok.com"];

#[derive(Clone, Debug, Default)]
pub struct FetchResult {
    pub success: bool,
    pub url: String,
    pub normalized_url: Option<String>,
    pub text_content: Option<String>,
    pub hrefs: Vec<String>,
    pub title: Option<String>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

/// Normalize a URL: add a scheme if missing, lowercase the host, strip the
/// fragment, force a path of at least `/`, reject non-http(s) schemes.
pub fn normalize_url(raw: &str) -> Result<String, AppError> {
    let candidate = if raw.contains("://") { raw.to_string() } else { format!("https://{raw}") };

    let mut url = Url::parse(&candidate).map_err(|e| AppError::Validation(format!("invalid url {raw}: {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AppError::Validation(format!("unsupported scheme in {raw}")));
    }

    if let Some(host) = url.host_str() {
        let lowered = host.to_lowercase();
        url.set_host(Some(&lowered)).map_err(|e| AppError::Validation(e.to_string()))?;
    }

    url.set_fragment(None);
    if url.path().is_empty() {
        url.set_path("/");
    }

    Ok(url.to_string())
}

fn is_dropped_link(url: &Url, social_denylist: &[String]) -> bool {
    if DROPPED_SCHEMES.contains(&url.scheme()) {
        return true;
    }
    if let Some(host) = url.host_str() {
        if social_denylist.iter().any(|d| host.contains(d.as_str())) {
            return true;
        }
    }
    false
}

/// A rendered page as returned by a headless browser after it has navigated
/// and settled (network-idle). The real implementation drives an external
/// browser process; tests and local runs can substitute a fake.
pub struct RenderedPage {
    pub html: String,
    pub title: Option<String>,
    pub final_url: String,
    pub status_code: u16,
}

#[async_trait]
pub trait BrowserClient: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, AppError>;
}

/// Extract clean text (with outbound links annotated inline) and the
/// deduplicated outbound link set, with the normalized page URL at
/// position 0.
pub fn extract_text_and_links(html: &str, final_url: &str, normalized_page_url: &str, social_denylist: &[String]) -> (String, Vec<String>) {
    let document = Html::parse_document(html);
    let excluded = Selector::parse("script, style, meta, link, noscript, head")
        .unwrap_or_else(|_| Selector::parse("script").unwrap());
    let excluded_ids: HashSet<ego_tree::NodeId> = document.select(&excluded).map(|e| e.id()).collect();

    let base = Url::parse(final_url).ok();
    let mut text = String::new();
    collect_text(document.tree.root(), &excluded_ids, base.as_ref(), &mut text);

    let link_selector = Selector::parse("a, link, area").unwrap();
    let mut seen = HashSet::new();
    let mut hrefs = vec![normalized_page_url.to_string()];
    seen.insert(normalized_page_url.to_string());

    for el in document.select(&link_selector) {
        let Some(href) = el.value().attr("href") else { continue };
        if href.trim().is_empty() {
            continue;
        }
        let Some(resolved) = base.as_ref().and_then(|b| b.join(href).ok()) else { continue };
        if is_dropped_link(&resolved, social_denylist) {
            continue;
        }
        let s = resolved.to_string();
        if seen.insert(s.clone()) {
            hrefs.push(s);
        }
    }

    (normalize_whitespace(&text), hrefs)
}

/// Walk the tree in document order, appending text as encountered. An
/// anchor's own href marker is appended only after its children (its own
/// text) have been consumed, matching the reference extractor which appends
/// the marker as the anchor's last child rather than emitting it up front.
fn collect_text(node: ego_tree::NodeRef<'_, Node>, excluded_ids: &HashSet<ego_tree::NodeId>, base: Option<&Url>, text: &mut String) {
    if excluded_ids.contains(&node.id()) {
        return;
    }

    match node.value() {
        Node::Text(t) => text.push_str(t),
        Node::Element(el) if el.name() == "a" => {
            for child in node.children() {
                collect_text(child, excluded_ids, base, text);
            }
            if let Some(href) = el.attr("href") {
                let resolved =
                    base.and_then(|b| b.join(href).ok()).map(|u| u.to_string()).unwrap_or_else(|| href.to_string());
                text.push_str(&format!(" [{resolved}]"));
            }
        }
        _ => {
            for child in node.children() {
                collect_text(child, excluded_ids, base, text);
            }
        }
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fetch a batch of URLs with a bounded concurrency semaphore. Per-item
/// failures never abort the batch (§4.1, §5).
pub async fn fetch_urls(
    browser: Arc<dyn BrowserClient>,
    urls: Vec<String>,
    concurrency: usize,
    timeout: Duration,
    social_denylist: Vec<String>,
) -> Vec<FetchResult> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(urls.len());

    for url in urls {
        let browser = browser.clone();
        let semaphore = semaphore.clone();
        let social_denylist = social_denylist.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            fetch_one(browser, url, timeout, &social_denylist).await
        }));
    }

    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(result) => results.push(result),
            Err(join_err) => results.push(FetchResult {
                success: false,
                error: Some(format!("fetch task panicked: {join_err}")),
                ..Default::default()
            }),
        }
    }
    results
}

async fn fetch_one(browser: Arc<dyn BrowserClient>, url: String, timeout: Duration, social_denylist: &[String]) -> FetchResult {
    let normalized = match normalize_url(&url) {
        Ok(n) => n,
        Err(e) => {
            return FetchResult { success: false, url, error: Some(e.to_string()), ..Default::default() };
        }
    };

    match tokio::time::timeout(timeout, browser.render(&normalized)).await {
        Ok(Ok(page)) => {
            let (text_content, hrefs) = extract_text_and_links(&page.html, &page.final_url, &normalized, social_denylist);
            FetchResult {
                success: true,
                url: url.clone(),
                normalized_url: Some(normalized),
                text_content: Some(text_content),
                hrefs,
                title: page.title,
                status_code: Some(page.status_code),
                error: None,
            }
        }
        Ok(Err(e)) => FetchResult {
            success: false,
            url,
            normalized_url: Some(normalized),
            error: Some(e.to_string()),
            ..Default::default()
        },
        Err(_) => FetchResult {
            success: false,
            url,
            normalized_url: Some(normalized),
            error: Some("timed out".to_string()),
            ..Default::default()
        },
    }
}

/// Decode a file's bytes into text content based on its extension.
/// `.doc` requires an external office-suite conversion collaborator; when
/// none is configured, it is reported as an error for that file only.
pub fn extract_file_text(file_name: &str, bytes: &[u8]) -> Result<String, AppError> {
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "pdf" => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| AppError::Upstream(format!("pdf extraction failed for {file_name}: {e}"))),
        "docx" => {
            let text = docx_rs::read_docx(bytes)
                .map_err(|e| AppError::Upstream(format!("docx parse failed for {file_name}: {e:?}")))?;
            Ok(docx_plain_text(&text))
        }
        "doc" => Err(AppError::Upstream(format!(
            ".doc conversion collaborator not configured for {file_name}"
        ))),
        "txt" => Ok(String::from_utf8_lossy(bytes).to_string()),
        other => Err(AppError::Validation(format!("unsupported file extension .{other} for {file_name}"))),
    }
}

fn docx_plain_text(docx: &docx_rs::Docx) -> String {
    use docx_rs::DocumentChild;
    let mut out = String::new();
    for child in &docx.document.children {
        if let DocumentChild::Paragraph(p) = child {
            for run_child in &p.children {
                if let docx_rs::ParagraphChild::Run(run) = run_child {
                    for rc in &run.children {
                        if let docx_rs::RunChild::Text(t) = rc {
                            out.push_str(&t.text);
                        }
                    }
                }
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_scheme_and_strips_fragment() {
        let n = normalize_url("Example.com/Page#section").unwrap();
        assert_eq!(n, "https://example.com/Page");
    }

    #[test]
    fn normalize_rejects_non_http_schemes() {
        assert!(normalize_url("ftp://example.com").is_err());
    }

    #[test]
    fn normalize_forces_root_path() {
        let n = normalize_url("https://example.com").unwrap();
        assert_eq!(n, "https://example.com/");
    }

    #[test]
    fn link_filtering_drops_mailto_and_social() {
        let denylist: Vec<String> = DEFAULT_SOCIAL_DENYLIST.iter().map(|s| s.to_string()).collect();
        let mailto = Url::parse("mailto:a@b.com").unwrap();
        assert!(is_dropped_link(&mailto, &denylist));
        let social = Url::parse("https://twitter.com/someone").unwrap();
        assert!(is_dropped_link(&social, &denylist));
        let ok = Url::parse("https://example.com/about").unwrap();
        assert!(!is_dropped_link(&ok, &denylist));
    }

    #[test]
    fn extract_places_normalized_page_url_first() {
        let html = r#"<html><head><title>t</title></head><body><a href="/x">link</a></body></html>"#;
        let (_text, hrefs) = extract_text_and_links(html, "https://example.com/", "https://example.com/", &[]);
        assert_eq!(hrefs[0], "https://example.com/");
    }

    #[test]
    fn extract_appends_href_marker_after_the_anchors_own_text() {
        let html = r#"<html><body><p>Before <a href="/x">link text</a> After</p></body></html>"#;
        let (text, _) = extract_text_and_links(html, "https://example.com/", "https://example.com/", &[]);
        assert_eq!(text, "Before link text [https://example.com/x] After");
    }

    #[test]
    fn extract_skips_script_and_style_text() {
        let html = r#"<html><body><script>var x = 1;</script><style>.a{}</style><p>hello world</p></body></html>"#;
        let (text, _) = extract_text_and_links(html, "https://example.com/", "https://example.com/", &[]);
        assert!(text.contains("hello world"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn txt_file_decodes_lossy() {
        let text = extract_file_text("notes.txt", b"hello \xFF world").unwrap();
        assert!(text.starts_with("hello"));
    }
}
