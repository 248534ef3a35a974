use crate::config::{resolve_page_size, resolve_safe_search, ToolSettings};
use crate::download::download_images;
use crate::extract::{extract_image_urls, extract_vqd, extract_web_links};
use crate::headers::{apply_headers, random_headers};
use crate::rate_limit::RateLimiter;
use crate::request::Endpoints;
use crate::{http_client, run_cancellable, ToolContext};
use duckpipe_core::{
    Error, Result, SafeSearch, SearchRequest, ToolOutput, MAX_PAGE,
    MAX_TOOL_PAGE_SIZE, NO_IMAGES, NO_WEB_PAGES,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Arguments of a single tool call, as the host passes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchArgs {
    pub query: String,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub safe_search: Option<SafeSearch>,
    #[serde(default)]
    pub page: Option<u32>,
}

impl SearchArgs {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// The two DuckDuckGo tools plus the state they share (HTTP client and rate limiter).
///
/// Clones share the same limiter, so one provider instance paces every call made
/// through it regardless of which tool issued the request.
#[derive(Debug, Clone)]
pub struct DuckDuckGoTools {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    endpoints: Endpoints,
    settle_delay: Duration,
}

impl DuckDuckGoTools {
    pub fn new(settings: ToolSettings) -> Result<Self> {
        Ok(Self {
            client: http_client(settings.timeout)?,
            limiter: Arc::new(RateLimiter::new(settings.min_interval)),
            endpoints: settings.endpoints,
            settle_delay: settings.settle_delay,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ToolSettings::from_env()?)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn search_request(&self, args: &SearchArgs, ctx: &ToolContext) -> Result<SearchRequest> {
        if let Some(n) = args.page_size {
            if !(1..=MAX_TOOL_PAGE_SIZE).contains(&n) {
                return Err(Error::InvalidParams(format!(
                    "page_size must be within 1..={MAX_TOOL_PAGE_SIZE}"
                )));
            }
        }
        if let Some(p) = args.page {
            if !(1..=MAX_PAGE).contains(&p) {
                return Err(Error::InvalidParams(format!(
                    "page must be within 1..={MAX_PAGE}"
                )));
            }
        }
        SearchRequest::new(
            args.query.trim(),
            resolve_page_size(args.page_size, ctx),
            resolve_safe_search(args.safe_search, ctx),
            args.page.unwrap_or(1),
        )
    }

    async fn get_text(&self, url: url::Url, stage: &'static str, ctx: &ToolContext) -> Result<String> {
        tracing::debug!(%url, stage, "GET");
        let rb = apply_headers(self.client.get(url), &random_headers());
        run_cancellable(&ctx.cancel, async move {
            let resp = rb.send().await.map_err(|e| Error::Http(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(Error::Transport {
                    stage,
                    status: status.as_u16(),
                    reason: status
                        .canonical_reason()
                        .unwrap_or(status.as_str())
                        .to_string(),
                });
            }
            resp.text().await.map_err(|e| Error::Http(e.to_string()))
        })
        .await
    }

    async fn pace(&self, ctx: &ToolContext) -> Result<()> {
        run_cancellable(&ctx.cancel, async {
            self.limiter.wait_if_needed().await;
            Ok(())
        })
        .await
    }

    fn finish(result: Result<ToolOutput>, ctx: &ToolContext) -> ToolOutput {
        match result {
            Ok(out) => out,
            Err(Error::Cancelled) => ToolOutput::from(Error::Cancelled),
            Err(e) => {
                ctx.warn(&format!("Error during search: {e}"));
                ToolOutput::from(e)
            }
        }
    }

    /// Web Search: one HTML request, regex extraction, `{ links, count }` or a message.
    pub async fn web_search(&self, args: SearchArgs, ctx: &ToolContext) -> ToolOutput {
        ctx.status("Initiating DuckDuckGo web search...");
        Self::finish(self.run_web_search(&args, ctx).await, ctx)
    }

    async fn run_web_search(&self, args: &SearchArgs, ctx: &ToolContext) -> Result<ToolOutput> {
        let req = self.search_request(args, ctx)?;
        self.pace(ctx).await?;
        let html = self
            .get_text(self.endpoints.web_search_url(&req), "search results", ctx)
            .await?;

        let links = extract_web_links(&html, req.results_per_page);
        if links.is_empty() {
            return Ok(ToolOutput::message(NO_WEB_PAGES));
        }
        ctx.status(&format!("Found {} web pages.", links.len()));
        Ok(ToolOutput::links(links))
    }

    /// Image Search: token page, settle delay, JSON results, then optional downloads.
    pub async fn image_search(&self, args: SearchArgs, ctx: &ToolContext) -> ToolOutput {
        ctx.status("Initiating DuckDuckGo image search...");
        Self::finish(self.run_image_search(&args, ctx).await, ctx)
    }

    async fn run_image_search(&self, args: &SearchArgs, ctx: &ToolContext) -> Result<ToolOutput> {
        let req = self.search_request(args, ctx)?;
        self.pace(ctx).await?;

        let landing = self
            .get_text(
                self.endpoints.image_token_url(&req.query),
                "initial response",
                ctx,
            )
            .await?;
        let vqd = extract_vqd(&landing).ok_or(Error::MissingToken)?;

        run_cancellable(&ctx.cancel, async {
            tokio::time::sleep(self.settle_delay).await;
            Ok(())
        })
        .await?;

        let body = self
            .get_text(
                self.endpoints.image_results_url(&req, &vqd),
                "image results",
                ctx,
            )
            .await?;
        let urls = extract_image_urls(&body, req.results_per_page)?;
        if urls.is_empty() {
            return Ok(ToolOutput::message(NO_IMAGES));
        }
        ctx.status(&format!("Found {} images.", urls.len()));

        let Some(dir) = ctx.working_dir.as_deref() else {
            return Ok(ToolOutput::Images(urls));
        };

        ctx.status("Downloading images...");
        let results = download_images(&self.client, &urls, dir, ctx).await?;
        let saved: Vec<String> = results
            .iter()
            .filter_map(|r| r.local_path().map(str::to_string))
            .collect();
        if saved.is_empty() {
            ctx.warn("All image downloads failed; returning image URLs instead.");
            return Ok(ToolOutput::Images(urls));
        }
        ctx.status(&format!("Downloaded {} images.", saved.len()));
        Ok(ToolOutput::Images(saved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{serve, RecordingReporter};
    use axum::{
        extract::{Query, State},
        http::{header, StatusCode},
        response::IntoResponse,
        routing::get,
        Router,
    };
    use duckpipe_core::{SearchResultLink, ABORTED};
    use std::collections::{BTreeMap, HashMap};
    use std::net::SocketAddr;
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

    fn tools_for(addr: SocketAddr) -> DuckDuckGoTools {
        DuckDuckGoTools::new(ToolSettings {
            endpoints: Endpoints::new(&format!("http://{addr}")).unwrap(),
            min_interval: Duration::from_millis(10),
            settle_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(10),
        })
        .unwrap()
    }

    fn anchor(target: &str, label: &str) -> String {
        format!(
            r#"<a class="result__a" href="//duckduckgo.com/l/?uddg={}&amp;rut=x">{label}</a>"#,
            urlencoding::encode(target)
        )
    }

    fn web_app(html: String, seen: Seen) -> Router {
        Router::new()
            .route(
                "/html/",
                get(
                    |State((html, seen)): State<(String, Seen)>,
                     Query(q): Query<HashMap<String, String>>| async move {
                        seen.lock().unwrap().push(q);
                        ([(header::CONTENT_TYPE, "text/html")], html)
                    },
                ),
            )
            .with_state((html, seen))
    }

    fn image_app(landing: &'static str, results: serde_json::Value, image_base: String) -> Router {
        let results = results.to_string().replace("{IMG}", &image_base);
        Router::new()
            .route("/", get(move || async move { landing }))
            .route(
                "/i.js",
                get(move |Query(q): Query<HashMap<String, String>>| {
                    let results = results.clone();
                    async move {
                        if q.get("vqd").map(String::as_str) != Some("4-777") {
                            return (StatusCode::FORBIDDEN, String::new()).into_response();
                        }
                        ([(header::CONTENT_TYPE, "application/json")], results).into_response()
                    }
                }),
            )
            .route(
                "/img/a.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![9u8, 9]) }),
            )
            .route("/img/gone.jpg", get(|| async { StatusCode::NOT_FOUND }))
    }

    const LANDING: &str = r#"<html><script>nrj('/d.js?q=cats&vqd="4-777"&p=1');</script></html>"#;

    #[tokio::test]
    async fn web_search_single_result_end_to_end() {
        let seen: Seen = Arc::default();
        let html = format!(
            "<html><body>{}</body></html>",
            anchor("https://cats.example.com/", "All about   cats")
        );
        let addr = serve(web_app(html, seen.clone())).await;
        let tools = tools_for(addr);

        let out = tools
            .web_search(
                SearchArgs {
                    query: "cats".to_string(),
                    page_size: Some(1),
                    page: Some(1),
                    ..SearchArgs::default()
                },
                &ToolContext::new(),
            )
            .await;

        assert_eq!(
            out,
            ToolOutput::Links {
                links: vec![SearchResultLink {
                    label: "All about cats".to_string(),
                    url: "https://cats.example.com/".to_string(),
                }],
                count: 1,
            }
        );
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            serde_json::json!({ "links": [["All about cats", "https://cats.example.com/"]], "count": 1 })
        );

        let q = seen.lock().unwrap()[0].clone();
        assert_eq!(q.get("q").map(String::as_str), Some("cats"));
        assert!(!q.contains_key("p"));
        assert!(!q.contains_key("s"));
    }

    #[tokio::test]
    async fn web_search_sends_offset_and_safe_search() {
        let seen: Seen = Arc::default();
        let addr = serve(web_app(anchor("https://a.example.com/", "A"), seen.clone())).await;
        let tools = tools_for(addr);
        let _ = tools
            .web_search(
                SearchArgs {
                    query: "cats".to_string(),
                    page_size: Some(3),
                    safe_search: Some(SafeSearch::Strict),
                    page: Some(4),
                },
                &ToolContext::new(),
            )
            .await;
        let q = seen.lock().unwrap()[0].clone();
        assert_eq!(q.get("p").map(String::as_str), Some("1"));
        assert_eq!(q.get("s").map(String::as_str), Some("9"));
    }

    #[tokio::test]
    async fn host_page_size_overrides_argument_in_request() {
        let seen: Seen = Arc::default();
        let html: String = (0..8)
            .map(|i| anchor(&format!("https://e{i}.example.com/"), "x"))
            .collect();
        let addr = serve(web_app(html, seen.clone())).await;
        let tools = tools_for(addr);

        let mut cfg = BTreeMap::new();
        cfg.insert("page_size".to_string(), "2".to_string());
        let ctx = ToolContext::new().with_config(Arc::new(cfg));
        let out = tools
            .web_search(
                SearchArgs {
                    query: "cats".to_string(),
                    page_size: Some(6),
                    page: Some(2),
                    ..SearchArgs::default()
                },
                &ctx,
            )
            .await;
        match out {
            ToolOutput::Links { count, .. } => assert_eq!(count, 2),
            other => panic!("unexpected output: {other:?}"),
        }
        // Offset is derived from the resolved page size, not the argument.
        let q = seen.lock().unwrap()[0].clone();
        assert_eq!(q.get("s").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn web_search_without_matches_returns_sentinel() {
        let addr = serve(web_app("<html>nothing</html>".to_string(), Arc::default())).await;
        let out = tools_for(addr)
            .web_search(SearchArgs::new("cats"), &ToolContext::new())
            .await;
        assert_eq!(out.as_message(), Some(NO_WEB_PAGES));
    }

    #[tokio::test]
    async fn http_error_is_reported_and_returned_as_string() {
        let app = Router::new().route("/html/", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let addr = serve(app).await;
        let rep = Arc::new(RecordingReporter::default());
        let ctx = ToolContext::new().with_reporter(rep.clone());
        let out = tools_for(addr).web_search(SearchArgs::new("cats"), &ctx).await;
        assert_eq!(
            out.as_message(),
            Some("Error: Failed to fetch search results: Service Unavailable")
        );
        assert_eq!(rep.warnings().len(), 1);
        assert_eq!(rep.statuses()[0], "Initiating DuckDuckGo web search...");
    }

    #[tokio::test]
    async fn invalid_arguments_never_hit_the_network() {
        let tools = DuckDuckGoTools::new(ToolSettings {
            endpoints: Endpoints::new("http://127.0.0.1:9").unwrap(),
            ..ToolSettings::default()
        })
        .unwrap();
        let ctx = ToolContext::new();
        for args in [
            SearchArgs::new("  "),
            SearchArgs {
                page_size: Some(11),
                ..SearchArgs::new("q")
            },
            SearchArgs {
                page: Some(0),
                ..SearchArgs::new("q")
            },
        ] {
            let out = tools.web_search(args, &ctx).await;
            assert!(out.as_message().unwrap().starts_with("Error: invalid params"));
        }
        assert_eq!(tools.rate_limiter().last_request(), None);
    }

    #[tokio::test]
    async fn cancellation_mid_request_returns_sentinel() {
        let app = Router::new().route(
            "/html/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "<html></html>"
            }),
        );
        let addr = serve(app).await;
        let rep = Arc::new(RecordingReporter::default());
        let ctx = ToolContext::new().with_reporter(rep.clone());
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let out = tools_for(addr).web_search(SearchArgs::new("cats"), &ctx).await;
        assert_eq!(out.as_message(), Some(ABORTED));
        assert!(rep.warnings().is_empty());
    }

    #[tokio::test]
    async fn both_tools_share_one_rate_limiter() {
        let seen: Seen = Arc::default();
        let addr = serve(web_app(anchor("https://a.example.com/", "A"), seen)).await;
        let tools = DuckDuckGoTools::new(ToolSettings {
            endpoints: Endpoints::new(&format!("http://{addr}")).unwrap(),
            min_interval: Duration::from_millis(300),
            settle_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(10),
        })
        .unwrap();
        let other = tools.clone();
        let ctx = ToolContext::new();

        let t0 = std::time::Instant::now();
        let _ = tools.web_search(SearchArgs::new("a"), &ctx).await;
        // The image tool fails fast on this fixture (no landing page), but still paces.
        let _ = other.image_search(SearchArgs::new("b"), &ctx).await;
        assert!(t0.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn image_search_returns_filtered_urls_without_working_dir() {
        let results = serde_json::json!({
            "results": [
                {"image": "https://img.example.com/a.webp"},
                {"image": "https://img.example.com/b.PNG"},
                {"image": "https://img.example.com/c.jpg"}
            ]
        });
        let addr = serve(image_app(LANDING, results, String::new())).await;
        let out = tools_for(addr)
            .image_search(SearchArgs::new("cats"), &ToolContext::new())
            .await;
        assert_eq!(
            out,
            ToolOutput::Images(vec![
                "https://img.example.com/b.PNG".to_string(),
                "https://img.example.com/c.jpg".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn image_search_with_no_usable_images_returns_sentinel() {
        let results = serde_json::json!({
            "results": [ {"image": "https://img.example.com/a.webp"} ]
        });
        let addr = serve(image_app(LANDING, results, String::new())).await;
        let out = tools_for(addr)
            .image_search(SearchArgs::new("cats"), &ToolContext::new())
            .await;
        assert_eq!(out.as_message(), Some("No images found for the query."));
    }

    #[tokio::test]
    async fn missing_token_is_a_hard_failure() {
        let addr = serve(image_app(
            "<html>no token</html>",
            serde_json::json!({ "results": [] }),
            String::new(),
        ))
        .await;
        let out = tools_for(addr)
            .image_search(SearchArgs::new("cats"), &ToolContext::new())
            .await;
        assert_eq!(out.as_message(), Some("Error: Unable to extract vqd token."));
    }

    #[tokio::test]
    async fn image_search_downloads_into_working_dir() {
        let results = serde_json::json!({
            "results": [
                {"image": "{IMG}/img/a.png"},
                {"image": "{IMG}/img/gone.jpg"}
            ]
        });
        // Bind first so the JSON can point back at the same server.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = image_app(LANDING, results, format!("http://{addr}"));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let tmp = tempfile::tempdir().unwrap();
        let rep = Arc::new(RecordingReporter::default());
        let ctx = ToolContext::new()
            .with_reporter(rep.clone())
            .with_working_dir(Some(tmp.path().join("downloads")));
        let out = tools_for(addr).image_search(SearchArgs::new("cats"), &ctx).await;

        let ToolOutput::Images(paths) = out else {
            panic!("unexpected output: {out:?}");
        };
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("-1.png"), "{}", paths[0]);
        assert!(!paths[0].contains('\\'));
        assert_eq!(std::fs::read(&paths[0]).unwrap(), vec![9u8, 9]);
        assert_eq!(rep.warnings().len(), 1);
    }

    #[tokio::test]
    async fn all_downloads_failing_falls_back_to_urls() {
        let results = serde_json::json!({
            "results": [ {"image": "{IMG}/img/gone.jpg"} ]
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let image_url = format!("http://{addr}/img/gone.jpg");
        let app = image_app(LANDING, results, format!("http://{addr}"));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let tmp = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new().with_working_dir(Some(tmp.path().to_path_buf()));
        let out = tools_for(addr).image_search(SearchArgs::new("cats"), &ctx).await;
        assert_eq!(out, ToolOutput::Images(vec![image_url]));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn uncreatable_working_dir_falls_back_to_urls() {
        let results = serde_json::json!({
            "results": [ {"image": "{IMG}/img/a.png"} ]
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let image_url = format!("http://{addr}/img/a.png");
        let app = image_app(LANDING, results, format!("http://{addr}"));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();
        let rep = Arc::new(RecordingReporter::default());
        let ctx = ToolContext::new()
            .with_reporter(rep.clone())
            .with_working_dir(Some(blocker.join("sub")));
        let out = tools_for(addr).image_search(SearchArgs::new("cats"), &ctx).await;
        assert_eq!(out, ToolOutput::Images(vec![image_url]));
        assert_eq!(rep.warnings().len(), 2);
    }

    #[tokio::test]
    async fn cancelling_image_search_writes_no_file() {
        let app = Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                LANDING
            }),
        );
        let addr = serve(app).await;
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new().with_working_dir(Some(tmp.path().to_path_buf()));
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let out = tools_for(addr).image_search(SearchArgs::new("cats"), &ctx).await;
        assert_eq!(out.as_message(), Some(ABORTED));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
