use duckpipe_core::{ConfigSource, Error, NoConfig, Result, ToolReporter};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod download;
pub mod extract;
pub mod headers;
pub mod rate_limit;
pub mod request;
pub mod tools;

pub use config::{EnvConfig, ToolSettings};
pub use rate_limit::RateLimiter;
pub use request::Endpoints;
pub use tools::{DuckDuckGoTools, SearchArgs};

/// Default reporter: status lines go to `info`, warnings to `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ToolReporter for TracingReporter {
    fn status(&self, msg: &str) {
        tracing::info!(target: "duckpipe::status", "{msg}");
    }

    fn warn(&self, msg: &str) {
        tracing::warn!(target: "duckpipe::status", "{msg}");
    }
}

/// Everything the host hands a single tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    pub reporter: Arc<dyn ToolReporter>,
    pub cancel: CancellationToken,
    pub config: Arc<dyn ConfigSource>,
    /// Where image downloads land. `None` disables downloading.
    pub working_dir: Option<PathBuf>,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            reporter: Arc::new(TracingReporter),
            cancel: CancellationToken::new(),
            config: Arc::new(NoConfig),
            working_dir: None,
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ToolReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_config(mut self, config: Arc<dyn ConfigSource>) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn status(&self, msg: &str) {
        self.reporter.status(msg);
    }

    pub fn warn(&self, msg: &str) {
        self.reporter.warn(msg);
    }
}

/// Race `fut` against the invocation's cancellation token.
pub async fn run_cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        r = fut => r,
    }
}

pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        // Avoid "hang forever" on DNS/TLS/body stalls.
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Http(e.to_string()))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use std::sync::Mutex;

    /// Captures status/warning lines so tests can assert on them.
    #[derive(Debug, Default)]
    pub struct RecordingReporter {
        pub statuses: Mutex<Vec<String>>,
        pub warnings: Mutex<Vec<String>>,
    }

    impl RecordingReporter {
        pub fn warnings(&self) -> Vec<String> {
            self.warnings.lock().unwrap().clone()
        }

        pub fn statuses(&self) -> Vec<String> {
            self.statuses.lock().unwrap().clone()
        }
    }

    impl ToolReporter for RecordingReporter {
        fn status(&self, msg: &str) {
            self.statuses.lock().unwrap().push(msg.to_string());
        }

        fn warn(&self, msg: &str) {
            self.warnings.lock().unwrap().push(msg.to_string());
        }
    }

    pub async fn serve(app: axum::Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}
