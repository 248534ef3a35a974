use duckpipe_core::{Error, Result, SearchRequest};
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://duckduckgo.com";

fn endpoint_from_env() -> Option<String> {
    std::env::var("DUCKPIPE_ENDPOINT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Upstream URL builders. Pure: no IO, one URL per request stage.
#[derive(Debug, Clone)]
pub struct Endpoints {
    base: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid url"),
        }
    }
}

impl Endpoints {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base.trim())
            .map_err(|e| Error::InvalidParams(format!("invalid endpoint {base:?}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::InvalidParams(format!(
                "endpoint must be http(s), got {}",
                base.scheme()
            )));
        }
        Ok(Self { base })
    }

    pub fn from_env() -> Result<Self> {
        match endpoint_from_env() {
            Some(s) => Self::new(&s),
            None => Ok(Self::default()),
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn at(&self, path: &str) -> Url {
        // Accept a base with or without a path prefix (e.g. a mirror under /ddg).
        let mut u = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        u.set_path(&format!("{prefix}{path}"));
        u.set_query(None);
        u.set_fragment(None);
        u
    }

    /// `GET /html/?q=…[&p=…][&s=…]`
    pub fn web_search_url(&self, req: &SearchRequest) -> Url {
        let mut u = self.at("/html/");
        {
            let mut qp = u.query_pairs_mut();
            qp.append_pair("q", &req.query);
            if let Some(p) = req.safe_search.upstream_param() {
                qp.append_pair("p", p);
            }
            if let Some(s) = req.offset() {
                qp.append_pair("s", &s.to_string());
            }
        }
        u
    }

    /// Landing page that embeds the `vqd` session token for the images endpoint.
    pub fn image_token_url(&self, query: &str) -> Url {
        let mut u = self.at("/");
        u.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("iax", "images")
            .append_pair("ia", "images");
        u
    }

    /// `GET /i.js` (JSON image results) authorized by `vqd`.
    pub fn image_results_url(&self, req: &SearchRequest, vqd: &str) -> Url {
        let mut u = self.at("/i.js");
        {
            let mut qp = u.query_pairs_mut();
            qp.append_pair("q", &req.query)
                .append_pair("o", "json")
                .append_pair("l", "us-en")
                .append_pair("vqd", vqd)
                .append_pair("f", ",,,,,");
            if let Some(p) = req.safe_search.upstream_param() {
                qp.append_pair("p", p);
            }
            if let Some(s) = req.offset() {
                qp.append_pair("s", &s.to_string());
            }
        }
        u
    }
}
