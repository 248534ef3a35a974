use crate::headers::{apply_headers, random_headers};
use crate::{run_cancellable, ToolContext};
use duckpipe_core::{Error, ImageResult, Result};
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_EXTENSION: &str = "jpg";

pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

pub fn extension_from_url(raw_url: &str) -> Option<String> {
    let path = url::Url::parse(raw_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| raw_url.to_string());
    let file = path.rsplit('/').next()?;
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Caller-facing form of a local path: `/` separators, no Windows drive prefix.
pub fn display_path(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    let b = s.as_bytes();
    if b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':' {
        s[2..].to_string()
    } else {
        s
    }
}

fn now_epoch_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

async fn download_one(
    client: &reqwest::Client,
    url: &str,
    target_stem: PathBuf,
    ctx: &ToolContext,
) -> Result<PathBuf> {
    let rb = apply_headers(client.get(url), &random_headers());
    let (content_type, bytes) = run_cancellable(&ctx.cancel, async move {
        let resp = rb.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transport {
                stage: "image",
                status: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or(status.as_str())
                    .to_string(),
            });
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let bytes = resp.bytes().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok((content_type, bytes))
    })
    .await?;

    if bytes.is_empty() {
        return Err(Error::Http("empty response body".to_string()));
    }

    let ext = content_type
        .as_deref()
        .and_then(extension_from_content_type)
        .map(str::to_string)
        .or_else(|| extension_from_url(url))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
    let path = target_stem.with_extension(ext);

    // Never start a write for a call that has already been cancelled.
    if ctx.cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| Error::Io(format!("{}: {e}", path.display())))?;
    Ok(path)
}

/// Download every image concurrently into `dir`.
///
/// Files are named `<timestamp>-<index>.<ext>` with one timestamp shared by the whole
/// call and a 1-based index. Per-item failures become `ImageResult::Failed` and are
/// reported as warnings. An unusable `dir` fails every item the same way. Only
/// cancellation fails the call, after removing anything this call already wrote.
pub async fn download_images(
    client: &reqwest::Client,
    urls: &[String],
    dir: &Path,
    ctx: &ToolContext,
) -> Result<Vec<ImageResult>> {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        ctx.warn(&format!(
            "Cannot use download directory {}: {e}",
            dir.display()
        ));
        return Ok(urls
            .iter()
            .map(|url| ImageResult::Failed {
                source_url: url.clone(),
            })
            .collect());
    }

    let stamp = now_epoch_ms();
    let jobs = urls.iter().enumerate().map(|(i, url)| {
        let stem = dir.join(format!("{stamp}-{}", i + 1));
        async move { (url, download_one(client, url, stem, ctx).await) }
    });
    let outcomes = join_all(jobs).await;

    if ctx.cancel.is_cancelled() {
        for (_, r) in &outcomes {
            if let Ok(p) = r {
                let _ = tokio::fs::remove_file(p).await;
            }
        }
        return Err(Error::Cancelled);
    }

    let mut out = Vec::with_capacity(outcomes.len());
    for (url, r) in outcomes {
        match r {
            Ok(p) => {
                tracing::debug!(url = %url, path = %p.display(), "image saved");
                out.push(ImageResult::Saved {
                    source_url: url.clone(),
                    local_path: display_path(&p),
                });
            }
            Err(e) => {
                ctx.warn(&format!("Failed to download image {url}: {e}"));
                out.push(ImageResult::Failed {
                    source_url: url.clone(),
                });
            }
        }
    }
    Ok(out)
}
