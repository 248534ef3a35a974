use duckpipe_core::ToolOutput;
use rmcp::model::{CallToolResult, Content};

pub(crate) fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(super::SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
}

/// Object form of a structured output. Messages have none.
pub(crate) fn structured_payload(out: &ToolOutput) -> Option<serde_json::Value> {
    match out {
        ToolOutput::Links { links, count } => Some(serde_json::json!({
            "links": links,
            "count": count,
        })),
        ToolOutput::Images(items) => Some(serde_json::json!({
            "images": items,
            "count": items.len(),
        })),
        ToolOutput::Message(_) => None,
    }
}

/// `content[0].text` is always the tool's own output (JSON or the plain string), so
/// text-only clients see exactly what the tool returned. Structured outputs also carry
/// `structured_content` with envelope fields for machine consumers.
pub(crate) fn tool_result(out: &ToolOutput, kind: &str, elapsed_ms: u128) -> CallToolResult {
    let text = out.to_text();
    match structured_payload(out) {
        Some(mut payload) => {
            add_envelope_fields(&mut payload, kind, elapsed_ms);
            let mut r = CallToolResult::structured(payload);
            r.content = vec![Content::text(text)];
            r
        }
        None if out.is_error() => CallToolResult::error(vec![Content::text(text)]),
        None => CallToolResult::success(vec![Content::text(text)]),
    }
}
