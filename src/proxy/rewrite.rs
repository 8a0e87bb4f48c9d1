//! Model-field rewriting for upstream response payloads.
//!
//! The gateway may swap the model name in a request before forwarding it, so
//! responses must carry the model the client originally declared. Two shapes
//! are handled:
//! - the top-level `model` field (chat-completion style)
//! - the nested `response.model` field (response-API style)
//!
//! No other fields are touched.

use axum::body::Bytes;
use serde_json::Value;

/// Overwrite `model` and `response.model` string fields with `client_model`.
///
/// Returns `true` when at least one field was a string and got rewritten.
/// Non-string or absent fields are left alone.
pub fn rewrite_model_fields(json: &mut Value, client_model: &str) -> bool {
    let mut rewritten = false;
    if matches!(json.get("model"), Some(Value::String(_))) {
        json["model"] = Value::String(client_model.to_string());
        rewritten = true;
    }
    if let Some(response) = json.get_mut("response") {
        if matches!(response.get("model"), Some(Value::String(_))) {
            response["model"] = Value::String(client_model.to_string());
            rewritten = true;
        }
    }
    rewritten
}

/// Rewrite model fields in a complete non-streaming JSON body.
///
/// Bodies that fail to parse are returned untouched; the caller forwards the
/// original bytes rather than dropping data.
pub fn rewrite_json_body(body: &Bytes, client_model: Option<&str>) -> Bytes {
    let Some(model) = client_model else {
        return body.clone();
    };
    let Ok(mut json) = serde_json::from_slice::<Value>(body) else {
        return body.clone();
    };
    if !rewrite_model_fields(&mut json, model) {
        return body.clone();
    }
    match serde_json::to_vec(&json) {
        Ok(bytes) => Bytes::from(bytes),
        Err(_) => body.clone(),
    }
}
