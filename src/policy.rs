//! Model-resolution policy and credential extraction.
//!
//! A [`Policy`] is built once at startup and shared read-only across all
//! requests. It decides, per request, whether the client-declared model is
//! honored, mapped through an alias table, or overridden outright.

use std::collections::HashMap;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

/// Headers checked for a credential when `Authorization` is absent, in order.
const API_KEY_HEADERS: [&str; 6] = [
    "x-api-key",
    "api-key",
    "openai-api-key",
    "x-openai-api-key",
    "x-openai-key",
    "openai-key",
];

/// Immutable model-resolution policy. Constructed once, never mutated.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Alias map consulted in force mode when no forced model is set.
    pub model_map: HashMap<String, String>,
    /// Model that overrides every forced request when set.
    pub force_model: Option<String>,
    /// Credential that opts a caller into force mode.
    pub force_key: Option<String>,
    /// Apply force mode to every request regardless of credential.
    pub force_all: bool,
}

impl Policy {
    /// Whether force mode applies to a request presenting `credential`.
    pub fn forced(&self, credential: &str) -> bool {
        if self.force_all {
            return true;
        }
        match self.force_key.as_deref() {
            Some(key) if !key.is_empty() => credential == key,
            _ => false,
        }
    }

    /// Decide the model name sent upstream for one request.
    ///
    /// Outside force mode the client model passes through unchanged. In force
    /// mode the forced model wins, then the alias map, then the client model.
    pub fn resolve(&self, client_model: Option<&str>, credential: &str) -> Option<String> {
        if !self.forced(credential) {
            return client_model.map(String::from);
        }
        if let Some(model) = self.force_model.as_deref().filter(|m| !m.is_empty()) {
            return Some(model.to_string());
        }
        if let Some(mapped) = client_model.and_then(|m| self.model_map.get(m)) {
            return Some(mapped.clone());
        }
        client_model.map(String::from)
    }
}

/// Parse a `from=to,from=to` alias list. Entries missing either side are
/// skipped; surrounding whitespace is tolerated.
pub fn parse_model_map(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for part in raw.split(',') {
        let Some((from, to)) = part.split_once('=') else {
            continue;
        };
        let (from, to) = (from.trim(), to.trim());
        if !from.is_empty() && !to.is_empty() {
            map.insert(from.to_string(), to.to_string());
        }
    }
    map
}

/// Truthy values accepted for boolean flags: `1`, `true`, `yes` (any case).
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// Pull the caller's credential out of the request headers.
///
/// `Authorization` wins, with a case-insensitive `Bearer ` prefix stripped if
/// present. Otherwise the first present API-key style header is used.
/// Multi-valued headers are joined with `", "`. Returns the empty string when
/// nothing is present.
pub fn extract_credential(headers: &HeaderMap) -> String {
    if headers.contains_key(AUTHORIZATION) {
        let raw = join_values(headers, AUTHORIZATION.as_str());
        return strip_bearer(&raw).trim().to_string();
    }
    for name in API_KEY_HEADERS {
        if headers.contains_key(name) {
            return join_values(headers, name).trim().to_string();
        }
    }
    String::new()
}

/// Join every value of a header with `", "`, skipping non-UTF-8 values.
fn join_values(headers: &HeaderMap, name: &str) -> String {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Strip a leading case-insensitive `Bearer ` scheme, or return the input.
fn strip_bearer(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(prefix) = trimmed.get(..6) {
        if prefix.eq_ignore_ascii_case("bearer") {
            let rest = &trimmed[6..];
            if rest.starts_with(|c: char| c.is_ascii_whitespace()) {
                return rest.trim_start();
            }
        }
    }
    raw
}

/// Redact a credential for logging. Keeps just enough to correlate.
pub fn redact(token: &str) -> String {
    if token.is_empty() {
        return "(none)".to_string();
    }
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        let first = chars[0];
        let last = chars[chars.len() - 1];
        format!("{first}***{last}")
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}
