//! Endpoint resolution for the backend API and the streaming endpoint.

use crate::error::{CoreError, Result};
use crate::types::Topic;
use std::path::Path;
use url::Url;

const DEFAULT_API_BASE: &str = "http://localhost:3000/api";
const DEFAULT_WS_BASE: &str = "ws://localhost:3000";
const STREAM_PATH: &str = "/api/ws";

/// Resolved base URLs for HTTP and WebSocket traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    api_base: String,
    ws_base: String,
}

impl Endpoints {
    /// Resolve from optional explicit API and WebSocket URLs.
    ///
    /// An explicit `ws://`/`wss://` URL wins. Any other explicit value is
    /// ignored and the WebSocket base is derived from the API host, with `wss`
    /// when the API is served over https.
    pub fn resolve(api_url: Option<&str>, ws_url: Option<&str>) -> Result<Self> {
        let api_base = match api_url {
            Some(raw) => normalize_api_base(raw)?,
            None => DEFAULT_API_BASE.to_string(),
        };

        let ws_base = match ws_url.filter(|raw| is_ws_url(raw)) {
            Some(raw) => raw.trim_end_matches('/').to_string(),
            None => api_url
                .and_then(|api| Url::parse(api).ok())
                .and_then(|u| derive_ws_base(&u))
                .unwrap_or_else(|| DEFAULT_WS_BASE.to_string()),
        };

        Ok(Self { api_base, ws_base })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn ws_base(&self) -> &str {
        &self.ws_base
    }

    /// HTTP snapshot endpoint used for the initial load and polling fallback.
    pub fn metrics_url(&self) -> String {
        format!("{}/metrics", self.api_base)
    }

    /// Topic-qualified stream URL, with `token` appended when one is given.
    pub fn stream_url(&self, topic: &Topic, token: Option<&str>) -> Result<String> {
        let raw = format!("{}{}", self.ws_base, STREAM_PATH);
        let mut url = Url::parse(&raw).map_err(|e| CoreError::InvalidUrl(format!("{raw}: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("topic", topic.as_str());
            if let Some(token) = token {
                query.append_pair("token", token);
            }
        }
        Ok(url.to_string())
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            ws_base: DEFAULT_WS_BASE.to_string(),
        }
    }
}

fn is_ws_url(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.starts_with("ws://") || lower.starts_with("wss://")
}

/// Normalize an absolute API URL so it matches the backend mount prefix.
///
/// Root path and bare `/api` become `/api/v1`; anything else is kept as-is
/// minus a trailing slash.
fn normalize_api_base(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw).map_err(|e| CoreError::InvalidUrl(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CoreError::InvalidUrl(raw.to_string()));
    }

    let path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() || path.eq_ignore_ascii_case("/api") {
        url.set_path("/api/v1");
        return Ok(url.to_string().trim_end_matches('/').to_string());
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn derive_ws_base(api: &Url) -> Option<String> {
    let scheme = if api.scheme() == "https" { "wss" } else { "ws" };
    let host = api.host_str()?;
    Some(match api.port() {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    })
}

/// Resolve the stream auth token.
///
/// Order: explicit override (environment), configured value, then the
/// credential file. Empty values are skipped; a missing file is not an error.
pub fn resolve_token(
    env_override: Option<String>,
    configured: Option<&str>,
    credential_file: Option<&Path>,
) -> Result<Option<String>> {
    if let Some(token) = env_override.filter(|t| !t.trim().is_empty()) {
        return Ok(Some(token.trim().to_string()));
    }
    if let Some(token) = configured.filter(|t| !t.trim().is_empty()) {
        return Ok(Some(token.trim().to_string()));
    }
    let Some(path) = credential_file else {
        return Ok(None);
    };
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let token = content.trim();
            Ok((!token.is_empty()).then(|| token.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
