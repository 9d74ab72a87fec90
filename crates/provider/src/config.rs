//! Endpoint configuration: which JSON-RPC URL serves which chain.

use retrace_core::error::{TracerError, TracerResult};
use url::Url;

/// Built-in chain id -> endpoint table, used when no URL is given explicitly.
pub const DEFAULT_ENDPOINTS: &[(u64, &str)] = &[(1, "http://127.0.0.1:8545")];

/// Default endpoint for `chain_id`.
pub fn default_rpc_url(chain_id: u64) -> TracerResult<&'static str> {
    DEFAULT_ENDPOINTS
        .iter()
        .find(|(id, _)| *id == chain_id)
        .map(|(_, url)| *url)
        .ok_or_else(|| TracerError::InvalidInput(format!("chain id {chain_id} not supported")))
}

/// Validates an endpoint string. Only `http` and `https` are accepted.
pub fn parse_endpoint(rpc_url: &str) -> TracerResult<Url> {
    if rpc_url.is_empty() {
        return Err(TracerError::InvalidInput("RPC URL must not be empty".into()));
    }

    let url = Url::parse(rpc_url)
        .map_err(|e| TracerError::InvalidInput(format!("invalid RPC URL {rpc_url}: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TracerError::InvalidInput(format!(
            "unsupported RPC scheme {other:?} in {rpc_url}"
        ))),
    }
}

/// Picks the explicit URL if present, otherwise the chain's default.
pub fn resolve_rpc_url(explicit: Option<&str>, chain_id: u64) -> TracerResult<String> {
    match explicit {
        Some(url) => parse_endpoint(url).map(|_| url.to_string()),
        None => default_rpc_url(chain_id).map(str::to_string),
    }
}
