//! Upstream API collaborator
//!
//! The crawl core depends on one contract: give a method name, parameters
//! and a credential, get back a nested JSON envelope or a classified error.
//! Transport and auth details live behind the [`ApiClient`] trait; the
//! default HTTP implementation is in [`http`].

mod http;

pub use http::HttpApiClient;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Request parameters as sent to the upstream API
///
/// A `BTreeMap` keeps query rendering deterministic, which matters for
/// request matching in tests.
pub type Params = BTreeMap<String, Value>;

/// Upstream application error code signalling "quota exhausted for this
/// credential and method"
pub const CODE_QUOTA_EXHAUSTED: i64 = 29;

/// Upstream application error codes that are benign for a crawl: access
/// denied, banned/deleted entity, private profile, closed community
pub const CODES_PERMISSION_DENIED: [i64; 5] = [15, 18, 30, 201, 203];

/// Errors surfaced by the upstream API collaborator
#[derive(Debug, Error)]
pub enum ApiError {
    /// Benign, expected: the entity is private, banned or otherwise hidden.
    /// The owning alias degrades to an empty value.
    #[error("Upstream denied access (code {code}): {message}")]
    PermissionDenied { code: i64, message: String },

    /// The credential can no longer call this method. The caller must
    /// report the credential to the pool.
    #[error("Upstream quota exhausted (code {code}): {message}")]
    QuotaExhausted { code: i64, message: String },

    /// Any other application-level error
    #[error("Upstream error (code {code}): {message}")]
    Upstream { code: i64, message: String },

    /// The response parsed but did not have the expected shape
    #[error("Malformed upstream response: {0}")]
    Malformed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// True for failures that degrade an alias to "empty" without noise
    pub fn is_benign(&self) -> bool {
        matches!(self, ApiError::PermissionDenied { .. })
    }

    /// True when the credential used for the call must be reported
    pub fn is_quota(&self) -> bool {
        matches!(self, ApiError::QuotaExhausted { .. })
    }
}

/// Classifies an application error code from the upstream envelope
pub fn classify(code: i64, message: String) -> ApiError {
    if code == CODE_QUOTA_EXHAUSTED {
        ApiError::QuotaExhausted { code, message }
    } else if CODES_PERMISSION_DENIED.contains(&code) {
        ApiError::PermissionDenied { code, message }
    } else {
        ApiError::Upstream { code, message }
    }
}

/// The one contract the crawl core needs from the remote API
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Issues `method` with `params`, authenticated by `token`, and returns
    /// the full response envelope
    async fn call(&self, method: &str, params: &Params, token: &str) -> Result<Value, ApiError>;
}

/// Walks an extraction path into a response envelope
///
/// Each segment is an object key; a segment that parses as an integer
/// indexes into an array instead. The walk is deterministic and total over
/// a well-formed response; a shape mismatch yields [`ApiError::Malformed`]
/// and degrades only the owning alias.
pub fn extract(envelope: &Value, path: &[String]) -> Result<Value, ApiError> {
    let mut current = envelope;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment).ok_or_else(|| {
                ApiError::Malformed(format!("missing key '{}' in response", segment))
            })?,
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| {
                    ApiError::Malformed(format!("'{}' is not an array index", segment))
                })?;
                items.get(index).ok_or_else(|| {
                    ApiError::Malformed(format!("array index {} out of bounds", index))
                })?
            }
            other => {
                return Err(ApiError::Malformed(format!(
                    "cannot descend into '{}' at scalar {}",
                    segment, other
                )));
            }
        };
    }
    Ok(current.clone())
}
