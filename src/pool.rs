//! Shared credential pool
//!
//! A single pool instance arbitrates the whole credential set for every
//! concurrent fetch worker. Each (token, method) pair carries its own use
//! counter and health flag; health only ever goes down: once the upstream
//! signals quota exhaustion for a pair it stays unusable for the lifetime
//! of the process. The pool is an explicit shared service handed around as
//! `Arc<CredentialPool>`, never a global.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

/// Errors produced by the credential pool
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No healthy credentials remain for method '{0}'")]
    Exhausted(String),
}

/// Default number of acquisitions between snapshot dumps
pub const DEFAULT_DUMP_EVERY: u64 = 10;

/// Per-(token, method) state
#[derive(Debug, Clone, Serialize)]
pub struct MethodState {
    pub uses: u64,
    pub healthy: bool,
}

impl Default for MethodState {
    fn default() -> Self {
        Self {
            uses: 0,
            healthy: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct Snapshot<'a> {
    config_hash: Option<&'a str>,
    tokens: &'a BTreeMap<String, BTreeMap<String, MethodState>>,
}

#[derive(Debug)]
struct PoolInner {
    /// token -> method -> state; a missing method entry means "healthy,
    /// never used"
    tokens: BTreeMap<String, BTreeMap<String, MethodState>>,
    acquisitions: u64,
}

/// Quota-aware arbiter of a finite credential set
#[derive(Debug)]
pub struct CredentialPool {
    inner: Mutex<PoolInner>,
    snapshot_path: Option<PathBuf>,
    dump_every: u64,
    config_hash: Option<String>,
}

impl CredentialPool {
    /// Creates a pool over the given tokens
    ///
    /// When `snapshot_path` is set, every `dump_every`-th successful
    /// acquisition writes a best-effort JSON dump of the whole pool state
    /// for observability; dump failures are logged and never propagated.
    pub fn new(
        tokens: Vec<String>,
        snapshot_path: Option<PathBuf>,
        dump_every: u64,
        config_hash: Option<String>,
    ) -> Self {
        let tokens = tokens
            .into_iter()
            .map(|token| (token, BTreeMap::new()))
            .collect();
        Self {
            inner: Mutex::new(PoolInner {
                tokens,
                acquisitions: 0,
            }),
            snapshot_path,
            dump_every: dump_every.max(1),
            config_hash,
        }
    }

    /// Picks a token healthy for `method`, uniformly at random
    ///
    /// Increments the pair's use counter on success. Fails with
    /// [`PoolError::Exhausted`] once every token has been reported for the
    /// method.
    pub fn acquire(&self, method: &str) -> Result<String, PoolError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let candidates: Vec<String> = inner
            .tokens
            .iter()
            .filter(|(_, methods)| methods.get(method).map_or(true, |state| state.healthy))
            .map(|(token, _)| token.clone())
            .collect();

        use rand::seq::IndexedRandom;
        let token = candidates
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| PoolError::Exhausted(method.to_string()))?;

        if let Some(methods) = inner.tokens.get_mut(&token) {
            methods
                .entry(method.to_string())
                .or_insert_with(MethodState::default)
                .uses += 1;
        }

        inner.acquisitions += 1;
        if inner.acquisitions % self.dump_every == 0 {
            self.dump(&inner);
        }

        Ok(token)
    }

    /// Permanently marks (token, method) unhealthy
    ///
    /// Models the upstream signalling "quota exhausted" or "credential
    /// revoked for this capability". Health never recovers within the
    /// process lifetime.
    pub fn report(&self, token: &str, method: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(methods) = inner.tokens.get_mut(token) {
            let state = methods
                .entry(method.to_string())
                .or_insert_with(MethodState::default);
            state.healthy = false;
            tracing::warn!("Credential reported unhealthy for method '{}'", method);
        }
    }

    /// Number of tokens still healthy for `method`
    pub fn healthy_count(&self, method: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .tokens
            .values()
            .filter(|methods| methods.get(method).map_or(true, |state| state.healthy))
            .count()
    }

    /// Best-effort snapshot of `{token -> {method -> {uses, healthy}}}`
    fn dump(&self, inner: &PoolInner) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let snapshot = Snapshot {
            config_hash: self.config_hash.as_deref(),
            tokens: &inner.tokens,
        };
        let result = serde_json::to_vec_pretty(&snapshot)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(path, bytes));
        if let Err(e) = result {
            tracing::warn!("Failed to dump credential snapshot to {}: {}", path.display(), e);
        }
    }
}
