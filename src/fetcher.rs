//! Per-entity fetch worker
//!
//! One worker executes a stage's resolved request set for a single id:
//! acquire a credential, issue the call, unwrap the payload along the
//! extraction path, and assemble everything into one record. Failures are
//! absorbed per alias: a denied or broken alias degrades to an omitted
//! field, never to a lost record. Skipping ids that are already stored is
//! the runner's job, not this module's.

use crate::api::{extract, ApiClient, ApiError};
use crate::config::{BoundRequest, ResolvedRequest};
use crate::pool::CredentialPool;
use crate::sample;
use crate::store::{EntityId, EntityType, FsStore, Record, RecordStore};
use crate::{Result, SeineError};
use serde_json::{json, Value};
use std::sync::Arc;

/// Fixed page size for list-relation enumeration
pub const PAGE_SIZE: u64 = 1000;

/// Sentinel target count meaning "enumerate everything"
pub const COUNT_ALL: i64 = -1;

/// Per-id fetch summary
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchReport {
    /// Aliases that produced a payload
    pub fetched: usize,
    /// Aliases that were omitted after a classified failure
    pub skipped: usize,
}

/// Executes resolved request sets against the upstream API
pub struct Fetcher<C: ApiClient> {
    client: Arc<C>,
    pool: Arc<CredentialPool>,
    store: Arc<FsStore>,
}

impl<C: ApiClient> Fetcher<C> {
    pub fn new(client: Arc<C>, pool: Arc<CredentialPool>, store: Arc<FsStore>) -> Self {
        Self {
            client,
            pool,
            store,
        }
    }

    /// Fetches every alias for one id and persists the assembled record
    ///
    /// The record is saved even when aliases failed: partial data is still
    /// data, and the runner's cache check keeps the id from being fetched
    /// again this run.
    pub async fn fetch_entity(
        &self,
        entity: EntityType,
        id: EntityId,
        requests: &[ResolvedRequest],
    ) -> Result<FetchReport> {
        let mut record = Record::new();
        let mut report = FetchReport::default();

        for request in requests {
            let bound = request.bound(id);
            match self.run_alias(&bound).await {
                Ok(value) => {
                    record.insert(bound.field.clone(), value);
                    report.fetched += 1;
                }
                Err(SeineError::Api(e)) if e.is_benign() => {
                    tracing::debug!("Alias '{}' empty for {} {}: {}", bound.alias, entity, id, e);
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!("Alias '{}' failed for {} {}: {}", bound.alias, entity, id, e);
                    report.skipped += 1;
                }
            }
        }

        self.store.save(entity, id, &record)?;
        Ok(report)
    }

    /// Runs one alias, reporting the credential on quota exhaustion
    async fn run_alias(&self, request: &BoundRequest) -> Result<Value> {
        let token = self.pool.acquire(&request.method)?;

        let result = if request.paged {
            self.paged_items(request, &token).await
        } else {
            self.single(request, &token).await
        };

        match result {
            Err(SeineError::Api(e)) if e.is_quota() => {
                self.pool.report(&token, &request.method);
                Err(SeineError::Api(e))
            }
            other => other,
        }
    }

    async fn single(&self, request: &BoundRequest, token: &str) -> Result<Value> {
        let envelope = self
            .client
            .call(&request.method, &request.params, token)
            .await?;
        Ok(extract(&envelope, &request.extract)?)
    }

    /// Enumerates a list relation page by page, then down-samples
    ///
    /// The declared target count is read from the `count` parameter; the
    /// sentinel `-1` means "all" and is resolved by a preliminary probe of
    /// the envelope's total. Pages are concatenated and the result is
    /// sampled without replacement down to the target (a no-op when the
    /// list is already small enough).
    async fn paged_items(&self, request: &BoundRequest, token: &str) -> Result<Value> {
        let mut params = request.params.clone();
        let declared = params
            .remove("count")
            .and_then(|value| value.as_i64())
            .unwrap_or(COUNT_ALL);

        let target = if declared < 0 {
            self.probe_total(request, token).await?
        } else {
            declared as u64
        };

        let mut items: Vec<Value> = Vec::new();
        let mut offset = 0u64;
        while offset < target {
            let mut page_params = params.clone();
            page_params.insert("count".to_string(), json!(PAGE_SIZE));
            page_params.insert("offset".to_string(), json!(offset));

            let envelope = self
                .client
                .call(&request.method, &page_params, token)
                .await?;
            let page = extract(&envelope, &request.extract)?;
            let page_items = page.as_array().ok_or_else(|| {
                ApiError::Malformed(format!("paged alias '{}' did not yield a list", request.alias))
            })?;

            let page_len = page_items.len();
            items.extend_from_slice(page_items);
            if (page_len as u64) < PAGE_SIZE {
                // Upstream ran out before the declared target
                break;
            }
            offset += PAGE_SIZE;
        }

        Ok(Value::Array(sample::take(items, target as usize)))
    }

    /// Resolves the true relation total with a one-item page
    ///
    /// Paged envelopes carry a `count` total as a sibling of their items
    /// list, so the probe path is the extraction path with its last
    /// segment swapped for `count`.
    async fn probe_total(&self, request: &BoundRequest, token: &str) -> Result<u64> {
        let mut params = request.params.clone();
        params.insert("count".to_string(), json!(1));
        params.insert("offset".to_string(), json!(0));

        let envelope = self.client.call(&request.method, &params, token).await?;

        let mut count_path = request.extract.clone();
        count_path.pop();
        count_path.push("count".to_string());

        let total = extract(&envelope, &count_path)?;
        total.as_u64().ok_or_else(|| {
            SeineError::Api(ApiError::Malformed(format!(
                "paged alias '{}' has a non-numeric total",
                request.alias
            )))
        })
    }
}
