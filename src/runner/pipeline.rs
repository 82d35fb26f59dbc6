//! Stage orchestration
//!
//! The pipeline drives declared stages in order. For each stage it
//! resolves the id set, fetches only the ids missing from the store,
//! verifies the full set, and re-checks the store for ids that vanished
//! while verification ran. A vanished id means another actor (or the
//! verifier's own corrupt-record eviction) invalidated durable state mid
//! stage, so the stage restarts from its missing-set computation, a
//! bounded number of times.
//!
//! Phases form a strict barrier: a stage's fetch pool drains fully before
//! verification starts, and verification drains before the next stage.

use crate::api::ApiClient;
use crate::config::{resolve_plan, Config, StageDecl, StagePlan};
use crate::fetcher::Fetcher;
use crate::pool::CredentialPool;
use crate::runner::{StageOutcome, StagePhase, StageStats};
use crate::sample;
use crate::store::{EntityId, EntityType, FsStore, RecordStore};
use crate::verify::{verify, VerifyThresholds};
use crate::{ConfigError, Result, SeineError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Runs the declared stages over shared workers, store and credentials
pub struct Pipeline<C: ApiClient + 'static> {
    config: Config,
    plan: Vec<StagePlan>,
    store: Arc<FsStore>,
    fetcher: Arc<Fetcher<C>>,
    thresholds: VerifyThresholds,
    outcomes: HashMap<String, StageOutcome>,
}

impl<C: ApiClient + 'static> Pipeline<C> {
    /// Builds a pipeline: resolves the stage plan, opens the store and
    /// creates the shared credential pool
    pub fn new(config: Config, client: Arc<C>, config_hash: Option<String>) -> Result<Self> {
        let plan = resolve_plan(&config)?;
        let store = Arc::new(FsStore::open(&config.store.root)?);

        let pool = Arc::new(CredentialPool::new(
            config.credentials.tokens.clone(),
            config.credentials.snapshot_path.clone().map(Into::into),
            config.credentials.dump_every,
            config_hash,
        ));
        let fetcher = Arc::new(Fetcher::new(client, pool, Arc::clone(&store)));
        let thresholds = config.verify.clone();

        Ok(Self {
            config,
            plan,
            store,
            fetcher,
            thresholds,
            outcomes: HashMap::new(),
        })
    }

    /// Runs every stage to completion, in declaration order
    pub async fn run(&mut self) -> Result<()> {
        let plans = self.plan.clone();
        for stage in &plans {
            let outcome = self.run_stage(stage).await?;
            tracing::info!(
                "Stage '{}' completed: {}/{} verified ({} cached, {} fetched, {} restarts) in {:.1?}",
                stage.decl.name,
                outcome.stats.verified,
                outcome.stats.total,
                outcome.stats.cached,
                outcome.stats.fetched,
                outcome.stats.restarts,
                outcome.stats.elapsed,
            );
            self.outcomes.insert(stage.decl.name.clone(), outcome);
        }
        Ok(())
    }

    /// A completed stage's outputs (raw and verified id sets)
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes.get(stage)
    }

    async fn run_stage(&self, stage: &StagePlan) -> Result<StageOutcome> {
        let entity = stage.decl.entity;
        let name = &stage.decl.name;
        tracing::info!("Stage '{}': {:?}", name, StagePhase::Pending);

        let ids = self.resolve_ids(&stage.decl)?;
        let requests = Arc::new(stage.requests.clone());
        let start = Instant::now();
        let mut restarts = 0u32;

        loop {
            tracing::debug!("Stage '{}': {:?}", name, StagePhase::Fetching);

            // Never re-fetch an id the store already knows
            let known = self.store.discover(entity)?;
            let missing: Vec<EntityId> = ids.difference(&known).copied().collect();
            let cached = ids.len() - missing.len();
            tracing::info!(
                "Stage '{}': {} {}s cached, {} to go",
                name,
                cached,
                entity,
                missing.len()
            );

            let fetched = self.run_fetch_pool(entity, &missing, &requests).await;

            tracing::debug!("Stage '{}': {:?}", name, StagePhase::Verifying);
            let before = self.store.discover(entity)?;
            let verified = self.run_verify_pool(entity, &ids).await;
            let after = self.store.discover(entity)?;

            if before.iter().any(|id| !after.contains(id)) {
                restarts += 1;
                tracing::warn!(
                    "Stage '{}': store race detected, restarting ({}/{})",
                    name,
                    restarts,
                    self.config.runner.max_stage_retries
                );
                if restarts > self.config.runner.max_stage_retries {
                    return Err(SeineError::RetriesExhausted {
                        stage: name.clone(),
                        retries: restarts,
                    });
                }
                continue;
            }

            tracing::debug!("Stage '{}': {:?}", name, StagePhase::Completed);
            let stats = StageStats {
                total: ids.len(),
                cached,
                fetched,
                verified: verified.len(),
                restarts,
                elapsed: start.elapsed(),
            };
            return Ok(StageOutcome {
                entity,
                raw: ids,
                verified,
                stats,
            });
        }
    }

    /// Resolves the stage's id set: literal seeds or frontier expansion
    /// from an earlier stage's raw or verified output
    fn resolve_ids(&self, decl: &StageDecl) -> Result<HashSet<EntityId>> {
        let Some(spec) = &decl.sample else {
            return Ok(decl.ids.iter().copied().collect());
        };

        let source = self
            .outcomes
            .get(&spec.from)
            .ok_or_else(|| ConfigError::UnknownStage {
                from: decl.name.clone(),
                to: spec.from.clone(),
            })?;
        let source_ids = if spec.only_verified {
            &source.verified
        } else {
            &source.raw
        };

        let frontier = sample::expand(
            self.store.as_ref(),
            source.entity,
            decl.entity,
            spec.count,
            source_ids,
            spec.per_entity,
        )?;
        tracing::info!(
            "Stage '{}': expanded {} {}s into {} {}s",
            decl.name,
            source_ids.len(),
            source.entity,
            frontier.len(),
            decl.entity
        );
        Ok(frontier)
    }

    /// Dispatches the fetcher over the missing ids, bounded by the fetch
    /// pool width; returns how many fetches completed
    ///
    /// Workers are independent and unordered. A failed or panicked worker
    /// is logged and never aborts the stage.
    async fn run_fetch_pool(
        &self,
        entity: EntityType,
        missing: &[EntityId],
        requests: &Arc<Vec<crate::config::ResolvedRequest>>,
    ) -> usize {
        let semaphore = Arc::new(Semaphore::new(self.config.runner.fetch_workers));
        let mut workers: JoinSet<(EntityId, Result<crate::fetcher::FetchReport>)> = JoinSet::new();

        for &id in missing {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let fetcher = Arc::clone(&self.fetcher);
            let requests = Arc::clone(requests);
            workers.spawn(async move {
                let _permit = permit;
                let result = fetcher.fetch_entity(entity, id, &requests).await;
                (id, result)
            });
        }

        let mut fetched = 0usize;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((id, Ok(report))) => {
                    fetched += 1;
                    tracing::debug!(
                        "Fetched {} {}: {} aliases, {} skipped",
                        entity,
                        id,
                        report.fetched,
                        report.skipped
                    );
                }
                Ok((id, Err(e))) => {
                    tracing::warn!("Fetch for {} {} failed: {}", entity, id, e);
                }
                Err(e) => {
                    tracing::error!("Fetch worker panicked: {}", e);
                }
            }
        }
        fetched
    }

    /// Verifies the full id set on the blocking pool, bounded by the
    /// verify pool width
    async fn run_verify_pool(&self, entity: EntityType, ids: &HashSet<EntityId>) -> HashSet<EntityId> {
        let ids: Vec<EntityId> = ids.iter().copied().collect();
        if ids.is_empty() {
            return HashSet::new();
        }

        let chunk_size = ids.len().div_ceil(self.config.runner.verify_workers).max(1);
        let mut workers: JoinSet<HashSet<EntityId>> = JoinSet::new();

        for chunk in ids.chunks(chunk_size) {
            let chunk = chunk.to_vec();
            let store = Arc::clone(&self.store);
            let thresholds = self.thresholds.clone();
            workers.spawn_blocking(move || {
                let mut passed = HashSet::new();
                for id in chunk {
                    match store.load(entity, id) {
                        Ok(record) => {
                            if verify(entity, &record, &thresholds) {
                                passed.insert(id);
                            }
                        }
                        Err(e) => {
                            // Corrupt records are evicted by the load and
                            // surface as a race in the caller's re-check
                            tracing::debug!("{} {} not verifiable: {}", entity, id, e);
                        }
                    }
                }
                passed
            });
        }

        let mut verified = HashSet::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(passed) => verified.extend(passed),
                Err(e) => tracing::error!("Verify worker panicked: {}", e),
            }
        }
        verified
    }
}
