//! The bottom-up frontier sweep: the sole writer of calculation rows,
//! artifact bodies, and the frontier counter.
//!
//! A batch of requested numbers advances the frontier from wherever it
//! currently sits up to the batch's maximum, reusing one [`BigUint`]
//! accumulator across the whole climb rather than recomputing each `n!`
//! from scratch.

use factorial_bigint::BigUint;
use factorial_cache::Cache;
use factorial_db::{FrontierRepository, PipelineStore};
use factorial_storage::ArtifactStore;
use factorial_types::CalculationStatus;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("batch contained no valid numbers")]
    EmptyBatch,
    #[error("database error: {0}")]
    Db(#[from] factorial_db::DbError),
    #[error("artifact store error: {0}")]
    Storage(#[from] factorial_storage::StorageError),
}

/// Bounds how many batches this pipeline instance services concurrently;
/// per §5 this is sized to the hardware, independent of the number of
/// consumer tasks feeding it.
pub fn default_concurrency() -> usize {
    4 * std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

pub struct FactorialPipeline {
    db: Arc<dyn PipelineStore>,
    store: Arc<dyn ArtifactStore>,
    cache: Arc<dyn Cache>,
    max_factorial: u64,
    dispatch_limit: Arc<Semaphore>,
}

impl FactorialPipeline {
    pub fn new(
        db: Arc<dyn PipelineStore>,
        store: Arc<dyn ArtifactStore>,
        cache: Arc<dyn Cache>,
        max_factorial: u64,
    ) -> Self {
        FactorialPipeline {
            db,
            store,
            cache,
            max_factorial,
            dispatch_limit: Arc::new(Semaphore::new(default_concurrency())),
        }
    }

    /// Runs the full batch algorithm (§4.5.3) over already-parsed, in-range
    /// numbers. Per-number failures are caught, recorded as `failed`, and do
    /// not fail the batch: only the absence of any valid number, or an
    /// infrastructure error reading the frontier/max-request singletons, is
    /// fatal to the whole batch.
    pub async fn process_batch(&self, numbers: &[u64]) -> Result<(), PipelineError> {
        if numbers.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        let _permit = self.dispatch_limit.acquire().await.expect("semaphore never closed");

        let target = numbers.iter().copied().max().unwrap().min(self.max_factorial);

        if let Err(e) = self.db.set_if_greater(target).await {
            log::warn!("failed to update max-request counter for {target}: {e}");
        }

        let cur = FrontierRepository::get(&*self.db).await?;
        if cur <= target {
            self.sweep(cur, target).await;
        }

        for &n in numbers {
            if n > self.max_factorial {
                log::warn!("dropping out-of-range number {n} (max {})", self.max_factorial);
                continue;
            }
            match self.db.find(n).await {
                Ok(Some(record)) if record.status == CalculationStatus::Done => {}
                _ => self.single_number_path(n).await,
            }
        }

        Ok(())
    }

    /// Bottom-up climb from `cur` to `target` inclusive, sharing one
    /// accumulator across every step.
    async fn sweep(&self, cur: u64, target: u64) {
        let mut acc = if cur == 0 {
            BigUint::one()
        } else {
            match self.load_value(cur - 1).await {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("failed to seed sweep accumulator at {cur}: {e}; recomputing from scratch");
                    self.recompute_from_scratch(cur - 1).await
                }
            }
        };

        for i in cur..=target {
            if i > 0 {
                acc.mul_small(i);
            }

            let already_done = matches!(
                self.db.find(i).await,
                Ok(Some(record)) if record.status == CalculationStatus::Done
            );
            if already_done {
                continue;
            }

            if let Err(e) = self.finalize(i, &acc).await {
                log::warn!("failed to finalize {i}: {e}");
                if let Err(e) = self.db.set_status(i, CalculationStatus::Failed).await {
                    log::warn!("failed to mark {i} as failed: {e}");
                }
            }
        }
    }

    /// Reconciles one number left `!= done` after the sweep (frontier was
    /// already ahead of it, but its row is `failed` or missing).
    async fn single_number_path(&self, n: u64) {
        let mut acc = if n == 0 {
            BigUint::one()
        } else {
            match self.load_value(n - 1).await {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("failed to seed single-number accumulator at {n}: {e}; recomputing from scratch");
                    self.recompute_from_scratch(n - 1).await
                }
            }
        };
        if n > 0 {
            acc.mul_small(n);
        }

        if let Err(e) = self.finalize(n, &acc).await {
            log::warn!("failed to finalize {n} via single-number path: {e}");
            if let Err(e) = self.db.set_status(n, CalculationStatus::Failed).await {
                log::warn!("failed to mark {n} as failed: {e}");
            }
        }
    }

    /// Persists `i! == acc`: creates the row, uploads the artifact, and
    /// atomically commits the `done` status alongside the frontier advance.
    async fn finalize(&self, i: u64, acc: &BigUint) -> Result<(), PipelineError> {
        self.db.create(i).await?;

        let body = acc.to_decimal_string();
        let checksum = factorial_bigint::sha256_hex(&body);
        let size = body.len() as i64;

        let key = self.store.put(i, &body).await?;
        self.db.finalize_done(i, &key, &checksum, size, i + 1).await?;

        if self.cache.should_cache(i) {
            self.cache.set(i, &body).await;
        }
        Ok(())
    }

    /// Cache, then artifact store, then (last resort) recompute from zero.
    async fn load_value(&self, n: u64) -> Result<BigUint, PipelineError> {
        if self.cache.should_cache(n) {
            if let Ok(body) = self.cache.get(n).await {
                if !body.is_empty() {
                    if let Ok(v) = BigUint::from_decimal_str(&body) {
                        return Ok(v);
                    }
                }
            }
        }

        let key = factorial_storage::generate_key(n);
        let body = self.store.get(&key).await?;
        BigUint::from_decimal_str(&body)
            .map_err(|_| factorial_storage::StorageError::InvalidUtf8.into())
    }

    async fn recompute_from_scratch(&self, n: u64) -> BigUint {
        let mut acc = BigUint::one();
        for i in 1..=n {
            acc.mul_small(i);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorial_db::{CalculationRepository, DbError, MaxRequestRepository};
    use factorial_storage::LocalArtifactStore;
    use factorial_types::CalculationRecord;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn default_concurrency_is_a_multiple_of_available_parallelism() {
        let n = default_concurrency();
        assert!(n >= 4);
        assert_eq!(n % 4, 0);
    }

    /// In-memory double for the three repository tables plus the
    /// cross-table `finalize_done` commit, standing in for a live Postgres
    /// instance in the sweep's behavioral tests.
    #[derive(Default)]
    struct InMemoryStore {
        records: Mutex<HashMap<u64, CalculationRecord>>,
        max_request: Mutex<u64>,
        frontier: Mutex<u64>,
    }

    impl InMemoryStore {
        fn seed_done(&self, number: u64) {
            self.records.lock().unwrap().insert(
                number,
                CalculationRecord {
                    id: number as i64,
                    number,
                    status: CalculationStatus::Done,
                    artifact_key: factorial_storage::generate_key(number),
                    checksum: "seeded".to_string(),
                    size: 0,
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                },
            );
        }

        fn status_of(&self, number: u64) -> Option<CalculationStatus> {
            self.records.lock().unwrap().get(&number).map(|r| r.status)
        }
    }

    #[async_trait::async_trait]
    impl CalculationRepository for InMemoryStore {
        async fn create(&self, number: u64) -> Result<(), DbError> {
            self.records.lock().unwrap().entry(number).or_insert_with(|| CalculationRecord {
                id: number as i64,
                number,
                status: CalculationStatus::Calculating,
                artifact_key: String::new(),
                checksum: String::new(),
                size: 0,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            });
            Ok(())
        }

        async fn find(&self, number: u64) -> Result<Option<CalculationRecord>, DbError> {
            Ok(self.records.lock().unwrap().get(&number).cloned())
        }

        async fn set_status(&self, number: u64, status: CalculationStatus) -> Result<(), DbError> {
            match self.records.lock().unwrap().get_mut(&number) {
                Some(record) => {
                    record.status = status;
                    Ok(())
                }
                None => Err(DbError::NotFound(number)),
            }
        }
    }

    #[async_trait::async_trait]
    impl MaxRequestRepository for InMemoryStore {
        async fn get(&self) -> Result<u64, DbError> {
            Ok(*self.max_request.lock().unwrap())
        }

        async fn set_if_greater(&self, n: u64) -> Result<bool, DbError> {
            let mut max = self.max_request.lock().unwrap();
            if n > *max {
                *max = n;
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    #[async_trait::async_trait]
    impl FrontierRepository for InMemoryStore {
        async fn get(&self) -> Result<u64, DbError> {
            Ok(*self.frontier.lock().unwrap())
        }
    }

    #[async_trait::async_trait]
    impl factorial_db::PipelineStore for InMemoryStore {
        async fn finalize_done(
            &self,
            number: u64,
            artifact_key: &str,
            checksum: &str,
            size: i64,
            new_frontier: u64,
        ) -> Result<(), DbError> {
            let mut records = self.records.lock().unwrap();
            let record = records.get_mut(&number).ok_or(DbError::NotFound(number))?;
            record.status = CalculationStatus::Done;
            record.artifact_key = artifact_key.to_string();
            record.checksum = checksum.to_string();
            record.size = size;
            drop(records);

            let mut frontier = self.frontier.lock().unwrap();
            if new_frontier > *frontier {
                *frontier = new_frontier;
            }
            Ok(())
        }
    }

    struct NoCache;

    #[async_trait::async_trait]
    impl Cache for NoCache {
        fn should_cache(&self, _number: u64) -> bool {
            false
        }
        async fn get(&self, _number: u64) -> Result<String, factorial_cache::CacheError> {
            Ok(String::new())
        }
        async fn set(&self, _number: u64, _body: &str) {}
    }

    fn test_pipeline(store: Arc<InMemoryStore>, artifact_dir: &std::path::Path) -> FactorialPipeline {
        FactorialPipeline::new(
            store,
            Arc::new(LocalArtifactStore::new(artifact_dir)),
            Arc::new(NoCache),
            factorial_types::HARD_MAX_FACTORIAL,
        )
    }

    #[tokio::test]
    async fn sweep_from_empty_system_advances_frontier_past_the_requested_number() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::default());
        let pipeline = test_pipeline(store.clone(), dir.path());

        pipeline.process_batch(&[5]).await.unwrap();

        assert_eq!(FrontierRepository::get(&*store).await.unwrap(), 6);
        for n in 0..=5 {
            assert_eq!(store.status_of(n), Some(CalculationStatus::Done));
        }

        let five_factorial = store.records.lock().unwrap().get(&5).unwrap().artifact_key.clone();
        let body = LocalArtifactStore::new(dir.path()).get(&five_factorial).await.unwrap();
        assert_eq!(body, "120");
    }

    #[tokio::test]
    async fn already_done_number_is_not_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::default());
        store.seed_done(3);
        *store.frontier.lock().unwrap() = 4;
        let pipeline = test_pipeline(store.clone(), dir.path());

        pipeline.process_batch(&[3]).await.unwrap();

        let record = store.records.lock().unwrap().get(&3).unwrap().clone();
        assert_eq!(record.checksum, "seeded");
        assert_eq!(FrontierRepository::get(&*store).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn single_number_reconciliation_fills_a_gap_left_behind_the_frontier() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::default());
        // The frontier is already ahead of 3, but 3 itself never finished
        // (e.g. a prior attempt crashed after the frontier advanced).
        *store.frontier.lock().unwrap() = 4;
        let pipeline = test_pipeline(store.clone(), dir.path());

        pipeline.process_batch(&[3]).await.unwrap();

        assert_eq!(store.status_of(3), Some(CalculationStatus::Done));
        let artifact_key = store.records.lock().unwrap().get(&3).unwrap().artifact_key.clone();
        let body = LocalArtifactStore::new(dir.path()).get(&artifact_key).await.unwrap();
        assert_eq!(body, "6");
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_before_touching_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::default());
        let pipeline = test_pipeline(store, dir.path());

        let err = pipeline.process_batch(&[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch));
    }
}
