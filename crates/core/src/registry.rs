//! In-memory job registry.
//!
//! The registry is the single source of truth for job state. All mutation
//! goes through `create`/`update`/`delete`; reads hand out cloned snapshots
//! so callers can never observe a partially applied write or hold a live
//! reference across an await point.

use crate::job::Job;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Error type for registry operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A record with this id already exists.
    #[error("job already exists: {0}")]
    DuplicateId(String),

    /// No record with this id (never created, or already cleaned up).
    #[error("job not found: {0}")]
    NotFound(String),
}

/// Concurrency-safe mapping from job id to job record.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new job record.
    ///
    /// Ids are generated as UUIDs so collisions should not occur, but a
    /// duplicate is rejected rather than silently overwritten.
    pub async fn create(&self, job: Job) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(RegistryError::DuplicateId(job.id.clone()));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Atomically read-modify-write a job record.
    ///
    /// The mutator runs under the write lock, so a progress update can never
    /// race with another writer's read-modify-write on the same record.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) => {
                mutate(job);
                Ok(())
            }
            None => Err(RegistryError::NotFound(id.to_string())),
        }
    }

    /// Return a snapshot (copy) of the current record.
    pub async fn get(&self, id: &str) -> Result<Job, RegistryError> {
        let jobs = self.jobs.read().await;
        jobs.get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Remove a record. Deleting an absent id is a no-op.
    ///
    /// Returns whether a record was actually removed.
    pub async fn delete(&self, id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        jobs.remove(id).is_some()
    }

    /// Snapshots of all records, for the status endpoint and sweeps.
    pub async fn list(&self) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        jobs.values().cloned().collect()
    }

    /// Number of records currently stored.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Whether the registry holds no records.
    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn make_job(id: &str) -> Job {
        Job::new(
            id.to_string(),
            PathBuf::from(format!("/tmp/uploads/{}_in.mp4", id)),
            PathBuf::from(format!("/tmp/outputs/{}_out.mp4", id)),
            "in.mp4".to_string(),
            "out.mp4".to_string(),
            1_000_000,
            30.0,
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = JobRegistry::new();
        registry.create(make_job("a")).await.unwrap();

        let job = registry.get("a").await.unwrap();
        assert_eq!(job.id, "a");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() {
        let registry = JobRegistry::new();
        registry.create(make_job("a")).await.unwrap();

        let err = registry.create(make_job("a")).await.unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("a".to_string()));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let registry = JobRegistry::new();
        let err = registry.get("missing").await.unwrap_err();
        assert_eq!(err, RegistryError::NotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_get_returns_snapshot_not_live_reference() {
        let registry = JobRegistry::new();
        registry.create(make_job("a")).await.unwrap();

        let mut snapshot = registry.get("a").await.unwrap();
        snapshot.set_progress(99);

        // Mutating the snapshot must not affect the stored record.
        let stored = registry.get("a").await.unwrap();
        assert_eq!(stored.progress, 0);
    }

    #[tokio::test]
    async fn test_update_mutates_in_place() {
        let registry = JobRegistry::new();
        registry.create(make_job("a")).await.unwrap();

        registry
            .update("a", |job| {
                job.start_processing();
                job.set_progress(42);
                job.set_message("Encoding...");
            })
            .await
            .unwrap();

        let job = registry.get("a").await.unwrap();
        assert_eq!(job.progress, 42);
        assert_eq!(job.message, "Encoding...");
    }

    #[tokio::test]
    async fn test_update_unknown_is_not_found() {
        let registry = JobRegistry::new();
        let err = registry.update("missing", |job| job.set_progress(1)).await;
        assert_eq!(err, Err(RegistryError::NotFound("missing".to_string())));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let registry = JobRegistry::new();
        registry.create(make_job("a")).await.unwrap();

        assert!(registry.delete("a").await);
        assert!(!registry.delete("a").await);
        assert!(!registry.delete("never-existed").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_list_returns_all_records() {
        let registry = JobRegistry::new();
        registry.create(make_job("a")).await.unwrap();
        registry.create(make_job("b")).await.unwrap();

        let mut ids: Vec<String> = registry.list().await.into_iter().map(|j| j.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    // Concurrent writers to different jobs never interleave their updates:
    // each record only ever sees its own writer's values.
    #[tokio::test]
    async fn test_concurrent_updates_to_different_jobs() {
        let registry = Arc::new(JobRegistry::new());
        registry.create(make_job("a")).await.unwrap();
        registry.create(make_job("b")).await.unwrap();

        let mut handles = Vec::new();
        for (id, base) in [("a", 0u8), ("b", 50u8)] {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for step in 1..=50u8 {
                    registry
                        .update(id, |job| {
                            job.set_progress((base + step / 2).min(100));
                            job.set_message(format!("{} step {}", id, step));
                        })
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let a = registry.get("a").await.unwrap();
        let b = registry.get("b").await.unwrap();
        assert!(a.message.starts_with("a step"));
        assert!(b.message.starts_with("b step"));
        assert_eq!(a.progress, 25);
        assert_eq!(b.progress, 75);
    }
}
