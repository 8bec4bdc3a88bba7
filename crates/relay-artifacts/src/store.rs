//! Run-scoped artifact store.
//!
//! The store owns the name index and the access policy; blob bytes live in a
//! [`BlobBackend`]. Writes from a running instance are staged and only become
//! readable after [`ArtifactStore::commit`].

use crate::backend::BlobBackend;
use crate::digest::{hash_content, validate_name};
use crate::lineage::Lineage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use relay_core::artifact::{ArtifactMeta, ContentHash, ResolvedInput, RetentionPolicy};
use relay_core::ports::ArtifactSink;
use relay_core::{ArtifactError, JobInstanceId, RunId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type Result<T> = std::result::Result<T, ArtifactError>;

#[derive(Default)]
struct RunIndex {
    lineage: Lineage,
    committed: IndexMap<String, ArtifactMeta>,
    staged: IndexMap<String, ArtifactMeta>,
}

impl RunIndex {
    fn lookup(&self, name: &str) -> Option<&ArtifactMeta> {
        self.committed.get(name).or_else(|| self.staged.get(name))
    }
}

/// Outcome of archiving a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Run-scoped artifacts dropped.
    pub collected: usize,
    /// Artifacts kept under a longer retention policy.
    pub retained: usize,
    /// Staged writes that were never committed.
    pub discarded: usize,
}

pub struct ArtifactStore {
    backend: Arc<dyn BlobBackend>,
    default_retention: RetentionPolicy,
    runs: RwLock<HashMap<RunId, RunIndex>>,
    retained: RwLock<Vec<ArtifactMeta>>,
}

impl ArtifactStore {
    pub fn new(backend: Arc<dyn BlobBackend>) -> Self {
        Self {
            backend,
            default_retention: RetentionPolicy::Run,
            runs: RwLock::new(HashMap::new()),
            retained: RwLock::new(Vec::new()),
        }
    }

    pub fn with_default_retention(mut self, retention: RetentionPolicy) -> Self {
        self.default_retention = retention;
        self
    }

    /// Open a run's namespace with the ancestry used for access checks.
    pub async fn register_run(&self, run_id: RunId, lineage: Lineage) {
        debug!(run_id = %run_id, instances = lineage.len(), "Registering run with artifact store");
        let mut runs = self.runs.write().await;
        runs.insert(
            run_id,
            RunIndex {
                lineage,
                ..Default::default()
            },
        );
    }

    /// Stage an artifact for `producer` using the default retention.
    pub async fn put(
        &self,
        run_id: RunId,
        producer: JobInstanceId,
        name: &str,
        data: &[u8],
    ) -> Result<ContentHash> {
        self.put_with_retention(run_id, producer, name, data, self.default_retention)
            .await
    }

    pub async fn put_with_retention(
        &self,
        run_id: RunId,
        producer: JobInstanceId,
        name: &str,
        data: &[u8],
        retention: RetentionPolicy,
    ) -> Result<ContentHash> {
        if !validate_name(name) {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }

        let mut runs = self.runs.write().await;
        let index = runs
            .get_mut(&run_id)
            .ok_or(ArtifactError::UnknownRun(run_id))?;

        if !index.lineage.contains(producer) {
            return Err(ArtifactError::UnknownInstance {
                run_id,
                instance: producer,
            });
        }

        let owned_by_other = index
            .staged
            .get(name)
            .is_some_and(|m| m.producer != producer);
        if index.committed.contains_key(name) || owned_by_other {
            return Err(ArtifactError::Conflict {
                name: name.to_string(),
                run_id,
            });
        }

        let digest = hash_content(data);
        self.backend.write(&digest, data).await?;

        let meta = ArtifactMeta {
            name: name.to_string(),
            run_id,
            producer,
            digest: digest.clone(),
            size_bytes: data.len() as u64,
            retention,
            created_at: Utc::now(),
        };
        // Restaging a name drops the earlier blob unless something else shares it.
        if let Some(previous) = index.staged.insert(name.to_string(), meta)
            && previous.digest != digest
        {
            let retained = self.retained.read().await;
            self.collect_unreferenced(vec![previous.digest], &runs, &retained)
                .await?;
        }

        debug!(run_id = %run_id, producer = %producer, name, digest = %digest, "Artifact staged");
        Ok(digest)
    }

    /// Publish every staged write of `producer`.
    pub async fn commit(&self, run_id: RunId, producer: JobInstanceId) -> Result<Vec<ArtifactMeta>> {
        let mut runs = self.runs.write().await;
        let index = runs
            .get_mut(&run_id)
            .ok_or(ArtifactError::UnknownRun(run_id))?;

        let names: Vec<String> = index
            .staged
            .values()
            .filter(|m| m.producer == producer)
            .map(|m| m.name.clone())
            .collect();

        let mut committed = Vec::with_capacity(names.len());
        for name in names {
            if let Some(meta) = index.staged.shift_remove(&name) {
                index.committed.insert(name, meta.clone());
                committed.push(meta);
            }
        }

        if !committed.is_empty() {
            info!(run_id = %run_id, producer = %producer, count = committed.len(), "Artifacts committed");
        }
        Ok(committed)
    }

    /// Drop every staged write of `producer`. Returns how many were dropped.
    pub async fn discard(&self, run_id: RunId, producer: JobInstanceId) -> Result<usize> {
        self.discard_where(run_id, |m| m.producer == producer).await
    }

    /// Drop every staged write in the run.
    pub async fn discard_all(&self, run_id: RunId) -> Result<usize> {
        self.discard_where(run_id, |_| true).await
    }

    async fn discard_where<F>(&self, run_id: RunId, pred: F) -> Result<usize>
    where
        F: Fn(&ArtifactMeta) -> bool,
    {
        let mut runs = self.runs.write().await;
        let index = runs
            .get_mut(&run_id)
            .ok_or(ArtifactError::UnknownRun(run_id))?;

        let mut dropped = Vec::new();
        index.staged.retain(|_, meta| {
            if pred(meta) {
                dropped.push(meta.digest.clone());
                false
            } else {
                true
            }
        });

        let count = dropped.len();
        let retained = self.retained.read().await;
        self.collect_unreferenced(dropped, &runs, &retained).await?;

        if count > 0 {
            debug!(run_id = %run_id, count, "Staged artifacts discarded");
        }
        Ok(count)
    }

    /// Read an artifact on behalf of `consumer`.
    ///
    /// `Forbidden` is returned whenever the artifact exists but the consumer
    /// does not transitively depend on its producer, even if the write is
    /// still staged.
    pub async fn get(
        &self,
        run_id: RunId,
        consumer: JobInstanceId,
        name: &str,
    ) -> Result<ResolvedInput> {
        let runs = self.runs.read().await;
        let index = runs.get(&run_id).ok_or(ArtifactError::UnknownRun(run_id))?;

        if !index.lineage.contains(consumer) {
            return Err(ArtifactError::UnknownInstance {
                run_id,
                instance: consumer,
            });
        }

        let meta = index.lookup(name).ok_or_else(|| ArtifactError::NotFound {
            name: name.to_string(),
        })?;

        if !index.lineage.is_upstream(meta.producer, consumer) {
            warn!(run_id = %run_id, consumer = %consumer, name, "Artifact access forbidden");
            return Err(ArtifactError::Forbidden {
                name: name.to_string(),
                consumer,
            });
        }

        let meta = index
            .committed
            .get(name)
            .ok_or_else(|| ArtifactError::NotFound {
                name: name.to_string(),
            })?
            .clone();

        let data = self
            .backend
            .read(&meta.digest)
            .await?
            .ok_or_else(|| ArtifactError::Storage(format!("blob {} missing", meta.digest)))?;

        Ok(ResolvedInput { meta, data })
    }

    /// Committed artifacts of a live run, in commit order.
    pub async fn list(&self, run_id: RunId) -> Result<Vec<ArtifactMeta>> {
        let runs = self.runs.read().await;
        let index = runs.get(&run_id).ok_or(ArtifactError::UnknownRun(run_id))?;
        Ok(index.committed.values().cloned().collect())
    }

    /// Close a run: drop staged writes and run-scoped artifacts, keep the rest.
    pub async fn archive(&self, run_id: RunId) -> Result<ArchiveSummary> {
        let mut runs = self.runs.write().await;
        let index = runs
            .remove(&run_id)
            .ok_or(ArtifactError::UnknownRun(run_id))?;

        let mut summary = ArchiveSummary {
            discarded: index.staged.len(),
            ..Default::default()
        };
        let mut dropped: Vec<ContentHash> = index.staged.into_values().map(|m| m.digest).collect();

        let mut retained = self.retained.write().await;
        for meta in index.committed.into_values() {
            match meta.retention {
                RetentionPolicy::Run => {
                    summary.collected += 1;
                    dropped.push(meta.digest);
                }
                RetentionPolicy::Days(_) => {
                    summary.retained += 1;
                    retained.push(meta);
                }
            }
        }

        self.collect_unreferenced(dropped, &runs, &retained).await?;

        info!(
            run_id = %run_id,
            collected = summary.collected,
            retained = summary.retained,
            discarded = summary.discarded,
            "Run artifacts archived"
        );
        Ok(summary)
    }

    /// Artifacts that outlived their (archived) run.
    pub async fn retained(&self, run_id: RunId) -> Vec<ArtifactMeta> {
        self.retained
            .read()
            .await
            .iter()
            .filter(|m| m.run_id == run_id)
            .cloned()
            .collect()
    }

    pub async fn read_retained(&self, run_id: RunId, name: &str) -> Result<Vec<u8>> {
        let meta = self
            .retained
            .read()
            .await
            .iter()
            .find(|m| m.run_id == run_id && m.name == name)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound {
                name: name.to_string(),
            })?;

        self.backend
            .read(&meta.digest)
            .await?
            .ok_or_else(|| ArtifactError::Storage(format!("blob {} missing", meta.digest)))
    }

    /// Remove retained artifacts whose retention has lapsed at `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let runs = self.runs.read().await;
        let mut retained = self.retained.write().await;

        let mut expired = Vec::new();
        retained.retain(|meta| {
            let lapsed = meta
                .retention
                .expires_at(meta.created_at)
                .is_some_and(|at| at <= now);
            if lapsed {
                expired.push(meta.digest.clone());
            }
            !lapsed
        });

        let count = expired.len();
        self.collect_unreferenced(expired, &runs, &retained).await?;
        if count > 0 {
            info!(count, "Expired artifacts purged");
        }
        Ok(count)
    }

    /// Writer that stages outputs for one instance.
    pub fn writer(self: &Arc<Self>, run_id: RunId, producer: JobInstanceId) -> StagedWriter {
        StagedWriter {
            store: Arc::clone(self),
            run_id,
            producer,
        }
    }

    // Blobs are shared by digest; only remove those nothing else points at.
    async fn collect_unreferenced(
        &self,
        candidates: Vec<ContentHash>,
        runs: &HashMap<RunId, RunIndex>,
        retained: &[ArtifactMeta],
    ) -> Result<()> {
        let candidates: HashSet<ContentHash> = candidates.into_iter().collect();
        for digest in candidates {
            let in_use = retained.iter().any(|m| m.digest == digest)
                || runs.values().any(|index| {
                    index
                        .committed
                        .values()
                        .chain(index.staged.values())
                        .any(|m| m.digest == digest)
                });
            if !in_use {
                self.backend.remove(&digest).await?;
            }
        }
        Ok(())
    }
}

/// [`ArtifactSink`] handed to executors.
pub struct StagedWriter {
    store: Arc<ArtifactStore>,
    run_id: RunId,
    producer: JobInstanceId,
}

#[async_trait]
impl ArtifactSink for StagedWriter {
    async fn put(&self, name: &str, data: Vec<u8>) -> Result<ContentHash> {
        self.store.put(self.run_id, self.producer, name, &data).await
    }
}
