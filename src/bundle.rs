//! Bundle orchestration.
//!
//! [`ArchiveService`] is the entry point for callers. It owns the gateway,
//! memoizes the normalized rows per account, and runs the four producers
//! (summary, clusters, threads, embeddings). Each producer fetches what it
//! needs concurrently, does its CPU work on the blocking pool, and returns
//! `Ok(None)` when the artifact it depends on does not exist.

use crate::avatar::{AvatarResolver, NoAvatars, resolve_or_empty};
use crate::clusters;
use crate::config::{ArtifactsConfig, Config};
use crate::error::{LensError, Result, find_closest_match};
use crate::logging::OperationGuard;
use crate::memo::Memo;
use crate::model::{
    Producer, TweetRow, UserBundle, UserClusters, UserEmbeddings, UserSummary, UserThreads,
};
use crate::npy;
use crate::ontology::{ClusterNotes, LocalIdMap};
use crate::pickle::{self, ObjectGraph};
use crate::projection::{self, ProjectionParams};
use crate::rows;
use crate::store::{Gateway, ObjectStore};
use crate::summary::{self, SummarySources};
use crate::threads::{self, TreeSource};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Normalized rows shared between the producers of one account.
pub type Rows = Arc<Vec<TweetRow>>;

/// Produces the per-account views from archive artifacts.
pub struct ArchiveService {
    gateway: Arc<Gateway>,
    rows: Memo<String, Rows>,
    avatars: Arc<dyn AvatarResolver>,
    artifacts: ArtifactsConfig,
    projection: ProjectionParams,
    placeholder: String,
}

impl ArchiveService {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, config: &Config) -> Self {
        Self {
            gateway: Arc::new(Gateway::with_capacity(store, config.store.cached_blobs)),
            // An empty table is not cached: the account may still be uploading.
            rows: Memo::retain_if("rows", |rows: &Rows| !rows.is_empty()),
            avatars: Arc::new(NoAvatars),
            artifacts: config.artifacts.clone(),
            projection: config.projection.params(),
            placeholder: config.avatars.placeholder_url.clone(),
        }
    }

    #[must_use]
    pub fn with_avatar_resolver(mut self, resolver: Arc<dyn AvatarResolver>) -> Self {
        self.avatars = resolver;
        self
    }

    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Accounts the store can enumerate.
    ///
    /// # Errors
    ///
    /// Returns any store failure.
    pub async fn list_accounts(&self) -> Result<Vec<String>> {
        self.gateway.list_accounts().await
    }

    /// Fail with [`LensError::AccountNotFound`] unless the account has
    /// artifacts. The error carries the closest known account, if any.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` or any store failure.
    pub async fn ensure_exists(&self, account: &str) -> Result<()> {
        if self.gateway.exists(account).await? {
            return Ok(());
        }
        let known = self.gateway.list_accounts().await.unwrap_or_default();
        let suggestion = find_closest_match(account, &known, None).map(str::to_string);
        Err(LensError::account_not_found(account, suggestion))
    }

    /// Normalized rows of the account's tweet table, decoded once and shared.
    /// A missing table yields no rows.
    ///
    /// # Errors
    ///
    /// Returns store failures and table decode errors.
    pub async fn rows(&self, account: &str) -> Result<Rows> {
        let gateway = Arc::clone(&self.gateway);
        let file = self.artifacts.tweets.clone();
        let owned = account.to_string();
        self.rows
            .get_or_try_insert_with(account.to_string(), move || async move {
                let Some(bytes) = gateway.fetch_artifact(&owned, &file).await? else {
                    debug!(account = %owned, "No tweet table");
                    return Ok(Arc::new(Vec::new()));
                };
                let decoded = tokio::task::spawn_blocking(move || rows::decode_rows(bytes))
                    .await?
                    .inspect_err(|e| {
                        if e.is_decode() {
                            gateway.forget_artifact(&owned, &file);
                        }
                    })?;
                info!(account = %owned, rows = decoded.len(), "Normalized rows");
                Ok(Arc::new(decoded))
            })
            .await
    }

    // =========================================================================
    // Producers
    // =========================================================================

    /// Account summary. `None` when there is nothing to summarize.
    ///
    /// # Errors
    ///
    /// Returns store failures and decode errors.
    pub async fn summary(&self, account: &str) -> Result<Option<UserSummary>> {
        let rows = self.rows(account).await?;
        self.summary_from(account, rows).await
    }

    /// Level-0 clusters with their statistics. `None` without a hierarchy.
    ///
    /// # Errors
    ///
    /// Returns store failures and decode errors.
    pub async fn clusters(&self, account: &str) -> Result<Option<UserClusters>> {
        let rows = self.rows(account).await?;
        self.clusters_from(account, rows).await
    }

    /// Reconstructed threads. `None` when neither tree artifact exists.
    ///
    /// # Errors
    ///
    /// Returns store failures and decode errors.
    pub async fn threads(&self, account: &str) -> Result<Option<UserThreads>> {
        let rows = self.rows(account).await?;
        self.threads_from(account, rows).await
    }

    /// 2-D embedding projection. `None` without an embedding matrix.
    ///
    /// # Errors
    ///
    /// Returns store failures and decode errors.
    pub async fn embeddings(&self, account: &str) -> Result<Option<UserEmbeddings>> {
        let rows = self.rows(account).await?;
        self.embeddings_from(account, rows).await
    }

    async fn summary_from(&self, account: &str, rows: Rows) -> Result<Option<UserSummary>> {
        let guard = OperationGuard::new("summary", account);
        let result: Result<Option<UserSummary>> = async {
            let a = &self.artifacts;
            let (groups, params, ids) = tokio::try_join!(
                self.gateway.fetch_companion_json(account, &a.group_results),
                self.gateway.fetch_companion_json(account, &a.clustering_params),
                self.gateway.fetch_companion_json(account, &a.local_ids),
            )?;

            let owner = summary::owner_account(&rows).map(str::to_string);
            let built = tokio::task::spawn_blocking(move || {
                let ids = ids.as_ref().map(LocalIdMap::from_json);
                summary::build(
                    &rows,
                    SummarySources {
                        group_results: groups.as_ref(),
                        clustering_params: params.as_ref(),
                        local_ids: ids.as_ref(),
                    },
                )
            })
            .await?;

            let Some(mut summary) = built else {
                return Ok(None);
            };
            let owner: Vec<String> = owner.into_iter().collect();
            let resolved = resolve_or_empty(self.avatars.as_ref(), &owner).await;
            summary.avatar_url = owner
                .first()
                .and_then(|id| resolved.get(id))
                .cloned()
                .unwrap_or_else(|| self.placeholder.clone());
            Ok(Some(summary))
        }
        .await;
        guard.finish(result)
    }

    /// A corrupt artifact is not kept: the next request refetches it.
    fn forget_if_corrupt<T>(&self, account: &str, files: &[&str], result: &Result<T>) {
        if result.as_ref().is_err_and(|e| e.is_decode()) {
            for file in files {
                self.gateway.forget_artifact(account, file);
            }
        }
    }

    async fn clusters_from(&self, account: &str, rows: Rows) -> Result<Option<UserClusters>> {
        let guard = OperationGuard::new("clusters", account);
        let result: Result<Option<UserClusters>> = async {
            let a = &self.artifacts;
            let (hierarchy, ontology, labels, groups, ids) = tokio::try_join!(
                self.gateway.fetch_artifact(account, &a.hierarchy),
                self.gateway.fetch_companion_json(account, &a.ontology),
                self.gateway.fetch_companion_json(account, &a.labels),
                self.gateway.fetch_companion_json(account, &a.group_results),
                self.gateway.fetch_companion_json(account, &a.local_ids),
            )?;
            let Some(hierarchy) = hierarchy else {
                debug!(account = %account, "No cluster hierarchy");
                return Ok(None);
            };

            let mut stats = tokio::task::spawn_blocking(move || -> Result<_> {
                let hierarchy = clusters::parse_hierarchy(hierarchy)?;
                let cluster_ids: HashSet<String> = hierarchy.iter().map(|h| h.id.clone()).collect();
                let names: HashMap<String, String> = hierarchy
                    .iter()
                    .map(|h| (h.id.clone(), h.name.clone()))
                    .collect();
                let notes = ClusterNotes::from_sources(ontology.as_ref(), labels.as_ref(), &cluster_ids);
                let related = clusters::related_from_groups(groups.as_ref(), &names);
                let ids = ids.as_ref().map(LocalIdMap::from_json).unwrap_or_default();
                Ok(clusters::aggregate(&hierarchy, &rows, &notes, &related, &ids))
            })
            .await??;

            let cited = clusters::cited_accounts(&stats);
            let resolved = resolve_or_empty(self.avatars.as_ref(), &cited).await;
            clusters::apply_avatars(&mut stats, &resolved, &self.placeholder);
            Ok(Some(UserClusters { clusters: stats }))
        }
        .await;
        self.forget_if_corrupt(account, &[self.artifacts.hierarchy.as_str()], &result);
        guard.finish(result)
    }

    async fn threads_from(&self, account: &str, rows: Rows) -> Result<Option<UserThreads>> {
        let guard = OperationGuard::new("threads", account);
        let result: Result<Option<UserThreads>> = async {
            let a = &self.artifacts;
            let (complete, incomplete) = tokio::try_join!(
                self.gateway.fetch_artifact(account, &a.trees),
                self.gateway.fetch_artifact(account, &a.incomplete_trees),
            )?;
            if complete.is_none() && incomplete.is_none() {
                debug!(account = %account, "No tree artifacts");
                return Ok(None);
            }

            let threads = tokio::task::spawn_blocking(move || -> Result<_> {
                let graphs = [(complete, false), (incomplete, true)]
                    .into_iter()
                    .filter_map(|(bytes, flag)| bytes.map(|b| (b, flag)))
                    .map(|(bytes, flag)| pickle::decode(&bytes).map(|graph| (graph, flag)))
                    .collect::<Result<Vec<(ObjectGraph, bool)>>>()?;
                let sources: Vec<TreeSource<'_>> = graphs
                    .iter()
                    .map(|(graph, incomplete)| TreeSource {
                        graph,
                        incomplete: *incomplete,
                    })
                    .collect();
                Ok(threads::reconstruct(&rows, &sources))
            })
            .await??;
            Ok(Some(UserThreads { threads }))
        }
        .await;
        let a = &self.artifacts;
        self.forget_if_corrupt(account, &[a.trees.as_str(), a.incomplete_trees.as_str()], &result);
        guard.finish(result)
    }

    async fn embeddings_from(&self, account: &str, rows: Rows) -> Result<Option<UserEmbeddings>> {
        let guard = OperationGuard::new("embeddings", account);
        let result: Result<Option<UserEmbeddings>> = async {
            let Some(bytes) = self
                .gateway
                .fetch_artifact(account, &self.artifacts.embeddings)
                .await?
            else {
                debug!(account = %account, "No embedding matrix");
                return Ok(None);
            };
            let params = self.projection;
            let projected = tokio::task::spawn_blocking(move || -> Result<_> {
                let matrix = npy::decode(&bytes)?;
                Ok(projection::project(&rows, &matrix, params))
            })
            .await??;
            Ok(Some(projected))
        }
        .await;
        self.forget_if_corrupt(account, &[self.artifacts.embeddings.as_str()], &result);
        guard.finish(result)
    }

    // =========================================================================
    // Bundle
    // =========================================================================

    /// All four views of `account`. The rows are computed once and shared;
    /// the producers then run concurrently. A producer that fails leaves its
    /// slot empty and its message in [`UserBundle::errors`]; the others are
    /// unaffected.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound`, or a store/decode failure of the tweet
    /// table that every producer depends on.
    pub async fn bundle(&self, account: &str) -> Result<UserBundle> {
        let guard = OperationGuard::new("bundle", account);
        let result: Result<UserBundle> = async {
            self.ensure_exists(account).await?;
            let rows = self.rows(account).await?;

            let (summary, clusters, threads, embeddings) = tokio::join!(
                self.summary_from(account, Arc::clone(&rows)),
                self.clusters_from(account, Arc::clone(&rows)),
                self.threads_from(account, Arc::clone(&rows)),
                self.embeddings_from(account, rows),
            );

            let mut errors = BTreeMap::new();
            Ok(UserBundle {
                summary: settle(Producer::Summary, summary, &mut errors),
                clusters: settle(Producer::Clusters, clusters, &mut errors),
                threads: settle(Producer::Threads, threads, &mut errors),
                embeddings: settle(Producer::Embeddings, embeddings, &mut errors),
                errors,
            })
        }
        .await;
        guard.finish(result)
    }

    /// One producer's output as JSON, `null` when it has no data.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` and the producer's own failure.
    pub async fn produce_json(&self, producer: Producer, account: &str) -> Result<serde_json::Value> {
        self.ensure_exists(account).await?;
        match producer {
            Producer::Summary => to_json(producer, &self.summary(account).await?),
            Producer::Clusters => to_json(producer, &self.clusters(account).await?),
            Producer::Threads => to_json(producer, &self.threads(account).await?),
            Producer::Embeddings => to_json(producer, &self.embeddings(account).await?),
        }
    }
}

fn settle<T>(
    producer: Producer,
    outcome: Result<Option<T>>,
    errors: &mut BTreeMap<Producer, String>,
) -> Option<T> {
    outcome.unwrap_or_else(|e| {
        errors.insert(producer, e.root().to_string());
        None
    })
}

fn to_json<T: Serialize>(producer: Producer, value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| LensError::json(producer.to_string(), e))
}
