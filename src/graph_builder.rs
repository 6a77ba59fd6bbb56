use crate::{
    cache::{CacheLock, GraphCache},
    dependency::DependencyGraph,
    error::{BlastError, BlastResult},
    query::PackageQuery,
};
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

pub struct DependencyGraphBuilder {
    query: Arc<dyn PackageQuery>,
    cache: GraphCache,
    current: Mutex<Option<Arc<DependencyGraph>>>,
}

impl DependencyGraphBuilder {
    pub fn new(query: Arc<dyn PackageQuery>, cache: GraphCache) -> Self {
        Self {
            query,
            cache,
            current: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &GraphCache {
        &self.cache
    }

    /// Memory first, then a fresh snapshot on disk, then the package database.
    pub async fn build(&self) -> BlastResult<Arc<DependencyGraph>> {
        if let Some(graph) = self.in_memory() {
            return Ok(graph);
        }
        if let Some(snapshot) = self.cache.load() {
            return Ok(self.remember(DependencyGraph::from_snapshot(&snapshot)));
        }

        let lock = self.acquire_lock().await?;
        // Another invocation may have written a snapshot while we waited.
        if lock.is_some() {
            if let Some(snapshot) = self.cache.load() {
                debug!("Graph cache was refreshed by another process");
                return Ok(self.remember(DependencyGraph::from_snapshot(&snapshot)));
            }
        }

        let graph = self.build_from_system().await?;
        self.persist(lock.as_ref(), &graph);
        Ok(self.remember(graph))
    }

    pub async fn rebuild(&self) -> BlastResult<Arc<DependencyGraph>> {
        let lock = self.acquire_lock().await?;
        let graph = self.build_from_system().await?;
        self.persist(lock.as_ref(), &graph);
        Ok(self.remember(graph))
    }

    pub async fn forward_deps(&self, package: &str) -> BlastResult<BTreeSet<String>> {
        Ok(self.build().await?.forward_deps(package))
    }

    pub async fn reverse_deps(&self, package: &str) -> BlastResult<BTreeSet<String>> {
        Ok(self.build().await?.reverse_deps(package))
    }

    pub async fn transitive_reverse_deps(&self, package: &str) -> BlastResult<(Vec<String>, usize)> {
        Ok(self.build().await?.transitive_reverse_deps(package))
    }

    pub async fn clear_cache(&self) -> BlastResult<bool> {
        *self.current.lock() = None;
        let cache = self.cache.clone();
        tokio::task::spawn_blocking(move || {
            let lock = cache.lock()?;
            cache.clear(&lock)
        })
        .await?
    }

    fn in_memory(&self) -> Option<Arc<DependencyGraph>> {
        let current = self.current.lock();
        let graph = current.as_ref()?;
        let fresh = Utc::now()
            .signed_duration_since(graph.built_at())
            .to_std()
            .is_ok_and(|age| age < self.cache.max_age());
        fresh.then(|| Arc::clone(graph))
    }

    fn remember(&self, graph: DependencyGraph) -> Arc<DependencyGraph> {
        let graph = Arc::new(graph);
        *self.current.lock() = Some(Arc::clone(&graph));
        graph
    }

    /// `Ok(None)` means the cache directory is unusable and the graph will be
    /// built without it. A lock held elsewhere past the timeout is an error.
    async fn acquire_lock(&self) -> BlastResult<Option<CacheLock>> {
        let cache = self.cache.clone();
        match tokio::task::spawn_blocking(move || cache.lock()).await? {
            Ok(lock) => Ok(Some(lock)),
            Err(e @ BlastError::LockTimeout(_)) => Err(e),
            Err(e) => {
                warn!("Graph cache unavailable, building without it: {}", e);
                Ok(None)
            }
        }
    }

    async fn build_from_system(&self) -> BlastResult<DependencyGraph> {
        let started = Instant::now();
        info!("Building dependency graph from the package database");

        let installed = self.query.installed_packages().await?;
        let essential = self.query.essential_packages().await?;
        let manual = self.query.manual_packages().await?;
        let records = self.query.dependency_records().await?;

        let graph = DependencyGraph::from_records(&installed, &essential, &manual, &records);
        info!(
            "Dependency graph built: {} installed packages, {} edges in {:?}",
            graph.installed_count(),
            graph.edges().len(),
            started.elapsed()
        );
        Ok(graph)
    }

    fn persist(&self, lock: Option<&CacheLock>, graph: &DependencyGraph) {
        let Some(lock) = lock else {
            return;
        };
        if let Err(e) = self.cache.store(lock, &graph.to_snapshot()) {
            warn!(
                "Failed to write graph cache {}: {}",
                self.cache.path().display(),
                e
            );
        }
    }
}
