use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, instrument};

use crate::model::AddonMetadata;
use crate::traits::{FetchError, Fetcher};

/// Runs one fetch per add-on location and returns the metadata in input order.
///
/// In parallel mode every location gets its own task; all tasks are launched
/// together and joined together, and no task is cancelled when a sibling
/// fails. The first error by input order is reported once all are done.
pub struct FetchExecutor {
    fetcher: Arc<dyn Fetcher>,
    target_folder: PathBuf,
    parallel: bool,
    semaphore: Option<Arc<Semaphore>>,
}

impl FetchExecutor {
    pub fn new(fetcher: Arc<dyn Fetcher>, target_folder: impl Into<PathBuf>) -> Self {
        Self {
            fetcher,
            target_folder: target_folder.into(),
            parallel: true,
            semaphore: None,
        }
    }

    /// Fetch one location at a time and stop at the first failure.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Caps the number of fetches running at once in parallel mode.
    pub fn with_concurrency_limit(mut self, limit: Option<usize>) -> Self {
        self.semaphore = limit.map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    #[instrument(skip(self, locations), fields(count = locations.len(), parallel = self.parallel))]
    pub async fn fetch_all(&self, locations: &[String]) -> Result<Vec<AddonMetadata>, FetchError> {
        if !self.parallel || locations.len() <= 1 {
            return self.fetch_sequential(locations).await;
        }
        self.fetch_parallel(locations).await
    }

    async fn fetch_sequential(&self, locations: &[String]) -> Result<Vec<AddonMetadata>, FetchError> {
        let mut metadata = Vec::with_capacity(locations.len());
        for location in locations {
            metadata.push(self.spawn(location.clone()).await?);
        }
        Ok(metadata)
    }

    async fn fetch_parallel(&self, locations: &[String]) -> Result<Vec<AddonMetadata>, FetchError> {
        let handles: Vec<_> = locations
            .iter()
            .map(|location| {
                let semaphore = self.semaphore.clone();
                let task = self.spawn(location.clone());
                let location = location.clone();
                tokio::spawn(async move {
                    let _permit = match semaphore {
                        Some(semaphore) => match semaphore.acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(e) => {
                                return Err(FetchError::WorkerFailed {
                                    location,
                                    reason: format!("Semaphore error: {e}"),
                                })
                            }
                        },
                        None => None,
                    };
                    task.await
                })
            })
            .collect();

        // Barrier: every task finishes before any result is inspected.
        let mut results = Vec::with_capacity(handles.len());
        for (location, handle) in locations.iter().zip(handles) {
            let result = handle.await.unwrap_or_else(|e| {
                Err(FetchError::WorkerFailed {
                    location: location.clone(),
                    reason: e.to_string(),
                })
            });
            results.push(result);
        }
        info!(finished = results.len(), "All add-on workers finished");

        let metadata = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        check_unique_ids(locations, &metadata)?;
        Ok(metadata)
    }

    /// Runs one blocking fetch on the blocking thread pool.
    fn spawn(
        &self,
        location: String,
    ) -> impl std::future::Future<Output = Result<AddonMetadata, FetchError>> + Send + 'static {
        let fetcher = Arc::clone(&self.fetcher);
        let target_folder = self.target_folder.clone();
        async move {
            let worker_location = location.clone();
            tokio::task::spawn_blocking(move || fetcher.fetch(&worker_location, &target_folder))
                .await
                .unwrap_or_else(|e| {
                    Err(FetchError::WorkerFailed {
                        location,
                        reason: e.to_string(),
                    })
                })
        }
    }
}

/// Concurrent fetches that share an id write into the same folder, so their
/// artifacts cannot be trusted.
fn check_unique_ids(locations: &[String], metadata: &[AddonMetadata]) -> Result<(), FetchError> {
    let mut seen: HashMap<&str, Vec<String>> = HashMap::new();
    for (location, addon) in locations.iter().zip(metadata) {
        seen.entry(addon.id()).or_default().push(location.clone());
    }
    for addon in metadata {
        if let Some(sources) = seen.get(addon.id()) {
            if sources.len() > 1 {
                return Err(FetchError::DuplicateId {
                    id: addon.id().to_string(),
                    locations: sources.clone(),
                });
            }
        }
    }
    Ok(())
}
