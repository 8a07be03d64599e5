//! Background audit cache hydration.
//!
//! A stale-while-revalidate companion to `AuditCache`: on a fixed interval
//! the hydrator recomputes audit responses for each (category, variant)
//! combination and writes them into the cache, so user-facing requests
//! read warm data instead of paying a cold Horde API round trip.

use crate::audit::cache::{AuditCache, AuditVariant};
use crate::audit::info::CategoryAuditResponse;
use crate::config::HydratorSettings;
use crate::models::Category;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Computes a fresh audit response for a category/variant combination.
///
/// Implementations pull model records from a backend and live statistics
/// from the Horde API. Returning `Ok(None)` means "nothing to cache" (e.g.
/// an empty category) and is not an error.
#[async_trait]
pub trait AuditProvider: Send + Sync {
    async fn compute(
        &self,
        category: Category,
        variant: AuditVariant,
    ) -> Result<Option<CategoryAuditResponse>>;
}

/// Categories the hydrator keeps warm.
const HYDRATED_CATEGORIES: [Category; 2] = [Category::ImageGeneration, Category::TextGeneration];

/// Background service that proactively refreshes the audit cache.
///
/// Started and stopped explicitly; constructing one does nothing until
/// `start()` is called.
pub struct CacheHydrator {
    settings: HydratorSettings,
    provider: Arc<dyn AuditProvider>,
    cache: Arc<AuditCache>,
    shutdown: watch::Sender<bool>,
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CacheHydrator {
    pub fn new(
        settings: HydratorSettings,
        provider: Arc<dyn AuditProvider>,
        cache: Arc<AuditCache>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            settings,
            provider,
            cache,
            shutdown,
            task: std::sync::Mutex::new(None),
        }
    }

    /// Whether the hydration loop is currently running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("hydrator lock poisoned")
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Start the background hydration task.
    ///
    /// No-op when disabled in settings or already running.
    pub fn start(&self) {
        if !self.settings.enabled {
            info!("Cache hydration is disabled in settings");
            return;
        }
        let mut task = self.task.lock().expect("hydrator lock poisoned");
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            warn!("Cache hydration is already running");
            return;
        }

        let settings = self.settings.clone();
        let provider = self.provider.clone();
        let cache = self.cache.clone();
        let mut shutdown_rx = self.shutdown.subscribe();

        *task = Some(tokio::spawn(async move {
            debug!("Cache hydration waiting {:?} for startup", settings.startup_delay);
            tokio::select! {
                _ = tokio::time::sleep(settings.startup_delay) => {}
                _ = shutdown_rx.changed() => return,
            }

            loop {
                if let Err(e) = Self::hydrate_all(&provider, &cache).await {
                    // A failed pass must not kill the service
                    error!("Error during cache hydration: {}", e);
                }

                tokio::select! {
                    _ = tokio::time::sleep(settings.interval) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
        }));

        info!("Cache hydration started with interval={:?}", self.settings.interval);
    }

    /// Stop the background task gracefully, aborting after the configured
    /// shutdown timeout.
    pub async fn stop(&self) {
        let task = {
            let mut task = self.task.lock().expect("hydrator lock poisoned");
            task.take()
        };
        let Some(task) = task else {
            return;
        };

        info!("Stopping cache hydration...");
        let _ = self.shutdown.send(true);

        let abort_handle = task.abort_handle();
        match tokio::time::timeout(self.settings.shutdown_timeout, task).await {
            Ok(_) => info!("Cache hydration stopped"),
            Err(_) => {
                warn!("Cache hydration task did not stop gracefully, aborting");
                abort_handle.abort();
            }
        }
    }

    async fn hydrate_all(provider: &Arc<dyn AuditProvider>, cache: &Arc<AuditCache>) -> Result<()> {
        debug!("Starting cache hydration cycle");

        for category in HYDRATED_CATEGORIES {
            for variant in AuditVariant::ALL {
                // Grouping only applies to text models
                if variant.grouped && category != Category::TextGeneration {
                    continue;
                }

                match provider.compute(category, variant).await {
                    Ok(Some(response)) => {
                        let model_count = response.total_count;
                        cache.set(category, variant, response);
                        info!(
                            "Hydrated audit cache: {} (grouped={}, models={})",
                            category, variant.grouped, model_count
                        );
                    }
                    Ok(None) => debug!("No audit data for {} (grouped={})", category, variant.grouped),
                    Err(e) => warn!("Failed to hydrate audit cache for {}: {}", category, e),
                }
            }
        }

        debug!("Cache hydration cycle completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::info::CategoryAuditSummary;
    use crate::config::AuditSettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuditProvider for CountingProvider {
        async fn compute(
            &self,
            category: Category,
            _variant: AuditVariant,
        ) -> Result<Option<CategoryAuditResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(CategoryAuditResponse {
                category,
                category_total_month_usage: 0,
                total_count: 0,
                returned_count: 0,
                offset: 0,
                limit: None,
                models: Vec::new(),
                summary: CategoryAuditSummary::from_audit_models(&[]),
            }))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl AuditProvider for FailingProvider {
        async fn compute(
            &self,
            category: Category,
            _variant: AuditVariant,
        ) -> Result<Option<CategoryAuditResponse>> {
            Err(crate::ModelRefError::Network {
                message: format!("horde unreachable for {}", category),
                cause: None,
            })
        }
    }

    fn fast_settings() -> HydratorSettings {
        HydratorSettings {
            enabled: true,
            interval: Duration::from_millis(20),
            startup_delay: Duration::from_millis(5),
            shutdown_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_hydrator_populates_cache() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(AuditCache::new(AuditSettings::default()));
        let hydrator = CacheHydrator::new(fast_settings(), provider.clone(), cache.clone());

        hydrator.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        hydrator.stop().await;

        assert!(provider.calls.load(Ordering::SeqCst) >= 3);
        assert!(cache
            .get(Category::ImageGeneration, AuditVariant { grouped: false })
            .is_some());
        assert!(cache
            .get(Category::TextGeneration, AuditVariant { grouped: true })
            .is_some());
        // Image audits are never grouped
        assert!(cache
            .get(Category::ImageGeneration, AuditVariant { grouped: true })
            .is_none());
    }

    #[tokio::test]
    async fn test_disabled_hydrator_does_not_start() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(AuditCache::new(AuditSettings::default()));
        let settings = HydratorSettings {
            enabled: false,
            ..fast_settings()
        };
        let hydrator = CacheHydrator::new(settings, provider.clone(), cache);

        hydrator.start();
        assert!(!hydrator.is_running());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_failures_do_not_kill_the_loop() {
        let cache = Arc::new(AuditCache::new(AuditSettings::default()));
        let hydrator = CacheHydrator::new(fast_settings(), Arc::new(FailingProvider), cache);

        hydrator.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Still alive after several failing passes
        assert!(hydrator.is_running());
        hydrator.stop().await;
        assert!(!hydrator.is_running());
    }

    #[tokio::test]
    async fn test_stop_before_startup_delay() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(AuditCache::new(AuditSettings::default()));
        let settings = HydratorSettings {
            startup_delay: Duration::from_secs(60),
            ..fast_settings()
        };
        let hydrator = CacheHydrator::new(settings, provider.clone(), cache);

        hydrator.start();
        hydrator.stop().await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
