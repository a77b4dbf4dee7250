//! Performance source backed by recorded analytics events.

use async_trait::async_trait;

use crate::core::store::Store;
use crate::domain::{Job, PerformanceMetrics};
use crate::learning::metrics::aggregate;

use super::{CollaboratorError, PerformanceSource};

/// Reads the job's events from the store and aggregates them
#[derive(Clone)]
pub struct StoreAnalytics {
    store: Store,
}

impl StoreAnalytics {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PerformanceSource for StoreAnalytics {
    async fn collect(&self, job: &Job) -> Result<PerformanceMetrics, CollaboratorError> {
        let events = self.store.analytics_events(job.id).await?;
        Ok(aggregate(&events))
    }
}
