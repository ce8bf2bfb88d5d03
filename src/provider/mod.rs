//! Availability provider abstraction
//!
//! The orchestrator talks to the external free/busy API only through
//! [`AvailabilityProvider`]. [`cronofy::CronofyClient`] is the production
//! implementation; tests substitute a mock.

pub mod cronofy;

pub use cronofy::CronofyClient;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::models::{AvailabilityQuery, AvailabilityTarget, BatchAvailability, BatchMember};

/// Batched availability lookups against an external provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    /// Maximum members accepted in one call
    fn max_batch_size(&self) -> usize;

    /// Whether credentials are present; unconfigured providers resolve
    /// every member to unknown availability without calling out
    fn is_configured(&self) -> bool;

    /// Query one batch and reconcile the per-member results
    ///
    /// Returns one entry per member in request order. Whole-batch failures
    /// (exhausted retries, terminal status, malformed body) are errors.
    async fn fetch_batch(
        &self,
        members: &[BatchMember],
        query: &AvailabilityQuery,
    ) -> Result<BatchAvailability, ProviderError>;
}

/// Query availability for any targets, stored or ad hoc
pub async fn fetch_for<P, T>(
    provider: &P,
    targets: &[T],
    query: &AvailabilityQuery,
) -> Result<BatchAvailability, ProviderError>
where
    P: AvailabilityProvider + ?Sized,
    T: AvailabilityTarget,
{
    let members: Vec<BatchMember> = targets.iter().map(BatchMember::from_target).collect();
    provider.fetch_batch(&members, query).await
}
