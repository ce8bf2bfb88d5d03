//! Batching planner
//!
//! Splits the ordered expert roster into provider-compliant request groups.
//! The orchestrator only depends on [`BatchPlanner`], so the positional and
//! calendar-count strategies are interchangeable.

use tracing::warn;

use crate::config::{BatchingStrategy, ProviderConfig, PROVIDER_MAX_MEMBERS};
use crate::error::ValidationError;
use crate::models::ExpertRecord;

/// Strategy for grouping experts into provider requests
pub trait BatchPlanner: Send + Sync {
    /// Split `experts` into ordered, contiguous batches
    fn plan(&self, experts: &[ExpertRecord]) -> Vec<Vec<ExpertRecord>>;

    /// Upper bound on members per batch
    fn max_batch_size(&self) -> usize;
}

/// Split `items` into contiguous groups of at most `max_per_batch`
///
/// Fails fast when `max_per_batch` is zero or above the provider limit.
pub fn partition<T: Clone>(items: &[T], max_per_batch: usize) -> Result<Vec<Vec<T>>, ValidationError> {
    check_batch_size(max_per_batch)?;
    Ok(items.chunks(max_per_batch).map(|c| c.to_vec()).collect())
}

fn check_batch_size(max_per_batch: usize) -> Result<(), ValidationError> {
    if max_per_batch == 0 {
        return Err(ValidationError::InvalidBatchSize);
    }
    if max_per_batch > PROVIDER_MAX_MEMBERS {
        return Err(ValidationError::BatchTooLarge {
            size: max_per_batch,
            max: PROVIDER_MAX_MEMBERS,
        });
    }
    Ok(())
}

/// Purely positional batches
#[derive(Debug, Clone, Copy)]
pub struct PositionalPlanner {
    max_per_batch: usize,
}

impl PositionalPlanner {
    pub fn new(max_per_batch: usize) -> Result<Self, ValidationError> {
        check_batch_size(max_per_batch)?;
        Ok(Self { max_per_batch })
    }
}

impl BatchPlanner for PositionalPlanner {
    fn plan(&self, experts: &[ExpertRecord]) -> Vec<Vec<ExpertRecord>> {
        experts
            .chunks(self.max_per_batch)
            .map(|c| c.to_vec())
            .collect()
    }

    fn max_batch_size(&self) -> usize {
        self.max_per_batch
    }
}

/// Greedy packing bounded by members and by total calendars per request
///
/// Order is preserved. An expert whose own calendar count exceeds the limit
/// is placed in a batch by itself.
#[derive(Debug, Clone, Copy)]
pub struct CalendarCountPlanner {
    max_per_batch: usize,
    max_calendars: usize,
}

impl CalendarCountPlanner {
    pub fn new(max_per_batch: usize, max_calendars: usize) -> Result<Self, ValidationError> {
        check_batch_size(max_per_batch)?;
        if max_calendars == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        Ok(Self {
            max_per_batch,
            max_calendars,
        })
    }
}

impl BatchPlanner for CalendarCountPlanner {
    fn plan(&self, experts: &[ExpertRecord]) -> Vec<Vec<ExpertRecord>> {
        let mut batches = Vec::new();
        let mut current: Vec<ExpertRecord> = Vec::new();
        let mut calendars = 0usize;

        for expert in experts {
            let count = expert.calendar_ids.len();
            if count > self.max_calendars {
                warn!(
                    uid = %expert.bubble_uid,
                    calendars = count,
                    max_calendars = self.max_calendars,
                    "Expert exceeds per-request calendar limit, sending alone"
                );
            }

            let full = current.len() >= self.max_per_batch
                || (!current.is_empty() && calendars + count > self.max_calendars);
            if full {
                batches.push(std::mem::take(&mut current));
                calendars = 0;
            }

            calendars += count;
            current.push(expert.clone());
        }

        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    fn max_batch_size(&self) -> usize {
        self.max_per_batch
    }
}

/// Build the planner selected by configuration
pub fn planner_from_config(config: &ProviderConfig) -> Result<Box<dyn BatchPlanner>, ValidationError> {
    Ok(match config.batching {
        BatchingStrategy::Positional => Box::new(PositionalPlanner::new(config.max_batch_size)?),
        BatchingStrategy::CalendarCount => Box::new(CalendarCountPlanner::new(
            config.max_batch_size,
            config.max_calendars_per_request,
        )?),
    })
}
