//! Expert manager
//!
//! Write and read paths for stored experts. Every write invalidates the
//! cached listing; deletes also drop the expert's ledger entry.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{TtlCache, EXPERT_LIST_KEY};
use crate::database::Database;
use crate::error::{AppError, ValidationError};
use crate::models::{AvailabilityErrorEntry, ExpertInput, ExpertRecord, NewExpert};

/// Expert CRUD over the record store
pub struct ExpertManager<D: Database> {
    db: Arc<D>,
    cache: Arc<TtlCache<Vec<ExpertRecord>>>,
}

impl<D: Database> ExpertManager<D> {
    pub fn new(db: Arc<D>, cache: Arc<TtlCache<Vec<ExpertRecord>>>) -> Self {
        Self { db, cache }
    }

    /// Create or update one expert
    pub async fn upsert(&self, input: ExpertInput) -> Result<ExpertRecord, AppError> {
        let expert = NewExpert::try_from(input)?;
        let record = self.db.upsert_expert(&expert).await?;
        self.cache.clear().await;
        Ok(record)
    }

    /// Validate a whole submission, then upsert it in order
    ///
    /// Nothing is written when any entry is invalid or when a uid or
    /// provider id repeats within the submission. A store error stops the
    /// loop; rows already written stay written and the cache is still cleared.
    pub async fn bulk_upsert(&self, inputs: Vec<ExpertInput>) -> Result<usize, AppError> {
        let experts = inputs
            .into_iter()
            .map(NewExpert::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        check_unique(&experts)?;

        let mut written = Ok(());
        for expert in &experts {
            if let Err(e) = self.db.upsert_expert(expert).await {
                written = Err(e);
                break;
            }
        }
        self.cache.clear().await;
        written?;

        info!(count = experts.len(), "Upserted experts");
        Ok(experts.len())
    }

    /// All experts, served from the cache when fresh
    pub async fn list_all(&self) -> Result<Vec<ExpertRecord>, AppError> {
        if let Some(experts) = self.cache.get(EXPERT_LIST_KEY).await {
            return Ok(experts);
        }

        let experts = self.db.list_experts().await?;
        self.cache.set(EXPERT_LIST_KEY, experts.clone()).await;
        Ok(experts)
    }

    pub async fn count(&self) -> Result<u64, AppError> {
        Ok(self.db.count_experts().await?)
    }

    pub async fn get_by_uid(&self, uid: &str) -> Result<ExpertRecord, AppError> {
        self.db
            .get_expert_by_uid(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(uid.to_string()))
    }

    pub async fn get_by_provider_id(&self, provider_id: &str) -> Result<ExpertRecord, AppError> {
        self.db
            .get_expert_by_provider_id(provider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(provider_id.to_string()))
    }

    pub async fn delete_by_uid(&self, uid: &str) -> Result<ExpertRecord, AppError> {
        let deleted = self
            .db
            .delete_expert_by_uid(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(uid.to_string()))?;
        self.after_delete(&deleted).await;
        Ok(deleted)
    }

    pub async fn delete_by_provider_id(&self, provider_id: &str) -> Result<ExpertRecord, AppError> {
        let deleted = self
            .db
            .delete_expert_by_provider_id(provider_id)
            .await?
            .ok_or_else(|| AppError::NotFound(provider_id.to_string()))?;
        self.after_delete(&deleted).await;
        Ok(deleted)
    }

    /// Current ledger, most recent first
    pub async fn list_errors(&self) -> Result<Vec<AvailabilityErrorEntry>, AppError> {
        Ok(self.db.list_availability_errors().await?)
    }

    pub async fn get_error(&self, uid: &str) -> Result<AvailabilityErrorEntry, AppError> {
        self.db
            .get_availability_error(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(uid.to_string()))
    }

    async fn after_delete(&self, deleted: &ExpertRecord) {
        if let Err(e) = self.db.clear_availability_error(&deleted.bubble_uid).await {
            warn!(
                uid = %deleted.bubble_uid,
                error = %e,
                "Failed to clear ledger entry for deleted expert"
            );
        }
        self.cache.clear().await;
        info!(uid = %deleted.bubble_uid, cronofy_id = %deleted.cronofy_id, "Deleted expert");
    }
}

fn check_unique(experts: &[NewExpert]) -> Result<(), ValidationError> {
    let mut uids = HashSet::new();
    let mut provider_ids = HashSet::new();

    for expert in experts {
        if !uids.insert(expert.bubble_uid.as_str()) {
            return Err(ValidationError::DuplicateKey {
                field: "bubble_uid",
                value: expert.bubble_uid.clone(),
            });
        }
        if !provider_ids.insert(expert.cronofy_id.as_str()) {
            return Err(ValidationError::DuplicateKey {
                field: "cronofy_id",
                value: expert.cronofy_id.clone(),
            });
        }
    }
    Ok(())
}
