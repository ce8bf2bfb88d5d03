//! Domain models for expert-availability
//!
//! This module contains the core domain models used throughout the application.

pub mod availability;
pub mod expert;
pub mod ledger;

// Re-export commonly used types
pub use availability::{
    AvailabilityLookup, AvailabilityQuery, AvailableSlot, BatchAvailability, BatchMember, ExpertAvailability,
    ExpertOutcome, RefreshOutcome, SearchRecord, SlotParticipant, SyncReport,
};
pub use expert::{
    normalize_calendar_ids, AdHocTarget, AvailabilityTarget, ExpertInput, ExpertRecord, NewExpert,
};
pub use ledger::{
    render_local_time, AvailabilityErrorEntry, AvailabilityFailure, REASON_PROCESSING_ERROR,
    REASON_PROVIDER_ERROR,
};
