//! expert-availability - Expert calendar availability sync engine
//!
//! This crate keeps a store of experts and their calendars, periodically
//! queries an external free/busy provider in batches, records the earliest
//! bookable slot per expert and keeps an error ledger of experts whose last
//! check failed.

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod experts;
pub mod models;
pub mod provider;
pub mod search;
pub mod server;
pub mod sync;
pub mod telemetry;
