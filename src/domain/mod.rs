//! Core domain types for the campaign dispatch engine.
//!
//! This module contains pure domain types with no persistence dependencies:
//! - Campaigns, their recipient filter and typestate lifecycle
//! - Messages and their typestate lifecycle
//! - Recipients
//! - Per-campaign statistics

pub mod campaign;
pub mod message;
pub mod recipient;
pub mod stats;

// Note: We don't use glob re-exports here, both campaign and message have
// `state` and `transitions` submodules with overlapping state names.
