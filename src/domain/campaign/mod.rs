//! Campaign aggregate - domain model and state transitions.
//!
//! This module contains the core domain logic for campaigns:
//! - Campaign types and states (typestate pattern)
//! - State transition methods
//! - Value objects (CampaignData, RecipientFilter, etc.)

pub mod state;
pub mod transitions;

pub use state::*;
