//! Message aggregate - one send to one recipient and its outcome.

pub mod state;
pub mod transitions;

pub use state::*;
