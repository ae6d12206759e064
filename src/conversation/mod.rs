//! Conversational data collection: session state and user-facing prompts.

pub mod prompts;
pub mod state;

pub use state::{Session, Step, merge_candidates};
