//! Verify Flow: conversational eligibility-verification orchestrator.

pub mod channels;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod ports;
pub mod retry;
pub mod verification;
