//! Pure verification helpers: extraction from emails and page classification.

pub mod classify;
pub mod extract;

pub use classify::{Classification, Outcome, classify, classify_detailed};
pub use extract::{LinkExtractor, build_link, extract_token, extract_verification_id};
