//! User-facing message text.

use std::time::Duration;

use crate::ports::{Choice, Organization};
use crate::verification::Outcome;

/// Payload prefix for organization selection callbacks.
pub const SELECT_PREFIX: &str = "select:";

pub fn welcome(step_timeout: Duration) -> String {
    format!(
        "*Eligibility verification*\n\n\
         Step 1/3: send your verification URL.\n\
         It must contain `verificationId=` followed by 24 hex characters.\n\n\
         Each step times out after {} minutes. Send /cancel to stop.",
        step_timeout.as_secs().div_ceil(60)
    )
}

pub fn invalid_url() -> &'static str {
    "That doesn't look like a verification URL. It must contain \
     `verificationId=` followed by 24 hex characters. Please try again."
}

pub fn ask_name(verification_id: &str) -> String {
    format!(
        "Verification ID: `{verification_id}`\n\n\
         Step 2/3: send your full name (first and last)."
    )
}

pub fn invalid_name() -> &'static str {
    "Please send both your first and last name, e.g. `John Smith`."
}

pub fn ask_school(full_name: &str) -> String {
    format!("Name: *{full_name}*\n\nStep 3/3: send your school name to search.")
}

pub fn searching(query: &str) -> String {
    format!("Searching for `{query}`...")
}

pub fn no_results(query: &str) -> String {
    format!(
        "No schools found for `{query}`, or the search service did not respond.\n\n\
         Send /start to try again with a different name."
    )
}

pub fn results_header(query: &str, count: usize) -> String {
    format!("Found {count} result(s) for `{query}`. Select your school:")
}

/// One choice per candidate, payload carrying its list index.
pub fn candidate_choices(candidates: &[Organization]) -> Vec<Choice> {
    candidates
        .iter()
        .enumerate()
        .map(|(idx, org)| {
            let location = org.location();
            let label = if location.is_empty() {
                org.name.clone()
            } else {
                format!("{} ({location})", org.name)
            };
            Choice {
                label,
                payload: format!("{SELECT_PREFIX}{idx}"),
            }
        })
        .collect()
}

/// Parse a selection payload back to a list index.
pub fn parse_selection(payload: &str) -> Option<usize> {
    payload.strip_prefix(SELECT_PREFIX)?.parse().ok()
}

pub fn selection_expired() -> &'static str {
    "This selection is no longer active. Send /start to begin again."
}

pub fn submitting(org: &Organization) -> String {
    format!("Selected: *{}*\n\nSubmitting your application...", org.name)
}

pub fn submit_failed(reason: &str) -> String {
    format!("Submission failed: {reason}\n\nSend /start to try again.")
}

pub fn monitoring(address: &str, interval: Duration, budget: u32) -> String {
    let total = interval.saturating_mul(budget);
    format!(
        "Application submitted.\n\n\
         Watching `{address}` for the confirmation email \
         (every {}s, up to {}s). You'll be notified of the result.",
        interval.as_secs(),
        total.as_secs()
    )
}

pub fn step_expired(step_name: &str) -> String {
    format!("Step {step_name} timed out. Send /start to begin again.")
}

pub fn cancelled() -> &'static str {
    "Cancelled. Send /start to begin again."
}

pub fn not_started() -> &'static str {
    "Send /start to begin a verification."
}

pub fn already_monitoring() -> &'static str {
    "A verification is still being monitored. Send /cancel to stop it first."
}

pub fn email_received(from: &str, subject: &str) -> String {
    format!("Verification email received.\nFrom: `{from}`\nSubject: `{subject}`\n\nOpening link...")
}

pub fn extraction_failed() -> &'static str {
    "The verification email contained no usable link or token.\n\nSend /start to try again."
}

pub fn automation_failed(error: &str) -> String {
    format!("Could not open the verification link: {error}\n\nSend /start to try again.")
}

pub fn monitor_timeout(address: &str) -> String {
    format!(
        "No verification email arrived at `{address}` in time.\n\n\
         Send /start to try again."
    )
}

/// Terminal outcome notice.
pub fn outcome(
    outcome: Outcome,
    name: &str,
    organization: &str,
    link: &str,
    service_status: Option<&str>,
) -> String {
    let detail = match outcome {
        Outcome::Approved => "Verification approved.".to_string(),
        Outcome::NotApproved => "Verification was not approved.".to_string(),
        Outcome::PendingReview => {
            "Your verification is in manual review. The service will follow up by email."
                .to_string()
        }
        Outcome::DocumentRequired => format!(
            "The service is asking for supporting documents. \
             Open the link below and provide them yourself:\n{link}"
        ),
        Outcome::Unknown | Outcome::Timeout | Outcome::Error => {
            "The result could not be determined.".to_string()
        }
    };
    let mut text = format!(
        "*{}*\n\n{detail}\n\nName: {name}\nSchool: {organization}",
        outcome.label()
    );
    if let Some(status) = service_status {
        text.push_str(&format!("\nService step: `{status}`"));
    }
    text
}

/// Diagnostic notice for an unclassifiable page.
pub fn unknown_outcome(final_url: &str, status: Option<u16>, snippet: &str) -> String {
    let status = status.map_or_else(|| "n/a".to_string(), |s| s.to_string());
    format!(
        "*UNKNOWN*\n\nThe result page could not be classified. Please check manually.\n\n\
         URL: {final_url}\nHTTP status: {status}\nPage excerpt:\n{snippet}"
    )
}

/// Truncate on a char boundary, appending an ellipsis when cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
