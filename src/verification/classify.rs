//! Outcome classification from rendered page text and final URL.
//!
//! Rules are evaluated strictly in table order. Rejection is checked before
//! success, so a page mixing an error notice with a congratulations banner
//! classifies as `NotApproved`.

use serde::{Deserialize, Serialize};

/// Result of a verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Approved,
    NotApproved,
    DocumentRequired,
    PendingReview,
    Unknown,
    Timeout,
    Error,
}

impl Outcome {
    /// Short human-readable label for notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::NotApproved => "NOT APPROVED",
            Self::DocumentRequired => "DOCUMENTS REQUESTED",
            Self::PendingReview => "PENDING REVIEW",
            Self::Unknown => "UNKNOWN",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::NotApproved => "not_approved",
            Self::DocumentRequired => "document_required",
            Self::PendingReview => "pending_review",
            Self::Unknown => "unknown",
            Self::Timeout => "timeout",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// One classification rule: matches if any text or URL keyword is a substring.
#[derive(Debug)]
pub struct Rule {
    pub outcome: Outcome,
    pub text: &'static [&'static str],
    pub url: &'static [&'static str],
}

/// Priority-ordered rule table. Do not reorder.
pub static RULES: &[Rule] = &[
    Rule {
        outcome: Outcome::NotApproved,
        text: &[
            "not approved",
            "we are unable",
            "could not verify",
            "unable to verify",
            "verification failed",
            "try again",
            "error",
            "source error",
            "cannot verify",
            "no match found",
            "could not be verified",
        ],
        url: &["error", "failed", "notapproved", "unable"],
    },
    Rule {
        outcome: Outcome::Approved,
        text: &[
            "verified successfully",
            "status verified",
            "successfully verified",
            "verification successful",
            "you are verified",
            "approved",
            "congratulations",
            "eligibility confirmed",
        ],
        url: &["success", "verified", "complete", "approved"],
    },
    Rule {
        outcome: Outcome::DocumentRequired,
        text: &[
            "upload document",
            "document required",
            "please upload",
            "provide documentation",
            "add document",
        ],
        url: &[],
    },
    Rule {
        outcome: Outcome::PendingReview,
        text: &[
            "pending review",
            "under review",
            "being reviewed",
            "manual review",
        ],
        url: &[],
    },
];

/// Outcome plus the keyword that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub outcome: Outcome,
    pub matched: Option<&'static str>,
}

/// Classify a visited page.
pub fn classify(text: &str, final_url: &str) -> Outcome {
    classify_detailed(text, final_url).outcome
}

/// Classify a visited page, reporting which keyword matched.
pub fn classify_detailed(text: &str, final_url: &str) -> Classification {
    let text = text.to_lowercase();
    let url = final_url.to_lowercase();

    for rule in RULES {
        let hit = rule
            .text
            .iter()
            .find(|kw| text.contains(*kw))
            .or_else(|| rule.url.iter().find(|kw| url.contains(*kw)));
        if let Some(kw) = hit {
            return Classification {
                outcome: rule.outcome,
                matched: Some(*kw),
            };
        }
    }

    Classification {
        outcome: Outcome::Unknown,
        matched: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEUTRAL_URL: &str = "https://svc.example.com/verify/abc/";

    #[test]
    fn rejection_wins_over_success() {
        let text = "Congratulations, however verification failed — error.";
        assert_eq!(classify(text, NEUTRAL_URL), Outcome::NotApproved);
    }

    #[test]
    fn rule_table_priority_is_fixed() {
        let order: Vec<Outcome> = RULES.iter().map(|r| r.outcome).collect();
        assert_eq!(
            order,
            vec![
                Outcome::NotApproved,
                Outcome::Approved,
                Outcome::DocumentRequired,
                Outcome::PendingReview,
            ]
        );
    }

    #[test]
    fn success_text() {
        assert_eq!(
            classify("You are VERIFIED. Enjoy!", NEUTRAL_URL),
            Outcome::Approved
        );
    }

    #[test]
    fn url_keywords_count() {
        assert_eq!(
            classify("Loading...", "https://svc.example.com/verify/abc/Success"),
            Outcome::Approved
        );
        assert_eq!(
            classify("Loading...", "https://svc.example.com/NotApproved"),
            Outcome::NotApproved
        );
    }

    #[test]
    fn error_url_beats_success_text() {
        assert_eq!(
            classify("Congratulations", "https://svc.example.com/failed"),
            Outcome::NotApproved
        );
    }

    #[test]
    fn document_before_pending() {
        let text = "Please upload a document. Your file is under review once received.";
        assert_eq!(classify(text, NEUTRAL_URL), Outcome::DocumentRequired);
    }

    #[test]
    fn pending_review() {
        assert_eq!(
            classify("Your request is being reviewed by our team", NEUTRAL_URL),
            Outcome::PendingReview
        );
    }

    #[test]
    fn nothing_matches_is_unknown() {
        let c = classify_detailed("Hello there", NEUTRAL_URL);
        assert_eq!(c.outcome, Outcome::Unknown);
        assert_eq!(c.matched, None);
    }

    #[test]
    fn detailed_reports_keyword() {
        let c = classify_detailed("No match found for applicant", NEUTRAL_URL);
        assert_eq!(c.outcome, Outcome::NotApproved);
        assert_eq!(c.matched, Some("no match found"));
    }

    #[test]
    fn display_matches_serde() {
        let all = [
            Outcome::Approved,
            Outcome::NotApproved,
            Outcome::DocumentRequired,
            Outcome::PendingReview,
            Outcome::Unknown,
            Outcome::Timeout,
            Outcome::Error,
        ];
        for outcome in all {
            let json = serde_json::to_string(&outcome).unwrap();
            assert_eq!(format!("\"{outcome}\""), json);
        }
    }
}
