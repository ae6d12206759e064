//! Conversation state machine: tracks which step each user is in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ports::Organization;
use crate::verification::extract_verification_id;

/// Conversational steps.
///
/// Progresses linearly: AwaitingVerificationUrl → AwaitingFullName →
/// AwaitingSchoolName → AwaitingOrganizationSelection → Terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    AwaitingVerificationUrl,
    AwaitingFullName,
    AwaitingSchoolName,
    AwaitingOrganizationSelection,
    Terminal,
}

impl Step {
    /// Steps that carry a deadline. Selection is out-of-band and has none.
    pub const TIMED: [Step; 3] = [
        Step::AwaitingVerificationUrl,
        Step::AwaitingFullName,
        Step::AwaitingSchoolName,
    ];

    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: Step) -> bool {
        use Step::*;
        matches!(
            (self, target),
            (AwaitingVerificationUrl, AwaitingFullName)
                | (AwaitingFullName, AwaitingSchoolName)
                | (AwaitingSchoolName, AwaitingOrganizationSelection)
                | (AwaitingOrganizationSelection, Terminal)
        )
    }

    /// Get the next step in the linear progression, if any.
    pub fn next(&self) -> Option<Step> {
        use Step::*;
        match self {
            AwaitingVerificationUrl => Some(AwaitingFullName),
            AwaitingFullName => Some(AwaitingSchoolName),
            AwaitingSchoolName => Some(AwaitingOrganizationSelection),
            AwaitingOrganizationSelection => Some(Terminal),
            Terminal => None,
        }
    }

    /// Whether this step arms a deadline on entry.
    pub fn is_timed(&self) -> bool {
        Self::TIMED.contains(self)
    }

    /// Short name used in timer keys and logs.
    pub fn timer_name(&self) -> &'static str {
        match self {
            Self::AwaitingVerificationUrl => "URL",
            Self::AwaitingFullName => "NAME",
            Self::AwaitingSchoolName => "SCHOOL",
            Self::AwaitingOrganizationSelection => "SELECT",
            Self::Terminal => "DONE",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingVerificationUrl => "awaiting_verification_url",
            Self::AwaitingFullName => "awaiting_full_name",
            Self::AwaitingSchoolName => "awaiting_school_name",
            Self::AwaitingOrganizationSelection => "awaiting_organization_selection",
            Self::Terminal => "terminal",
        };
        write!(f, "{s}")
    }
}

/// Per-user conversational state. Lives only inside the user's actor.
#[derive(Debug, Clone)]
pub struct Session {
    pub step: Step,
    pub verification_id: Option<String>,
    pub original_url: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub school_query: Option<String>,
    /// Candidates shown to the user, indexed by position for selection.
    pub candidates: Vec<Organization>,
    pub organization: Option<Organization>,
    pub started_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            step: Step::AwaitingVerificationUrl,
            verification_id: None,
            original_url: None,
            first_name: None,
            last_name: None,
            full_name: None,
            school_query: None,
            candidates: Vec::new(),
            organization: None,
            started_at: Utc::now(),
        }
    }
}

impl Session {
    /// Advance to the next step. Returns an error if already terminal.
    pub fn advance(&mut self) -> Result<Step, String> {
        let next = self
            .step
            .next()
            .ok_or_else(|| "Already at terminal step".to_string())?;
        if !self.step.can_transition_to(next) {
            return Err(format!("Cannot transition from {} to {}", self.step, next));
        }
        self.step = next;
        Ok(next)
    }

    /// Validate and store the verification URL.
    pub fn accept_url(&mut self, input: &str) -> Result<(), ValidationError> {
        let raw = input.trim();
        let id = extract_verification_id(raw)
            .ok_or_else(|| ValidationError::MissingVerificationId(raw.to_string()))?;
        self.verification_id = Some(id);
        self.original_url = Some(raw.to_string());
        Ok(())
    }

    /// Validate and store the applicant's name. First token is the first name.
    pub fn accept_name(&mut self, input: &str) -> Result<(), ValidationError> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.len() < 2 {
            return Err(ValidationError::IncompleteName(input.trim().to_string()));
        }
        self.first_name = Some(parts[0].to_string());
        self.last_name = Some(parts[1..].join(" "));
        self.full_name = Some(parts.join(" "));
        Ok(())
    }
}

/// Merge per-category search results, de-duplicating by id and truncating.
pub fn merge_candidates(batches: Vec<Vec<Organization>>, limit: usize) -> Vec<Organization> {
    let mut seen = std::collections::HashSet::new();
    batches
        .into_iter()
        .flatten()
        .filter(|org| !org.id.is_empty() && seen.insert(org.id.clone()))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://svc.example.com/verify/abc/?verificationId=0123456789abcdef01234567";

    fn org(id: &str) -> Organization {
        Organization {
            id: id.into(),
            name: format!("School {id}"),
            city: None,
            state: None,
            kind: "K12".into(),
        }
    }

    #[test]
    fn valid_transitions() {
        use Step::*;
        let transitions = [
            (AwaitingVerificationUrl, AwaitingFullName),
            (AwaitingFullName, AwaitingSchoolName),
            (AwaitingSchoolName, AwaitingOrganizationSelection),
            (AwaitingOrganizationSelection, Terminal),
        ];
        for (from, to) in transitions {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use Step::*;
        assert!(!AwaitingVerificationUrl.can_transition_to(AwaitingSchoolName));
        assert!(!AwaitingSchoolName.can_transition_to(AwaitingFullName));
        assert!(!Terminal.can_transition_to(AwaitingVerificationUrl));
        assert!(!AwaitingFullName.can_transition_to(AwaitingFullName));
    }

    #[test]
    fn only_conversational_steps_are_timed() {
        assert!(Step::AwaitingVerificationUrl.is_timed());
        assert!(Step::AwaitingSchoolName.is_timed());
        assert!(!Step::AwaitingOrganizationSelection.is_timed());
        assert!(!Step::Terminal.is_timed());
    }

    #[test]
    fn display_matches_serde() {
        use Step::*;
        for step in [
            AwaitingVerificationUrl,
            AwaitingFullName,
            AwaitingSchoolName,
            AwaitingOrganizationSelection,
            Terminal,
        ] {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(format!("\"{step}\""), json, "mismatch for {step:?}");
        }
    }

    #[test]
    fn session_advance_walks_all_steps() {
        let mut session = Session::default();
        for expected in [
            Step::AwaitingFullName,
            Step::AwaitingSchoolName,
            Step::AwaitingOrganizationSelection,
            Step::Terminal,
        ] {
            assert_eq!(session.advance().unwrap(), expected);
        }
        assert!(session.advance().is_err());
    }

    #[test]
    fn accept_url_stores_id_and_raw_url() {
        let mut session = Session::default();
        session.accept_url(&format!("  {URL}  ")).unwrap();
        assert_eq!(
            session.verification_id.as_deref(),
            Some("0123456789abcdef01234567")
        );
        assert_eq!(session.original_url.as_deref(), Some(URL));
    }

    #[test]
    fn accept_url_rejects_missing_id() {
        let mut session = Session::default();
        let err = session.accept_url("https://svc.example.com/verify/abc/").unwrap_err();
        assert!(matches!(err, ValidationError::MissingVerificationId(_)));
        assert!(session.verification_id.is_none());
    }

    #[test]
    fn accept_name_splits_first_and_rest() {
        let mut session = Session::default();
        session.accept_name("  Mary   Ann  van Dyke ").unwrap();
        assert_eq!(session.first_name.as_deref(), Some("Mary"));
        assert_eq!(session.last_name.as_deref(), Some("Ann van Dyke"));
        assert_eq!(session.full_name.as_deref(), Some("Mary Ann van Dyke"));
    }

    #[test]
    fn accept_name_requires_two_tokens() {
        let mut session = Session::default();
        for input in ["", "   ", "Cher"] {
            assert!(session.accept_name(input).is_err(), "{input:?} should fail");
        }
        assert!(session.first_name.is_none());
    }

    #[test]
    fn merge_dedups_and_truncates() {
        let merged = merge_candidates(
            vec![vec![org("1"), org("2")], vec![org("2"), org(""), org("3")]],
            20,
        );
        let ids: Vec<&str> = merged.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);

        let many: Vec<Organization> = (0..30).map(|i| org(&i.to_string())).collect();
        assert_eq!(merge_candidates(vec![many], 20).len(), 20);
    }
}
