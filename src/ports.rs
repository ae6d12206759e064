//! Collaborator interfaces consumed by the engine.
//!
//! Concrete transports live outside the engine. Only the messaging front-end
//! ships an implementation in this crate (`channels::telegram`).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AutomationError, ChannelError, MailboxError, ServiceError};

// ── Messaging front-end ─────────────────────────────────────────────

/// Handle to a previously sent message, used for edit/delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHandle {
    pub chat_id: String,
    pub message_id: String,
}

/// One selectable option presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    /// Opaque payload echoed back in the selection event.
    pub payload: String,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text message.
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<MessageHandle, ChannelError>;

    /// Send a text message with a list of selectable choices.
    async fn send_choices(
        &self,
        chat_id: &str,
        text: &str,
        choices: &[Choice],
    ) -> Result<MessageHandle, ChannelError>;

    /// Replace the text of a previously sent message.
    async fn edit_text(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError>;

    /// Delete a previously sent message.
    async fn delete(&self, handle: &MessageHandle) -> Result<(), ChannelError>;
}

// ── Disposable mailbox ──────────────────────────────────────────────

/// Summary entry from an inbox listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailSummary {
    pub id: String,
    pub from: String,
    pub subject: String,
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Provision a new mailbox, returning its address.
    async fn create(&self) -> Result<String, MailboxError>;

    /// List messages currently in the mailbox.
    async fn list(&self, address: &str) -> Result<Vec<MailSummary>, MailboxError>;

    /// Fetch the plain-text body of a message.
    async fn fetch(&self, address: &str, id: &str) -> Result<String, MailboxError>;

    /// Delete the mailbox. Returns whether the provider confirmed it.
    async fn delete(&self, address: &str) -> bool;
}

// ── Headless browser ────────────────────────────────────────────────

/// What the browser saw after navigation settled.
#[derive(Debug, Clone, Default)]
pub struct PageVisit {
    pub final_url: String,
    pub status: Option<u16>,
    /// Rendered visible text, if the driver could extract it.
    pub body_text: Option<String>,
    /// Raw page markup, used when visible text is unavailable.
    pub markup: String,
}

impl PageVisit {
    /// Visible text, falling back to markup.
    pub fn text(&self) -> &str {
        self.body_text.as_deref().unwrap_or(&self.markup)
    }
}

#[async_trait]
pub trait Browser: Send + Sync {
    /// Navigate to `url`. Must return `AutomationError::Timeout` on timeout.
    async fn visit(&self, url: &str, timeout: Duration) -> Result<PageVisit, AutomationError>;
}

// ── Organization search ─────────────────────────────────────────────

/// A search result the applicant may select as their affiliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl Organization {
    /// "City, ST" or whichever parts are known.
    pub fn location(&self) -> String {
        [self.city.as_deref(), self.state.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
pub trait OrganizationSearch: Send + Sync {
    async fn search(
        &self,
        country: &str,
        kind: &str,
        name: &str,
    ) -> Result<Vec<Organization>, ServiceError>;
}

// ── Verification service ────────────────────────────────────────────

/// Applicant data exactly as the user supplied it, plus the contact mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub verification_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub organization: Organization,
}

#[async_trait]
pub trait Submitter: Send + Sync {
    /// Submit the application for the given verification.
    async fn submit(&self, application: &Application) -> Result<(), ServiceError>;

    /// The service's current step for this verification.
    async fn status(&self, verification_id: &str) -> Result<String, ServiceError>;
}
