//! Inbox monitor: one repeating job per submitted verification.
//!
//! The ticker only schedules: every interval it enqueues a `MonitorTick` into
//! the user's actor and waits for the actor to finish that tick, so ticks
//! never overlap. All record mutation happens inside the actor.

use std::sync::Weak;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Shared, UserEvent};
use crate::config::EngineConfig;
use crate::conversation::prompts;
use crate::error::Error;
use crate::ports::{MailSummary, Organization};
use crate::verification::{Outcome, classify_detailed};

/// Maximum page excerpt included in diagnostic notices.
const SNIPPET_CHARS: usize = 500;

/// State of one in-flight inbox watch.
#[derive(Debug)]
pub struct MonitorRecord {
    pub job_id: Uuid,
    pub address: String,
    pub verification_id: String,
    pub original_url: String,
    pub full_name: String,
    pub organization: Organization,
    pub polls: u32,
    pub started_at: DateTime<Utc>,
    pub(crate) ticker: JoinHandle<()>,
}

/// Whether a listed message looks like the verification email.
pub fn is_verification_mail(mail: &MailSummary, config: &EngineConfig) -> bool {
    let marker_in = |field: &str, marker: &str| {
        !marker.is_empty() && field.to_lowercase().contains(&marker.to_lowercase())
    };
    marker_in(&mail.from, &config.sender_marker) || marker_in(&mail.subject, &config.subject_marker)
}

pub(crate) fn spawn_ticker(
    shared: Weak<Shared>,
    user_id: String,
    job_id: Uuid,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let (done_tx, done_rx) = oneshot::channel();
            {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                shared.enqueue(&user_id, UserEvent::MonitorTick { job_id, done: done_tx });
            }

            if done_rx.await.is_err() {
                debug!(%user_id, %job_id, "Monitor deregistered, ticker stopping");
                return;
            }
        }
    })
}

/// Deregister the job and delete its mailbox.
pub(crate) async fn retire(shared: &Shared, record: MonitorRecord) {
    record.ticker.abort();
    if !shared.deps.mailbox.delete(&record.address).await {
        warn!(address = %record.address, "Mailbox delete not confirmed");
    }
}

/// One poll pass. `Ok(None)` means nothing yet; `Ok(Some(_))` is terminal and
/// the user has already been notified.
pub(crate) async fn poll(
    shared: &Shared,
    chat_id: &str,
    record: &MonitorRecord,
) -> Result<Option<Outcome>, Error> {
    let config = &shared.config;
    let mailbox = &shared.deps.mailbox;
    let address = record.address.as_str();

    let messages = config
        .retry
        .run("inbox list", move || mailbox.list(address))
        .await?;

    if messages.is_empty() {
        debug!(%address, polls = record.polls, "Inbox empty");
        return Ok(None);
    }

    let Some(mail) = messages.iter().find(|m| is_verification_mail(m, config)) else {
        debug!(%address, count = messages.len(), "No verification email among messages");
        return Ok(None);
    };

    info!(%address, from = %mail.from, subject = %mail.subject, "Verification email received");
    let progress = shared
        .notify(chat_id, &prompts::email_received(&mail.from, &mail.subject))
        .await;

    let id = mail.id.as_str();
    let body = config
        .retry
        .run("inbox fetch", move || mailbox.fetch(address, id))
        .await?;

    let link = match shared
        .links
        .resolve(&body, &record.original_url, &record.verification_id)
    {
        Ok(link) => link,
        Err(e) => {
            warn!(%address, "Extraction failed: {e}");
            shared
                .notify_replacing(chat_id, progress.as_ref(), prompts::extraction_failed())
                .await;
            return Ok(Some(Outcome::Error));
        }
    };

    let visit = match shared.deps.browser.visit(&link, config.browser_timeout).await {
        Ok(visit) => visit,
        Err(e) => {
            warn!(%link, "Browser automation failed: {e}");
            shared
                .notify_replacing(chat_id, progress.as_ref(), &prompts::automation_failed(&e.to_string()))
                .await;
            return Ok(Some(Outcome::Error));
        }
    };

    let text = visit.text();
    let classification = classify_detailed(text, &visit.final_url);
    info!(
        final_url = %visit.final_url,
        status = ?visit.status,
        outcome = %classification.outcome,
        matched = ?classification.matched,
        "Verification page classified"
    );

    let org = record.organization.name.as_str();
    let notice = match classification.outcome {
        outcome @ (Outcome::Approved | Outcome::NotApproved) => {
            let status = match shared.deps.submitter.status(&record.verification_id).await {
                Ok(step) => Some(step),
                Err(e) => {
                    warn!(verification_id = %record.verification_id, "Status check failed: {e}");
                    None
                }
            };
            prompts::outcome(outcome, &record.full_name, org, &link, status.as_deref())
        }
        outcome @ (Outcome::DocumentRequired | Outcome::PendingReview) => {
            prompts::outcome(outcome, &record.full_name, org, &link, None)
        }
        Outcome::Unknown | Outcome::Timeout | Outcome::Error => prompts::unknown_outcome(
            &visit.final_url,
            visit.status,
            &prompts::truncate(text, SNIPPET_CHARS),
        ),
    };

    shared
        .notify_replacing(chat_id, progress.as_ref(), &notice)
        .await;
    Ok(Some(classification.outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail(from: &str, subject: &str) -> MailSummary {
        MailSummary {
            id: "m1".into(),
            from: from.into(),
            subject: subject.into(),
        }
    }

    #[test]
    fn matches_sender_marker_case_insensitively() {
        let config = EngineConfig::default();
        assert!(is_verification_mail(&mail("No-Reply@SheerID.com", "Hello"), &config));
    }

    #[test]
    fn matches_subject_marker() {
        let config = EngineConfig::default();
        assert!(is_verification_mail(&mail("x@y.z", "Please VERIFY your email"), &config));
    }

    #[test]
    fn ignores_unrelated_mail() {
        let config = EngineConfig::default();
        assert!(!is_verification_mail(&mail("news@shop.test", "Weekly deals"), &config));
    }

    #[test]
    fn empty_marker_never_matches() {
        let config = EngineConfig {
            sender_marker: String::new(),
            subject_marker: String::new(),
            ..EngineConfig::default()
        };
        assert!(!is_verification_mail(&mail("a@b.c", "verify"), &config));
    }
}
