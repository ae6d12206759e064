//! Per-user actor: owns the session and monitor record, handles events serially.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::monitor::{self, MonitorRecord};
use super::{InboundEvent, MonitorSnapshot, Shared, UserEvent, UserSnapshot};
use crate::conversation::{Session, Step, merge_candidates, prompts};
use crate::ports::Application;
use crate::verification::Outcome;

pub(super) fn spawn(shared: Arc<Shared>, user_id: String) -> mpsc::UnboundedSender<UserEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = UserActor {
        shared,
        user_id,
        chat_id: None,
        session: None,
        monitor: None,
        rx,
    };
    tokio::spawn(actor.run());
    tx
}

struct UserActor {
    shared: Arc<Shared>,
    user_id: String,
    chat_id: Option<String>,
    session: Option<Session>,
    monitor: Option<MonitorRecord>,
    rx: mpsc::UnboundedReceiver<UserEvent>,
}

impl UserActor {
    async fn run(mut self) {
        debug!(user_id = %self.user_id, "User actor started");
        while let Some(event) = self.rx.recv().await {
            self.handle(event).await;

            if self.is_idle() {
                let mut actors = self.shared.actors();
                if self.rx.is_empty() {
                    actors.remove(&self.user_id);
                    debug!(user_id = %self.user_id, "User actor idle, exiting");
                    return;
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.session.is_none() && self.monitor.is_none()
    }

    async fn handle(&mut self, event: UserEvent) {
        match event {
            UserEvent::Inbound(inbound) => {
                self.chat_id = Some(inbound.chat_id().to_string());
                match inbound {
                    InboundEvent::Start { .. } => self.on_start().await,
                    InboundEvent::Cancel { .. } => self.on_cancel().await,
                    InboundEvent::Text { text, .. } => self.on_text(&text).await,
                    InboundEvent::Select { payload, .. } => self.on_select(&payload).await,
                }
            }
            UserEvent::Timeout(fired) => {
                if !self.shared.timeouts.claim(&fired) {
                    debug!(user_id = %self.user_id, step = %fired.key.step, "Ignoring stale deadline");
                    return;
                }
                self.on_timeout(fired.key.step).await;
            }
            UserEvent::MonitorTick { job_id, done } => {
                if self.monitor.as_ref().is_some_and(|m| m.job_id == job_id) {
                    self.on_tick().await;
                    let _ = done.send(());
                } else {
                    // Dropping `done` stops the stale ticker.
                    debug!(user_id = %self.user_id, %job_id, "Ignoring tick for retired monitor");
                }
            }
            UserEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            step: self.session.as_ref().map(|s| s.step),
            monitor: self.monitor.as_ref().map(|m| MonitorSnapshot {
                job_id: m.job_id,
                address: m.address.clone(),
                polls: m.polls,
            }),
            armed: self
                .shared
                .timeouts
                .pending(&self.user_id)
                .into_iter()
                .map(|p| p.key.step)
                .collect(),
        }
    }

    async fn say(&self, text: &str) {
        if let Some(chat_id) = self.chat_id.as_deref() {
            self.shared.notify(chat_id, text).await;
        }
    }

    /// Clear every deadline for this user, then arm the one for `step`.
    fn enter(&self, step: Step) {
        self.shared.timeouts.cancel_all(&self.user_id);
        if step.is_timed() {
            self.shared
                .timeouts
                .arm(&self.user_id, step, self.shared.config.step_timeout);
        }
    }

    // ── Conversation ────────────────────────────────────────────────

    async fn on_start(&mut self) {
        if self.monitor.is_some() {
            self.say(prompts::already_monitoring()).await;
            return;
        }

        self.session = Some(Session::default());
        self.enter(Step::AwaitingVerificationUrl);
        info!(user_id = %self.user_id, "Verification session started");

        self.say(&prompts::welcome(self.shared.config.step_timeout)).await;
        self.shared
            .admin_log(&format!("User `{}` started a verification", self.user_id))
            .await;
    }

    async fn on_cancel(&mut self) {
        self.shared.timeouts.cancel_all(&self.user_id);
        self.session = None;
        if let Some(record) = self.monitor.take() {
            info!(user_id = %self.user_id, job_id = %record.job_id, "Monitor cancelled by user");
            monitor::retire(&self.shared, record).await;
        }
        info!(user_id = %self.user_id, "Session cancelled");
        self.say(prompts::cancelled()).await;
    }

    async fn on_timeout(&mut self, step: Step) {
        match self.session.as_ref() {
            Some(session) if session.step == step => {}
            _ => {
                debug!(user_id = %self.user_id, %step, "Deadline fired with no matching session");
                return;
            }
        }

        self.session = None;
        self.shared.timeouts.cancel_all(&self.user_id);
        info!(user_id = %self.user_id, %step, "Step timed out, session cleared");
        self.say(&prompts::step_expired(step.timer_name())).await;
    }

    async fn on_text(&mut self, text: &str) {
        let Some(step) = self.session.as_ref().map(|s| s.step) else {
            if self.monitor.is_some() {
                self.say(prompts::already_monitoring()).await;
            } else {
                self.say(prompts::not_started()).await;
            }
            return;
        };

        match step {
            Step::AwaitingVerificationUrl => self.on_url(text).await,
            Step::AwaitingFullName => self.on_name(text).await,
            Step::AwaitingSchoolName => self.on_school(text).await,
            Step::AwaitingOrganizationSelection => {
                self.say("Please pick your school from the list above, or send /cancel.")
                    .await;
            }
            Step::Terminal => {}
        }
    }

    async fn on_url(&mut self, text: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Err(e) = session.accept_url(text) {
            debug!(user_id = %self.user_id, "Rejected URL: {e}");
            self.enter(Step::AwaitingVerificationUrl);
            self.say(prompts::invalid_url()).await;
            return;
        }

        let id = session.verification_id.clone().unwrap_or_default();
        if let Err(e) = session.advance() {
            warn!(user_id = %self.user_id, "Unexpected transition failure: {e}");
            return;
        }
        self.enter(Step::AwaitingFullName);
        info!(user_id = %self.user_id, verification_id = %id, "Verification URL accepted");
        self.say(&prompts::ask_name(&id)).await;
    }

    async fn on_name(&mut self, text: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        if let Err(e) = session.accept_name(text) {
            debug!(user_id = %self.user_id, "Rejected name: {e}");
            self.enter(Step::AwaitingFullName);
            self.say(prompts::invalid_name()).await;
            return;
        }

        let full_name = session.full_name.clone().unwrap_or_default();
        if let Err(e) = session.advance() {
            warn!(user_id = %self.user_id, "Unexpected transition failure: {e}");
            return;
        }
        self.enter(Step::AwaitingSchoolName);
        self.say(&prompts::ask_school(&full_name)).await;
    }

    async fn on_school(&mut self, text: &str) {
        let query = text.trim().to_string();
        if let Some(session) = self.session.as_mut() {
            session.school_query = Some(query.clone());
        }
        self.say(&prompts::searching(&query)).await;

        let candidates = self.search(&query).await;

        // Selection is out-of-band: no deadline from here on.
        self.shared.timeouts.cancel_all(&self.user_id);

        if candidates.is_empty() {
            info!(user_id = %self.user_id, %query, "No organizations found, ending session");
            self.session = None;
            self.say(&prompts::no_results(&query)).await;
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.advance() {
            warn!(user_id = %self.user_id, "Unexpected transition failure: {e}");
            return;
        }
        session.candidates = candidates;

        let choices = prompts::candidate_choices(&session.candidates);
        let header = prompts::results_header(&query, choices.len());
        if let Some(chat_id) = self.chat_id.as_deref() {
            if let Err(e) = self
                .shared
                .deps
                .messenger
                .send_choices(chat_id, &header, &choices)
                .await
            {
                warn!(user_id = %self.user_id, "Failed to present candidates: {e}");
            }
        }
    }

    /// Search every configured category concurrently and merge the results.
    async fn search(&self, query: &str) -> Vec<crate::ports::Organization> {
        let config = &self.shared.config;
        let search = &self.shared.deps.search;
        let batches = join_all(
            config
                .org_types
                .iter()
                .map(|kind| search.search(&config.org_country, kind, query)),
        )
        .await;

        let batches = batches
            .into_iter()
            .zip(&config.org_types)
            .filter_map(|(result, kind)| match result {
                Ok(orgs) => Some(orgs),
                Err(e) => {
                    warn!(user_id = %self.user_id, kind = %kind, "Organization search failed: {e}");
                    None
                }
            })
            .collect();

        merge_candidates(batches, config.max_candidates)
    }

    async fn on_select(&mut self, payload: &str) {
        let index = prompts::parse_selection(payload);
        let selectable = self.session.as_ref().is_some_and(|s| {
            s.step == Step::AwaitingOrganizationSelection
                && index.is_some_and(|i| i < s.candidates.len())
        });
        if !selectable {
            debug!(user_id = %self.user_id, payload, "Selection without a matching session");
            self.say(prompts::selection_expired()).await;
            return;
        }

        // Session ends here whatever happens next.
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.shared.timeouts.cancel_all(&self.user_id);

        let Some(organization) = index.and_then(|i| session.candidates.get(i).cloned()) else {
            return;
        };
        session.organization = Some(organization.clone());
        let _ = session.advance();
        self.say(&prompts::submitting(&organization)).await;

        let mailbox = &self.shared.deps.mailbox;
        let address = match self
            .shared
            .config
            .retry
            .run("mailbox create", move || mailbox.create())
            .await
        {
            Ok(address) => address,
            Err(e) => {
                warn!(user_id = %self.user_id, "Mailbox creation failed: {e}");
                self.say(&prompts::submit_failed(&e.to_string())).await;
                return;
            }
        };

        let application = Application {
            verification_id: session.verification_id.clone().unwrap_or_default(),
            first_name: session.first_name.clone().unwrap_or_default(),
            last_name: session.last_name.clone().unwrap_or_default(),
            email: address.clone(),
            organization: organization.clone(),
        };

        if let Err(e) = self.shared.deps.submitter.submit(&application).await {
            warn!(user_id = %self.user_id, "Submission failed: {e}");
            if !self.shared.deps.mailbox.delete(&address).await {
                warn!(user_id = %self.user_id, %address, "Mailbox delete not confirmed");
            }
            self.say(&prompts::submit_failed(&e.to_string())).await;
            return;
        }

        let job_id = Uuid::new_v4();
        let ticker = monitor::spawn_ticker(
            Arc::downgrade(&self.shared),
            self.user_id.clone(),
            job_id,
            self.shared.config.poll_interval,
        );
        self.monitor = Some(MonitorRecord {
            job_id,
            address: address.clone(),
            verification_id: application.verification_id,
            original_url: session.original_url.unwrap_or_default(),
            full_name: session.full_name.unwrap_or_default(),
            organization,
            polls: 0,
            started_at: chrono::Utc::now(),
            ticker,
        });

        info!(user_id = %self.user_id, %job_id, %address, "Submitted, monitoring inbox");
        let config = &self.shared.config;
        self.say(&prompts::monitoring(&address, config.poll_interval, config.poll_budget))
            .await;
    }

    // ── Inbox monitor ───────────────────────────────────────────────

    async fn on_tick(&mut self) {
        let Some(chat_id) = self.chat_id.clone() else {
            return;
        };
        let Some(record) = self.monitor.as_mut() else {
            return;
        };
        record.polls += 1;
        let polls = record.polls;
        let job_id = record.job_id;

        let shared = Arc::clone(&self.shared);
        let result = AssertUnwindSafe(monitor::poll(&shared, &chat_id, record))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(user_id = %self.user_id, %job_id, polls, "Monitor tick failed: {e}");
                None
            }
            Err(_) => {
                error!(user_id = %self.user_id, %job_id, polls, "Monitor tick panicked");
                None
            }
        };

        let budget = shared.config.poll_budget;
        let outcome = match outcome {
            Some(outcome) => outcome,
            None if polls >= budget => {
                let address = self.monitor.as_ref().map(|m| m.address.clone()).unwrap_or_default();
                info!(user_id = %self.user_id, %job_id, polls, "Poll budget exhausted");
                shared.notify(&chat_id, &prompts::monitor_timeout(&address)).await;
                Outcome::Timeout
            }
            None => return,
        };

        if let Some(record) = self.monitor.take() {
            info!(user_id = %self.user_id, %job_id, %outcome, "Monitor finished");
            shared
                .admin_log(&format!(
                    "Verification result for `{}` ({}): {outcome}",
                    self.user_id, record.organization.name
                ))
                .await;
            monitor::retire(&shared, record).await;
        }
    }
}
