//! Verification orchestration engine.
//!
//! Every user gets one actor task that owns that user's `Session` and
//! `MonitorRecord`. Inbound events, deadline fires, and monitor ticks for a
//! user are all routed through the actor's queue, so a user's callbacks never
//! run concurrently while different users proceed independently.

mod actor;
pub mod monitor;
pub mod timeouts;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::conversation::Step;
use crate::error::Error;
use crate::ports::{Browser, Mailbox, MessageHandle, Messenger, OrganizationSearch, Submitter};
use crate::verification::LinkExtractor;

pub use monitor::MonitorRecord;
pub use timeouts::{PendingTimeout, TimeoutSupervisor, TimerFired, TimerKey};

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct EngineDeps {
    pub messenger: Arc<dyn Messenger>,
    pub mailbox: Arc<dyn Mailbox>,
    pub browser: Arc<dyn Browser>,
    pub search: Arc<dyn OrganizationSearch>,
    pub submitter: Arc<dyn Submitter>,
}

/// Front-end event keyed by user and chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Start { user_id: String, chat_id: String },
    Cancel { user_id: String, chat_id: String },
    Text { user_id: String, chat_id: String, text: String },
    Select { user_id: String, chat_id: String, payload: String },
}

impl InboundEvent {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Start { user_id, .. }
            | Self::Cancel { user_id, .. }
            | Self::Text { user_id, .. }
            | Self::Select { user_id, .. } => user_id,
        }
    }

    pub fn chat_id(&self) -> &str {
        match self {
            Self::Start { chat_id, .. }
            | Self::Cancel { chat_id, .. }
            | Self::Text { chat_id, .. }
            | Self::Select { chat_id, .. } => chat_id,
        }
    }
}

/// Everything that can land in a user's queue.
pub(crate) enum UserEvent {
    Inbound(InboundEvent),
    Timeout(TimerFired),
    MonitorTick {
        job_id: Uuid,
        done: oneshot::Sender<()>,
    },
    Snapshot(oneshot::Sender<UserSnapshot>),
}

/// Read-only view of one user's in-flight state.
#[derive(Debug, Clone, Default)]
pub struct UserSnapshot {
    pub step: Option<Step>,
    pub monitor: Option<MonitorSnapshot>,
    pub armed: Vec<Step>,
}

#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub job_id: Uuid,
    pub address: String,
    pub polls: u32,
}

pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) deps: EngineDeps,
    pub(crate) links: LinkExtractor,
    pub(crate) timeouts: TimeoutSupervisor,
    actors: Mutex<HashMap<String, mpsc::UnboundedSender<UserEvent>>>,
}

impl Shared {
    pub(crate) fn actors(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<UserEvent>>> {
        self.actors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route an event to the user's actor, spawning one if needed.
    ///
    /// Sends happen under the registry lock; an idle actor removes itself
    /// under the same lock, so no event is dropped between the two.
    pub(crate) fn enqueue(self: &Arc<Self>, user_id: &str, event: UserEvent) {
        let mut actors = self.actors();
        let tx = actors
            .entry(user_id.to_string())
            .or_insert_with(|| actor::spawn(Arc::clone(self), user_id.to_string()));

        if let Err(mpsc::error::SendError(event)) = tx.send(event) {
            tracing::warn!(user_id, "User actor stopped unexpectedly, respawning");
            let tx = actor::spawn(Arc::clone(self), user_id.to_string());
            let _ = tx.send(event);
            actors.insert(user_id.to_string(), tx);
        }
    }

    /// Send a message, retrying per policy. Failures are logged, not returned.
    pub(crate) async fn notify(&self, chat_id: &str, text: &str) -> Option<MessageHandle> {
        let messenger = &self.deps.messenger;
        match self
            .config
            .retry
            .run("notify", move || messenger.send_text(chat_id, text))
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(chat_id, "Failed to notify user: {e}");
                None
            }
        }
    }

    /// Replace a progress message, falling back to a fresh send.
    pub(crate) async fn notify_replacing(&self, chat_id: &str, previous: Option<&MessageHandle>, text: &str) {
        if let Some(handle) = previous {
            match self.deps.messenger.edit_text(handle, text).await {
                Ok(()) => return,
                Err(e) => tracing::debug!(chat_id, "Edit failed, sending new message: {e}"),
            }
        }
        self.notify(chat_id, text).await;
    }

    /// Post to the admin log chat, if configured.
    pub(crate) async fn admin_log(&self, text: &str) {
        if let Some(chat) = self.config.admin_chat.as_deref() {
            self.notify(chat, text).await;
        }
    }
}

/// Handle to a running engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Build the engine and start its deadline router. Must be called inside a Tokio runtime.
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Result<Self, Error> {
        let links = LinkExtractor::new(&config.service_url).map_err(|e| {
            crate::error::ConfigError::InvalidValue {
                key: "VERIFY_SERVICE_URL".into(),
                message: e.to_string(),
            }
        })?;

        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            config,
            deps,
            links,
            timeouts: TimeoutSupervisor::new(fire_tx),
            actors: Mutex::new(HashMap::new()),
        });

        spawn_timeout_router(Arc::downgrade(&shared), fire_rx);

        Ok(Self { shared })
    }

    /// Hand a front-end event to the engine. Never blocks.
    pub fn dispatch(&self, event: InboundEvent) {
        let user_id = event.user_id().to_string();
        tracing::debug!(user_id = %user_id, "Dispatching inbound event");
        self.shared.enqueue(&user_id, UserEvent::Inbound(event));
    }

    /// Snapshot a user's state, ordered after every event dispatched before it.
    pub async fn snapshot(&self, user_id: &str) -> UserSnapshot {
        let (tx, rx) = oneshot::channel();
        self.shared.enqueue(user_id, UserEvent::Snapshot(tx));
        rx.await.unwrap_or_default()
    }

    /// Pending deadlines for a user.
    pub fn pending_timeouts(&self, user_id: &str) -> Vec<PendingTimeout> {
        self.shared.timeouts.pending(user_id)
    }

    /// Number of users with a live actor.
    pub fn active_users(&self) -> usize {
        self.shared.actors().len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

fn spawn_timeout_router(shared: Weak<Shared>, mut fire_rx: mpsc::UnboundedReceiver<TimerFired>) {
    tokio::spawn(async move {
        while let Some(fired) = fire_rx.recv().await {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let user_id = fired.key.user_id.clone();
            shared.enqueue(&user_id, UserEvent::Timeout(fired));
        }
    });
}
