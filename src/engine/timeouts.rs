//! Per-step deadline supervisor.
//!
//! A pending timeout is plain data keyed by (user, step). Each arm gets a
//! fresh generation id; when the deadline passes a `TimerFired` event is sent
//! to the engine, which must `claim` it before acting. Re-arming or cancelling
//! removes the entry, so a late or superseded fire fails its claim.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::conversation::Step;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub user_id: String,
    pub step: Step,
}

impl TimerKey {
    pub fn new(user_id: &str, step: Step) -> Self {
        Self {
            user_id: user_id.to_string(),
            step,
        }
    }
}

/// Emitted when a deadline passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    pub generation: Uuid,
}

/// A live deadline.
#[derive(Debug, Clone)]
pub struct PendingTimeout {
    pub key: TimerKey,
    pub generation: Uuid,
    pub deadline: Instant,
    pub armed_at: DateTime<Utc>,
}

struct Entry {
    pending: PendingTimeout,
    handle: JoinHandle<()>,
}

pub struct TimeoutSupervisor {
    entries: Mutex<HashMap<TimerKey, Entry>>,
    fire_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TimeoutSupervisor {
    pub fn new(fire_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            fire_tx,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TimerKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule a deadline, replacing any pending one for the same key.
    pub fn arm(&self, user_id: &str, step: Step, after: Duration) -> PendingTimeout {
        let key = TimerKey::new(user_id, step);
        let pending = PendingTimeout {
            key: key.clone(),
            generation: Uuid::new_v4(),
            deadline: Instant::now() + after,
            armed_at: Utc::now(),
        };

        let fired = TimerFired {
            key: key.clone(),
            generation: pending.generation,
        };
        let tx = self.fire_tx.clone();
        let deadline = pending.deadline;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Receiver gone means the engine shut down.
            let _ = tx.send(fired);
        });

        let mut entries = self.entries();
        if let Some(old) = entries.insert(
            key,
            Entry {
                pending: pending.clone(),
                handle,
            },
        ) {
            old.handle.abort();
            tracing::debug!(
                user_id,
                step = step.timer_name(),
                "Replaced pending timeout"
            );
        }

        pending
    }

    /// Cancel the deadline for one key. Returns whether one was pending.
    pub fn cancel(&self, user_id: &str, step: Step) -> bool {
        let removed = self.entries().remove(&TimerKey::new(user_id, step));
        match removed {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every conversational deadline for a user. Returns how many were pending.
    pub fn cancel_all(&self, user_id: &str) -> usize {
        Step::TIMED
            .iter()
            .filter(|step| self.cancel(user_id, **step))
            .count()
    }

    /// Accept a fire event if it is still the current generation for its key.
    pub fn claim(&self, fired: &TimerFired) -> bool {
        let mut entries = self.entries();
        match entries.get(&fired.key) {
            Some(entry) if entry.pending.generation == fired.generation => {
                entries.remove(&fired.key);
                true
            }
            _ => false,
        }
    }

    /// Pending deadlines for a user.
    pub fn pending(&self, user_id: &str) -> Vec<PendingTimeout> {
        let mut pending: Vec<PendingTimeout> = self
            .entries()
            .values()
            .filter(|e| e.pending.key.user_id == user_id)
            .map(|e| e.pending.clone())
            .collect();
        pending.sort_by_key(|p| p.deadline);
        pending
    }

    pub fn is_armed(&self, user_id: &str, step: Step) -> bool {
        self.entries().contains_key(&TimerKey::new(user_id, step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);

    fn supervisor() -> (TimeoutSupervisor, mpsc::UnboundedReceiver<TimerFired>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TimeoutSupervisor::new(tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_deadline_and_claims_once() {
        let (sup, mut rx) = supervisor();
        let armed = sup.arm("u1", Step::AwaitingFullName, 5 * SECOND);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.generation, armed.generation);
        assert_eq!(fired.key, TimerKey::new("u1", Step::AwaitingFullName));
        assert!(Instant::now() >= armed.deadline);

        assert!(sup.claim(&fired));
        assert!(!sup.claim(&fired), "second claim must fail");
        assert!(!sup.is_armed("u1", Step::AwaitingFullName));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_supersedes_previous_deadline() {
        let (sup, mut rx) = supervisor();
        let first = sup.arm("u1", Step::AwaitingVerificationUrl, 5 * SECOND);
        tokio::time::sleep(2 * SECOND).await;
        let second = sup.arm("u1", Step::AwaitingVerificationUrl, 5 * SECOND);
        assert_ne!(first.generation, second.generation);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.generation, second.generation);

        tokio::time::sleep(30 * SECOND).await;
        assert!(rx.try_recv().is_err(), "only one deadline may fire");
        assert_eq!(sup.pending("u1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_not_claimed() {
        let (sup, _rx) = supervisor();
        let first = sup.arm("u1", Step::AwaitingSchoolName, SECOND);
        sup.arm("u1", Step::AwaitingSchoolName, SECOND);

        let stale = TimerFired {
            key: first.key.clone(),
            generation: first.generation,
        };
        assert!(!sup.claim(&stale));
        assert!(sup.is_armed("u1", Step::AwaitingSchoolName));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let (sup, mut rx) = supervisor();
        sup.arm("u1", Step::AwaitingFullName, SECOND);

        assert!(sup.cancel("u1", Step::AwaitingFullName));
        assert!(!sup.cancel("u1", Step::AwaitingFullName));

        tokio::time::sleep(10 * SECOND).await;
        assert!(rx.try_recv().is_err(), "cancelled deadline must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_a_noop() {
        let (sup, mut rx) = supervisor();
        sup.arm("u1", Step::AwaitingFullName, SECOND);
        let fired = rx.recv().await.unwrap();
        assert!(sup.claim(&fired));

        assert!(!sup.cancel("u1", Step::AwaitingFullName));
        assert_eq!(sup.cancel_all("u1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_is_scoped_to_user() {
        let (sup, _rx) = supervisor();
        sup.arm("u1", Step::AwaitingVerificationUrl, SECOND);
        sup.arm("u1", Step::AwaitingSchoolName, SECOND);
        sup.arm("u2", Step::AwaitingVerificationUrl, SECOND);

        assert_eq!(sup.cancel_all("u1"), 2);
        assert!(sup.pending("u1").is_empty());
        assert_eq!(sup.pending("u2").len(), 1);
    }
}
