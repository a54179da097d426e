// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Quarantine Agent Timeout Manager
//!
//! Tracks running quarantine agents against a deadline.
//!
//! ## Status transitions
//!
//! ```text
//!            deadline fires                complete_agent
//! running ───────────────────► timed_out   (status kept; timeout wins)
//!    │
//!    ├── complete_agent ─────► completed
//!    ├── with_timeout Err ───► error
//!    └── destroy_all ────────► error
//! ```
//!
//! Each `track_agent` call spawns one deadline task on the Tokio runtime. The
//! task holds only a weak reference to the manager and a generation number, so
//! a replaced or cancelled track can never be expired by a stale timer.
//!
//! ## Cancellation
//!
//! [`TimeoutManager::with_timeout`] drops the wrapped future when the deadline
//! wins, which stops any work the future would have done at its next await
//! point. Work the future handed to other tasks can observe the deadline
//! through [`TimeoutManager::cancellation_token`].

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::config::QuarantineConfig;
use crate::domain::security_event::{SecurityEvent, SecurityEventType, Severity};

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Invoked with the agent id when a deadline fires.
pub type TimeoutCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Completed,
    TimedOut,
    Error,
}

/// Snapshot of a tracked agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedAgent {
    pub agent_id: String,
    pub session_id: String,
    pub started_at: Instant,
    pub started_at_wall: DateTime<Utc>,
    pub timeout: Duration,
    pub status: AgentStatus,
}

impl TrackedAgent {
    pub fn deadline(&self) -> Instant {
        self.started_at + self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.started_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutResult<T = ()> {
    pub agent_id: String,
    pub session_id: String,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub partial_result: Option<T>,
}

impl<T> TimeoutResult<T> {
    pub fn elapsed_ms(&self) -> u64 {
        duration_ms(self.elapsed)
    }
}

/// Result of [`TimeoutManager::with_timeout`] when the wrapped future did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome<T> {
    Completed(T),
    TimedOut(TimeoutResult),
}

impl<T> TimeoutOutcome<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, TimeoutOutcome::TimedOut(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            TimeoutOutcome::Completed(value) => Some(value),
            TimeoutOutcome::TimedOut(_) => None,
        }
    }
}

struct Entry {
    agent: TrackedAgent,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    on_timeout: Option<TimeoutCallback>,
    cancel: CancellationToken,
}

impl Entry {
    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner {
    agents: Mutex<HashMap<String, Entry>>,
    next_generation: Mutex<u64>,
}

impl Inner {
    /// Move a still-running agent of the given generation to `timed_out`.
    /// Returns whether this call performed the transition.
    fn expire(&self, agent_id: &str, generation: u64) -> bool {
        let callback = {
            let mut agents = self.agents.lock();
            let Some(entry) = agents.get_mut(agent_id) else {
                return false;
            };
            if entry.generation != generation || entry.agent.status != AgentStatus::Running {
                return false;
            }
            entry.agent.status = AgentStatus::TimedOut;
            entry.timer = None;
            entry.cancel.cancel();
            warn!(
                agent_id = %agent_id,
                session_id = %entry.agent.session_id,
                timeout_ms = duration_ms(entry.agent.timeout),
                "Quarantine agent timed out"
            );
            entry.on_timeout.clone()
        };

        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(agent_id))).is_err() {
                error!(agent_id = %agent_id, "Timeout callback panicked");
            }
        }
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for entry in self.agents.get_mut().values_mut() {
            entry.stop_timer();
        }
    }
}

pub struct TimeoutManager {
    inner: Arc<Inner>,
    default_timeout: Duration,
}

impl TimeoutManager {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                agents: Mutex::new(HashMap::new()),
                next_generation: Mutex::new(0),
            }),
            default_timeout,
        }
    }

    pub fn from_config(config: &QuarantineConfig) -> Self {
        Self::new(Duration::from_millis(config.quarantine_agent_timeout_ms))
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Start tracking `agent_id`, replacing any existing track for it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn track_agent(
        &self,
        agent_id: &str,
        session_id: &str,
        timeout: Option<Duration>,
        on_timeout: Option<TimeoutCallback>,
    ) -> TrackedAgent {
        self.track(agent_id, session_id, timeout, on_timeout).0
    }

    fn track(
        &self,
        agent_id: &str,
        session_id: &str,
        timeout: Option<Duration>,
        on_timeout: Option<TimeoutCallback>,
    ) -> (TrackedAgent, u64) {
        self.cancel_tracking(agent_id);

        let timeout = timeout.unwrap_or(self.default_timeout);
        let generation = {
            let mut next = self.inner.next_generation.lock();
            *next += 1;
            *next
        };
        let agent = TrackedAgent {
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            started_at: Instant::now(),
            started_at_wall: Utc::now(),
            timeout,
            status: AgentStatus::Running,
        };

        let deadline = agent.deadline();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = agent_id.to_string();
        let timer = tokio::spawn(async move {
            sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&id, generation);
            }
        });

        self.inner.agents.lock().insert(
            agent_id.to_string(),
            Entry {
                agent: agent.clone(),
                generation,
                timer: Some(timer),
                on_timeout,
                cancel: CancellationToken::new(),
            },
        );

        debug!(
            agent_id = %agent_id,
            session_id = %session_id,
            timeout_ms = duration_ms(timeout),
            "Tracking quarantine agent"
        );
        (agent, generation)
    }

    /// Stop the timer and report how long the agent ran.
    ///
    /// An agent that already timed out keeps the `timed_out` status. Unknown
    /// agents yield a zeroed result.
    pub fn complete_agent<T>(&self, agent_id: &str, result: Option<T>) -> TimeoutResult<T> {
        let mut agents = self.inner.agents.lock();
        let Some(entry) = agents.get_mut(agent_id) else {
            return TimeoutResult {
                agent_id: agent_id.to_string(),
                session_id: String::new(),
                elapsed: Duration::ZERO,
                timed_out: false,
                partial_result: result,
            };
        };

        let elapsed = entry.agent.elapsed();
        let was_timed_out = entry.agent.status == AgentStatus::TimedOut;
        entry.stop_timer();
        if entry.agent.status == AgentStatus::Running {
            entry.agent.status = AgentStatus::Completed;
        }

        info!(
            agent_id = %agent_id,
            elapsed_ms = duration_ms(elapsed),
            timed_out = was_timed_out,
            "Quarantine agent completed"
        );
        TimeoutResult {
            agent_id: entry.agent.agent_id.clone(),
            session_id: entry.agent.session_id.clone(),
            elapsed,
            timed_out: was_timed_out,
            partial_result: result,
        }
    }

    pub fn get_remaining_time(&self, agent_id: &str) -> Option<Duration> {
        let agents = self.inner.agents.lock();
        let entry = agents.get(agent_id)?;
        Some(entry.agent.timeout.saturating_sub(entry.agent.elapsed()))
    }

    pub fn is_timed_out(&self, agent_id: &str) -> bool {
        self.inner
            .agents
            .lock()
            .get(agent_id)
            .is_some_and(|e| e.agent.status == AgentStatus::TimedOut)
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<TrackedAgent> {
        self.inner.agents.lock().get(agent_id).map(|e| e.agent.clone())
    }

    pub fn get_active_agents(&self) -> Vec<TrackedAgent> {
        self.inner
            .agents
            .lock()
            .values()
            .filter(|e| e.agent.status == AgentStatus::Running)
            .map(|e| e.agent.clone())
            .collect()
    }

    pub fn get_active_count(&self) -> usize {
        self.inner
            .agents
            .lock()
            .values()
            .filter(|e| e.agent.status == AgentStatus::Running)
            .count()
    }

    /// Token cancelled when the agent's deadline fires or its tracking is torn down.
    pub fn cancellation_token(&self, agent_id: &str) -> Option<CancellationToken> {
        self.inner.agents.lock().get(agent_id).map(|e| e.cancel.clone())
    }

    /// Remove tracking without marking a timeout.
    pub fn cancel_tracking(&self, agent_id: &str) -> bool {
        let removed = self.inner.agents.lock().remove(agent_id);
        match removed {
            Some(mut entry) => {
                entry.stop_timer();
                entry.cancel.cancel();
                debug!(agent_id = %agent_id, "Tracking cancelled");
                true
            }
            None => false,
        }
    }

    /// Stop every timer, mark running agents `error` and clear the registry.
    pub fn destroy_all(&self) -> usize {
        let drained: Vec<Entry> = self.inner.agents.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for mut entry in drained {
            entry.stop_timer();
            if entry.agent.status == AgentStatus::Running {
                entry.agent.status = AgentStatus::Error;
            }
            entry.cancel.cancel();
        }
        if count > 0 {
            info!(count, "All tracked agents destroyed");
        }
        count
    }

    pub fn create_timeout_event(&self, agent: &TrackedAgent) -> SecurityEvent {
        let elapsed_ms = duration_ms(agent.elapsed());
        let timeout_ms = duration_ms(agent.timeout);
        SecurityEvent::new(
            SecurityEventType::QuarantineTimeout,
            Severity::High,
            agent.agent_id.clone(),
            agent.session_id.clone(),
            format!("Quarantine agent timed out after {elapsed_ms}ms (limit: {timeout_ms}ms)"),
        )
        .with_context("timeoutMs", timeout_ms)
        .with_context("elapsedMs", elapsed_ms)
        .with_context("startTime", agent.started_at_wall.to_rfc3339())
    }

    /// Race `future` against a deadline.
    ///
    /// - Future finishes first with `Ok`: the agent is completed and the value returned.
    /// - Future finishes first with `Err`: the agent is marked `error` and the error returned.
    /// - Deadline first: the future is dropped and `TimedOut` returned; this is
    ///   not an error.
    pub async fn with_timeout<F, T, E>(
        &self,
        agent_id: &str,
        session_id: &str,
        future: F,
        timeout: Option<Duration>,
    ) -> Result<TimeoutOutcome<T>, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let (agent, generation) = self.track(agent_id, session_id, timeout, None);
        let deadline = agent.deadline();
        tokio::pin!(future);

        tokio::select! {
            biased;
            result = &mut future => match result {
                Ok(value) => {
                    self.finish(agent_id, generation, AgentStatus::Completed);
                    Ok(TimeoutOutcome::Completed(value))
                }
                Err(e) => {
                    self.finish(agent_id, generation, AgentStatus::Error);
                    Err(e)
                }
            },
            _ = sleep_until(deadline) => {
                self.inner.expire(agent_id, generation);
                Ok(TimeoutOutcome::TimedOut(TimeoutResult {
                    agent_id: agent_id.to_string(),
                    session_id: session_id.to_string(),
                    elapsed: agent.elapsed(),
                    timed_out: true,
                    partial_result: None,
                }))
            }
        }
    }

    /// Terminal transition for a `with_timeout` track, unless it was replaced
    /// or has already timed out.
    fn finish(&self, agent_id: &str, generation: u64, status: AgentStatus) {
        let mut agents = self.inner.agents.lock();
        if let Some(entry) = agents.get_mut(agent_id) {
            if entry.generation != generation {
                return;
            }
            entry.stop_timer();
            if entry.agent.status == AgentStatus::Running {
                entry.agent.status = status;
            }
            if status == AgentStatus::Error {
                warn!(agent_id = %agent_id, "Quarantine agent failed");
            }
        }
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_TIMEOUT)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
