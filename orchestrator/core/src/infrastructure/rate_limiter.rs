// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Sliding-Window Rate Limiter
//!
//! Per-agent call limiting plus a global cap on registered agents.
//!
//! Every check prunes timestamps that have left the window before counting, so
//! there is no fixed bucket boundary to burst across. Statistics apply the same
//! pruning rule and never report stale counts.
//!
//! Instants come from [`tokio::time`], which lets tests drive the window with a
//! paused clock.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::config::QuarantineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    pub max_calls_per_minute: u32,
    pub max_concurrent_agents: usize,
    pub window_size: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_calls_per_minute: 100,
            max_concurrent_agents: 5,
            window_size: Duration::from_millis(60_000),
        }
    }
}

impl From<&QuarantineConfig> for RateLimiterConfig {
    fn from(config: &QuarantineConfig) -> Self {
        Self {
            max_calls_per_minute: config.tool_rate_limit_per_minute,
            max_concurrent_agents: config.max_concurrent_quarantine_agents,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    /// When the oldest call in the window expires.
    pub reset_at: Instant,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRateStats {
    pub agent_id: String,
    pub calls_in_window: usize,
    pub window_size: Duration,
    pub registered_at: Instant,
    pub last_call_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalRateStats {
    pub active_agents: usize,
    pub max_concurrent_agents: usize,
    pub total_calls_all_agents: usize,
}

struct AgentState {
    call_timestamps: VecDeque<Instant>,
    registered_at: Instant,
}

impl AgentState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.call_timestamps.front() {
            if in_window(*oldest, now, window) {
                break;
            }
            self.call_timestamps.pop_front();
        }
    }

    fn count_in_window(&self, now: Instant, window: Duration) -> usize {
        self.call_timestamps
            .iter()
            .filter(|ts| in_window(**ts, now, window))
            .count()
    }
}

/// A timestamp stays in the window while `now - ts < window`.
fn in_window(ts: Instant, now: Instant, window: Duration) -> bool {
    now.saturating_duration_since(ts) < window
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    agents: Mutex<HashMap<String, AgentState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Check and, when allowed, record a call for `agent_id`.
    pub fn check_rate_limit(&self, agent_id: &str) -> RateLimitResult {
        let now = Instant::now();
        let window = self.config.window_size;
        let max = self.config.max_calls_per_minute;

        let mut agents = self.agents.lock();
        let Some(state) = agents.get_mut(agent_id) else {
            debug!(agent_id = %agent_id, "Rate limit check for unregistered agent");
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_at: now + window,
                reason: Some("Agent not registered".to_string()),
            };
        };

        state.prune(now, window);
        let calls_in_window = state.call_timestamps.len();

        if calls_in_window >= max as usize {
            let oldest = state.call_timestamps.front().copied().unwrap_or(now);
            warn!(
                agent_id = %agent_id,
                calls_in_window,
                max_calls = max,
                "Rate limit exceeded"
            );
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_at: oldest + window,
                reason: Some(format!(
                    "Rate limit exceeded: {calls_in_window}/{max} calls in window"
                )),
            };
        }

        state.call_timestamps.push_back(now);
        let oldest = state.call_timestamps.front().copied().unwrap_or(now);

        RateLimitResult {
            allowed: true,
            remaining: max - calls_in_window as u32 - 1,
            reset_at: oldest + window,
            reason: None,
        }
    }

    /// Register `agent_id`. Already-registered agents succeed without change;
    /// new agents are refused once the concurrency cap is reached.
    pub fn register_agent(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.lock();
        if agents.contains_key(agent_id) {
            return true;
        }
        if agents.len() >= self.config.max_concurrent_agents {
            warn!(
                agent_id = %agent_id,
                max_concurrent_agents = self.config.max_concurrent_agents,
                "Agent registration refused: concurrency limit reached"
            );
            return false;
        }
        agents.insert(
            agent_id.to_string(),
            AgentState {
                call_timestamps: VecDeque::new(),
                registered_at: Instant::now(),
            },
        );
        debug!(agent_id = %agent_id, "Agent registered with rate limiter");
        true
    }

    pub fn unregister_agent(&self, agent_id: &str) {
        if self.agents.lock().remove(agent_id).is_some() {
            debug!(agent_id = %agent_id, "Agent unregistered from rate limiter");
        }
    }

    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.agents.lock().contains_key(agent_id)
    }

    pub fn get_agent_stats(&self, agent_id: &str) -> Option<AgentRateStats> {
        let now = Instant::now();
        let agents = self.agents.lock();
        let state = agents.get(agent_id)?;
        Some(AgentRateStats {
            agent_id: agent_id.to_string(),
            calls_in_window: state.count_in_window(now, self.config.window_size),
            window_size: self.config.window_size,
            registered_at: state.registered_at,
            last_call_at: state.call_timestamps.back().copied(),
        })
    }

    pub fn get_global_stats(&self) -> GlobalRateStats {
        let now = Instant::now();
        let agents = self.agents.lock();
        GlobalRateStats {
            active_agents: agents.len(),
            max_concurrent_agents: self.config.max_concurrent_agents,
            total_calls_all_agents: agents
                .values()
                .map(|s| s.count_in_window(now, self.config.window_size))
                .sum(),
        }
    }

    /// Drop every registered agent and its history.
    pub fn reset(&self) {
        self.agents.lock().clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
