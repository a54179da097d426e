// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit;
pub mod rate_limiter;
pub mod session_manager;
pub mod timeout_manager;

pub use audit::SecurityAuditLogger;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use session_manager::SessionManager;
pub use timeout_manager::{TimeoutManager, TimeoutOutcome};
