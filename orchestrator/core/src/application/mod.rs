// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod enforcement;
pub mod quarantine_spawn;
pub mod tool_gate;

pub use enforcement::{enforce_review_mode, extract_typed_reference_from_args, Decision, EnforcementConfig};
pub use quarantine_spawn::{prepare_quarantine_spawn, PrepareQuarantineOptions, QuarantineSpawn, SessionGuard};
pub use tool_gate::{ToolCallGate, ToolCallHook};
