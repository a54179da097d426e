// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod hmac_ops;
pub mod path_sanitizer;
pub mod security_event;
pub mod session;
pub mod tool_allowlist;
pub mod typed_reference;
