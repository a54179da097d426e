// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use std::time::Duration;

use review_mode::application::quarantine_spawn::{
    prepare_quarantine_spawn, PrepareQuarantineOptions, SpawnError,
};
use review_mode::application::tool_gate::{ToolCallGate, ToolCallHook};
use review_mode::domain::config::QuarantineConfig;
use review_mode::domain::security_event::SecurityEventType;
use review_mode::domain::typed_reference::TypedReference;
use review_mode::infrastructure::audit::SecurityAuditLogger;
use review_mode::infrastructure::rate_limiter::{RateLimiter, RateLimiterConfig};
use review_mode::infrastructure::session_manager::SessionManager;
use review_mode::infrastructure::timeout_manager::{TimeoutManager, TimeoutOutcome};
use serde_json::json;

struct Harness {
    sessions: Arc<SessionManager>,
    limiter: Arc<RateLimiter>,
    audit: Arc<SecurityAuditLogger>,
    gate: ToolCallGate,
    config: QuarantineConfig,
}

fn harness() -> Harness {
    let config = QuarantineConfig::default();
    let sessions = Arc::new(SessionManager::from_config(&config).unwrap());
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::from(&config)));
    let audit = Arc::new(SecurityAuditLogger::new());
    let gate = ToolCallGate::from_config(
        Arc::clone(&sessions),
        Arc::clone(&limiter),
        Arc::clone(&audit),
        &config,
    );
    Harness {
        sessions,
        limiter,
        audit,
        gate,
        config,
    }
}

#[tokio::test(start_paused = true)]
async fn quarantine_agent_reads_only_its_own_references() {
    let h = harness();
    let spawn = prepare_quarantine_spawn(
        &h.sessions,
        &PrepareQuarantineOptions::new(["/repo/src/main.rs", "/repo/README.md"])
            .with_config(h.config.clone()),
    )
    .unwrap();
    assert!(h.limiter.register_agent(&spawn.agent_id));
    h.audit.log_quarantine_spawn(&spawn.agent_id, &spawn.session_id);

    assert_eq!(spawn.uris().len(), 2);
    assert!(spawn.uris()[0].starts_with("typed://%2Frepo%2Fsrc%2Fmain.rs?"));
    assert_eq!(
        TypedReference::parse(spawn.uris()[0]).unwrap().path,
        "/repo/src/main.rs"
    );

    let read = h.gate.before_tool_use(
        "Read",
        &json!({"filePath": spawn.uris()[0]}),
        &spawn.metadata,
    );
    assert!(read.allowed, "{:?}", read.reason);

    let write = h.gate.before_tool_use(
        "Write",
        &json!({"filePath": spawn.uris()[0], "content": "pwned"}),
        &spawn.metadata,
    );
    assert!(!write.allowed);
    assert_eq!(
        write.security_event.unwrap().event_type,
        SecurityEventType::ToolBlocked
    );

    let raw = h
        .gate
        .before_tool_use("Read", &json!({"filePath": "/etc/passwd"}), &spawn.metadata);
    assert!(raw.allowed);

    let record = h.sessions.get_session(&spawn.session_id).unwrap();
    assert_eq!(record.tool_call_count, 2);

    assert!(spawn.cleanup());
    h.limiter.unregister_agent(&spawn.agent_id);
    h.audit
        .log_quarantine_exit(&spawn.agent_id, &spawn.session_id, "completed");
    assert_eq!(h.audit.event_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn references_from_one_agent_fail_in_another() {
    let h = harness();
    let options = PrepareQuarantineOptions::new(["/repo/a.rs"]);
    let first = prepare_quarantine_spawn(&h.sessions, &options).unwrap();
    let second = prepare_quarantine_spawn(&h.sessions, &options).unwrap();
    h.limiter.register_agent(&second.agent_id);

    let decision = h.gate.before_tool_use(
        "Read",
        &json!({"filePath": first.uris()[0]}),
        &second.metadata,
    );
    assert!(!decision.allowed);
    let event = decision.security_event.unwrap();
    assert_eq!(event.event_type, SecurityEventType::HmacVerificationFailed);
    assert_eq!(event.context["verificationError"], "session_mismatch");
}

#[tokio::test(start_paused = true)]
async fn reference_fails_after_session_cleanup() {
    let h = harness();
    let spawn =
        prepare_quarantine_spawn(&h.sessions, &PrepareQuarantineOptions::new(["/repo/a.rs"]))
            .unwrap();
    h.limiter.register_agent(&spawn.agent_id);
    let key = h.sessions.get_session_key(&spawn.session_id).unwrap();

    spawn.cleanup();
    assert!(key.is_zeroed());
    assert!(h.sessions.get_session(&spawn.session_id).is_none());

    let decision = h.gate.before_tool_use(
        "Read",
        &json!({"filePath": spawn.uris()[0]}),
        &spawn.metadata,
    );
    assert!(!decision.allowed);
}

#[test]
fn dropping_spawn_destroys_session() {
    let sessions = Arc::new(SessionManager::default());
    let key = {
        let spawn =
            prepare_quarantine_spawn(&sessions, &PrepareQuarantineOptions::new(["/a"])).unwrap();
        sessions.get_session_key(&spawn.session_id).unwrap()
    };
    assert!(key.is_zeroed());
    assert!(sessions.is_empty());
}

#[test]
fn empty_file_list_is_rejected() {
    let sessions = Arc::new(SessionManager::default());
    let err = prepare_quarantine_spawn(&sessions, &PrepareQuarantineOptions::new(Vec::<String>::new()))
        .unwrap_err();
    assert!(matches!(err, SpawnError::NoFiles));
    assert!(sessions.is_empty());
}

#[test]
fn concurrency_limit_is_enforced() {
    let sessions = Arc::new(SessionManager::default());
    let mut config = QuarantineConfig::default();
    config.max_concurrent_quarantine_agents = 2;
    let options = PrepareQuarantineOptions::new(["/a"]).with_config(config);

    let first = prepare_quarantine_spawn(&sessions, &options).unwrap();
    let _second = prepare_quarantine_spawn(&sessions, &options).unwrap();
    let err = prepare_quarantine_spawn(&sessions, &options).unwrap_err();
    match err {
        SpawnError::ConcurrencyLimit { current, max, .. } => {
            assert_eq!(current, 2);
            assert_eq!(max, 2);
        }
        other => panic!("unexpected error: {other}"),
    }

    first.cleanup();
    assert!(prepare_quarantine_spawn(&sessions, &options).is_ok());
}

#[test]
fn invalid_path_rolls_back_session() {
    let sessions = Arc::new(SessionManager::default());
    let err = prepare_quarantine_spawn(
        &sessions,
        &PrepareQuarantineOptions::new(["/ok.rs", "/bad\0.rs"]),
    )
    .unwrap_err();
    assert!(matches!(err, SpawnError::Reference(_)));
    assert!(sessions.is_empty());
}

#[test]
fn minted_paths_are_canonical() {
    let sessions = Arc::new(SessionManager::default());
    let spawn = prepare_quarantine_spawn(
        &sessions,
        &PrepareQuarantineOptions::new(["/repo/src/../lib.rs"]),
    )
    .unwrap();
    let parsed = TypedReference::parse(spawn.uris()[0]).unwrap();
    assert_eq!(parsed.path, "/repo/lib.rs");
    assert_eq!(parsed.session_id, spawn.session_id);
    assert_eq!(spawn.canonical_paths()[0].to_str(), Some("/repo/lib.rs"));
    assert_eq!(spawn.file_references[0].original_path, "/repo/src/../lib.rs");
}

#[tokio::test(start_paused = true)]
async fn quarantine_run_under_deadline() {
    let h = harness();
    let mut config = h.config.clone();
    config.quarantine_agent_timeout_ms = 1_000;
    let spawn = prepare_quarantine_spawn(
        &h.sessions,
        &PrepareQuarantineOptions::new(["/repo/a.rs"]).with_config(config.clone()),
    )
    .unwrap();
    assert_eq!(spawn.timeout, Duration::from_secs(1));

    let timeouts = TimeoutManager::from_config(&config);
    let outcome = timeouts
        .with_timeout(
            &spawn.agent_id,
            &spawn.session_id,
            std::future::pending::<Result<(), String>>(),
            None,
        )
        .await
        .unwrap();
    let TimeoutOutcome::TimedOut(result) = outcome else {
        panic!("expected timeout");
    };
    assert!(result.elapsed_ms() >= 1_000);

    let agent = timeouts.get_agent(&spawn.agent_id).unwrap();
    let event = timeouts.create_timeout_event(&agent);
    h.audit.record(event);
    assert!(spawn.cleanup());
    assert!(!spawn.cleanup());
}
