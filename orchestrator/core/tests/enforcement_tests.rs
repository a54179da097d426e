// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use proptest::prelude::*;
use review_mode::application::enforcement::{enforce_review_mode, EnforcementConfig};
use review_mode::domain::security_event::{SecurityEventType, Severity};
use review_mode::domain::session::CallerMetadata;
use review_mode::domain::tool_allowlist::QUARANTINE_DENIED_TOOLS;
use review_mode::domain::typed_reference::mint;
use review_mode::infrastructure::session_manager::SessionManager;
use serde_json::{json, Value};

fn quarantine_caller(sessions: &SessionManager) -> CallerMetadata {
    let session = sessions.create_session("quarantine-agent", true).unwrap();
    sessions
        .get_metadata(&session.session_id.to_string())
        .unwrap()
}

#[test]
fn every_denied_tool_is_blocked_for_quarantine() {
    let sessions = SessionManager::default();
    let meta = quarantine_caller(&sessions);
    let config = EnforcementConfig::default();

    for tool in QUARANTINE_DENIED_TOOLS {
        let decision = enforce_review_mode(tool, &json!({}), &meta, &config);
        assert!(!decision.allowed, "{tool} must be blocked");
        let event = decision.security_event.unwrap();
        assert_eq!(event.event_type, SecurityEventType::ToolBlocked);
        assert_eq!(event.severity, Severity::High);
        assert!(decision.reason.unwrap().contains(tool));
    }
}

#[test]
fn lookalike_tool_names_are_blocked() {
    let sessions = SessionManager::default();
    let meta = quarantine_caller(&sessions);
    let config = EnforcementConfig::default();

    for tool in ["read", "Read ", "Read\u{200B}", "Ｒｅａｄ", "Grep\n", ""] {
        let decision = enforce_review_mode(tool, &json!({}), &meta, &config);
        assert!(!decision.allowed, "{tool:?} must be blocked");
    }
}

#[test]
fn custom_allowlist_is_honoured() {
    let sessions = SessionManager::default();
    let meta = quarantine_caller(&sessions);
    let config = EnforcementConfig {
        allowed_tools: vec!["Read".to_string()],
        ..EnforcementConfig::default()
    };
    assert!(enforce_review_mode("Read", &json!({}), &meta, &config).allowed);
    let decision = enforce_review_mode("Grep", &json!({}), &meta, &config);
    assert_eq!(
        decision.reason.as_deref(),
        Some("Tool 'Grep' is not allowed in Review Mode. Allowed tools: Read")
    );
}

#[test]
fn own_reference_is_allowed_and_foreign_reference_denied() {
    let sessions = SessionManager::default();
    let mine = quarantine_caller(&sessions);
    let other = quarantine_caller(&sessions);
    let config = EnforcementConfig::default();

    let my_key = mine.key.clone().unwrap();
    let my_token = mint("/tmp/untrusted.md", &mine.session_id, &my_key).unwrap();
    let args = json!({"filePath": my_token.serialize()});

    assert!(enforce_review_mode("Read", &args, &mine, &config).allowed);

    let decision = enforce_review_mode("Read", &args, &other, &config);
    assert!(!decision.allowed);
    let event = decision.security_event.unwrap();
    assert_eq!(event.event_type, SecurityEventType::HmacVerificationFailed);
    assert_eq!(event.severity, Severity::Critical);
    assert_eq!(event.session_id, other.session_id);
    assert_eq!(event.context["verificationError"], "session_mismatch");
}

#[test]
fn expired_reference_is_denied_with_kind() {
    let sessions = SessionManager::default();
    let meta = quarantine_caller(&sessions);
    let key = meta.key.clone().unwrap();
    let mut token = mint("/tmp/a.txt", &meta.session_id, &key).unwrap();
    token.issued_at -= 7200;

    let decision = enforce_review_mode(
        "Glob",
        &json!({"pattern": token.serialize()}),
        &meta,
        &EnforcementConfig::default(),
    );
    assert!(decision.reason.unwrap().contains("expired"));
}

#[test]
fn only_first_reference_field_is_checked() {
    let sessions = SessionManager::default();
    let meta = quarantine_caller(&sessions);
    let key = meta.key.clone().unwrap();
    let good = mint("/tmp/a.txt", &meta.session_id, &key).unwrap().serialize();

    // filePath outranks content
    let args = json!({"filePath": good, "content": "typed://garbage"});
    assert!(enforce_review_mode("Read", &args, &meta, &EnforcementConfig::default()).allowed);

    let args = json!({"filePath": "typed://garbage", "content": good});
    let decision = enforce_review_mode("Read", &args, &meta, &EnforcementConfig::default());
    assert_eq!(
        decision.security_event.unwrap().event_type,
        SecurityEventType::InvalidTypedReference
    );
}

#[test]
fn reference_in_unscanned_field_is_ignored() {
    let sessions = SessionManager::default();
    let meta = quarantine_caller(&sessions);
    let args = json!({"query": "typed://not-checked", "filePath": "/tmp/plain.txt"});
    assert!(enforce_review_mode("Grep", &args, &meta, &EnforcementConfig::default()).allowed);
}

#[test]
fn quarantine_caller_without_key_is_denied_for_references() {
    let meta = CallerMetadata {
        agent_id: "a".to_string(),
        session_id: "s".to_string(),
        is_quarantine: true,
        key: None,
    };
    let decision = enforce_review_mode(
        "Read",
        &json!({"path": "typed://%2Ftmp?hmac=ab&ts=1&sid=s"}),
        &meta,
        &EnforcementConfig::default(),
    );
    assert_eq!(
        decision.security_event.unwrap().event_type,
        SecurityEventType::HmacVerificationFailed
    );
}

#[test]
fn destroyed_session_key_cannot_verify() {
    let sessions = SessionManager::default();
    let meta = quarantine_caller(&sessions);
    let key = meta.key.clone().unwrap();
    let uri = mint("/tmp/a.txt", &meta.session_id, &key).unwrap().serialize();

    assert!(sessions.destroy_session(&meta.session_id));
    let decision = enforce_review_mode(
        "Read",
        &json!({"filePath": uri}),
        &meta,
        &EnforcementConfig::default(),
    );
    assert!(!decision.allowed);
    assert!(decision.reason.unwrap().contains("invalid_hmac"));
}

#[test]
fn non_object_args_never_crash() {
    let sessions = SessionManager::default();
    let meta = quarantine_caller(&sessions);
    let config = EnforcementConfig::default();
    for args in [
        Value::Null,
        json!(42),
        json!("typed://x"),
        json!([{"filePath": "typed://x"}]),
        json!({"filePath": null, "path": ["typed://x"], "pattern": {"x": 1}}),
    ] {
        assert!(enforce_review_mode("Read", &args, &meta, &config).allowed);
    }
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        ".*".prop_map(Value::from),
        "typed://.*".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::hash_map(
                prop_oneof![
                    Just("filePath".to_string()),
                    Just("path".to_string()),
                    Just("pattern".to_string()),
                    Just("content".to_string()),
                    "[a-z]{1,6}",
                ],
                inner,
                0..4
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn enforcement_never_panics_and_denies_carry_events(tool in ".*", args in arb_json()) {
        let meta = CallerMetadata {
            agent_id: "fuzz".to_string(),
            session_id: "fuzz-session".to_string(),
            is_quarantine: true,
            key: None,
        };
        let decision = enforce_review_mode(&tool, &args, &meta, &EnforcementConfig::default());
        prop_assert_eq!(decision.allowed, decision.security_event.is_none());
        if !["Read", "Grep", "Glob"].contains(&tool.as_str()) {
            prop_assert!(!decision.allowed);
        }
    }
}
