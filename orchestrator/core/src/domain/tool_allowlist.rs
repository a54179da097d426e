// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Quarantine Tool Allowlist
//!
//! The allowlist is the security boundary: anything not listed is denied. The
//! deny list and risk catalogue document the attack surface and feed audit
//! context and configuration validation; they never grant anything.
//!
//! All matching is exact and case-sensitive. `"Read "` and `"read"` are
//! distinct from `"Read"`.

use serde::{Deserialize, Serialize};

/// Default allowlist: read-only analysis tools.
pub const QUARANTINE_ALLOWED_TOOLS: [&str; 3] = ["Read", "Grep", "Glob"];

/// Tools known to be dangerous inside quarantine.
pub const QUARANTINE_DENIED_TOOLS: [&str; 17] = [
    "Bash",
    "Write",
    "Edit",
    "Task",
    "Skill",
    "WebFetch",
    "mcp_odoo",
    "mcp_linear",
    "mcp_n8n",
    "mcp_dify",
    "mcp_chatwoot",
    "mcp_garrett",
    "mcp_omi",
    "mcp_svelte",
    "mcp_deepwiki",
    "TodoWrite",
    "QuestionTool",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRisk {
    pub risk: RiskLevel,
    pub attack_scenario: &'static str,
}

/// Risk entry for a denied tool, `None` for anything not catalogued.
pub fn tool_risk(tool: &str) -> Option<ToolRisk> {
    let (risk, attack_scenario) = match tool {
        "Bash" => (RiskLevel::Critical, "AS-001: Arbitrary command execution"),
        "Write" => (RiskLevel::Critical, "AS-001: Write malicious files to disk"),
        "Edit" => (RiskLevel::Critical, "AS-001: Modify system/config files"),
        "Task" => (
            RiskLevel::Critical,
            "AS-007: Spawn privileged sub-agents (escape quarantine)",
        ),
        "Skill" => (
            RiskLevel::High,
            "AS-007: Invoke arbitrary skills with unknown capabilities",
        ),
        "WebFetch" => (RiskLevel::High, "AS-008: Exfiltrate data via HTTP requests"),
        "mcp_odoo" => (RiskLevel::High, "AS-008: Access CRM/ERP business data"),
        "mcp_linear" => (RiskLevel::High, "AS-008: Access project management data"),
        "mcp_n8n" => (
            RiskLevel::High,
            "AS-008: Trigger workflows, access automation data",
        ),
        "mcp_dify" => (RiskLevel::High, "AS-008: Access AI orchestration platform"),
        "mcp_chatwoot" => (RiskLevel::High, "AS-008: Access customer communication data"),
        "mcp_garrett" => (RiskLevel::High, "AS-008: Access Garrett AI integration"),
        "mcp_omi" => (RiskLevel::High, "AS-008: Access memory/conversation history"),
        "mcp_svelte" => (
            RiskLevel::High,
            "AS-008: Network access to documentation APIs",
        ),
        "mcp_deepwiki" => (RiskLevel::High, "AS-008: Network access to GitHub repos"),
        "TodoWrite" => (
            RiskLevel::Medium,
            "AS-003: Manipulate task state to hide malicious actions",
        ),
        "QuestionTool" => (
            RiskLevel::Medium,
            "AS-004: Social engineering via prompted user interaction",
        ),
        _ => return None,
    };
    Some(ToolRisk {
        risk,
        attack_scenario,
    })
}

pub fn is_tool_allowed<S: AsRef<str>>(tool: &str, allowlist: &[S]) -> bool {
    allowlist.iter().any(|t| t.as_ref() == tool)
}

pub fn is_tool_denied(tool: &str) -> bool {
    QUARANTINE_DENIED_TOOLS.contains(&tool)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCategory {
    ReadOnly,
    Write,
    Execution,
    Network,
    Mcp,
    Agent,
    Skill,
    State,
    Interaction,
    Other,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::ReadOnly => "read-only",
            ToolCategory::Write => "write",
            ToolCategory::Execution => "execution",
            ToolCategory::Network => "network",
            ToolCategory::Mcp => "mcp",
            ToolCategory::Agent => "agent",
            ToolCategory::Skill => "skill",
            ToolCategory::State => "state",
            ToolCategory::Interaction => "interaction",
            ToolCategory::Other => "other",
        }
    }
}

pub fn tool_category(tool: &str) -> ToolCategory {
    match tool {
        "Read" | "Grep" | "Glob" => ToolCategory::ReadOnly,
        "Write" | "Edit" => ToolCategory::Write,
        "Bash" => ToolCategory::Execution,
        "WebFetch" => ToolCategory::Network,
        t if t.starts_with("mcp_") => ToolCategory::Mcp,
        "Task" => ToolCategory::Agent,
        "Skill" => ToolCategory::Skill,
        "TodoWrite" => ToolCategory::State,
        "QuestionTool" => ToolCategory::Interaction,
        _ => ToolCategory::Other,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Check a proposed allowlist: it must be non-empty and contain no denied tool.
pub fn validate_tool_allowlist<S: AsRef<str>>(tools: &[S]) -> AllowlistValidation {
    let mut errors = Vec::new();

    if tools.is_empty() {
        errors.push("Allowlist cannot be empty".to_string());
    }

    for tool in tools.iter().map(AsRef::as_ref) {
        if is_tool_denied(tool) {
            let risk = tool_risk(tool).map_or("unknown", |r| r.risk.as_str());
            errors.push(format!("Tool '{tool}' is explicitly denied ({risk} risk)"));
        }
    }

    AllowlistValidation {
        valid: errors.is_empty(),
        errors,
    }
}
