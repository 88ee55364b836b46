//! Versioned command/response envelopes for the scheduler host.

use serde::{Deserialize, Serialize};

/// Contract version for host envelopes.
pub const CONTRACT_VERSION: u32 = 1;

/// Command set understood by the scheduler host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
    #[serde(rename = "scheduler.trigger")]
    SchedulerTrigger,
    #[serde(rename = "scheduler.plan_changed")]
    SchedulerPlanChanged,
    #[serde(rename = "scheduler.user_interaction")]
    SchedulerUserInteraction,
    #[serde(rename = "runs.recent")]
    RunsRecent,
    #[serde(rename = "runs.failed")]
    RunsFailed,
    #[serde(rename = "runs.get")]
    RunsGet,
    #[serde(rename = "runs.by_topic")]
    RunsByTopic,
    #[serde(rename = "runs.next")]
    RunsNext,
    #[serde(rename = "runs.statistics")]
    RunsStatistics,
    #[serde(rename = "interactions.list")]
    InteractionsList,
}

impl CommandName {
    pub const ALL: [CommandName; 12] = [
        Self::HostPing,
        Self::RuntimeStop,
        Self::SchedulerTrigger,
        Self::SchedulerPlanChanged,
        Self::SchedulerUserInteraction,
        Self::RunsRecent,
        Self::RunsFailed,
        Self::RunsGet,
        Self::RunsByTopic,
        Self::RunsNext,
        Self::RunsStatistics,
        Self::InteractionsList,
    ];

    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::RuntimeStop => "runtime.stop",
            Self::SchedulerTrigger => "scheduler.trigger",
            Self::SchedulerPlanChanged => "scheduler.plan_changed",
            Self::SchedulerUserInteraction => "scheduler.user_interaction",
            Self::RunsRecent => "runs.recent",
            Self::RunsFailed => "runs.failed",
            Self::RunsGet => "runs.get",
            Self::RunsByTopic => "runs.by_topic",
            Self::RunsNext => "runs.next",
            Self::RunsStatistics => "runs.statistics",
            Self::InteractionsList => "interactions.list",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

/// A versioned command envelope from the embedding process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != CONTRACT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, CONTRACT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned response envelope back to the embedding process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: CONTRACT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
    InvalidPayload,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ContractErrorKind::InvalidPayload, message.into())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn command_names_round_trip_wire_format() {
        for command in CommandName::ALL {
            assert_eq!(CommandName::parse(command.as_str()), Some(command));
            let json = serde_json::to_string(&command).unwrap();
            assert_eq!(json, format!("\"{}\"", command.as_str()));
        }
        assert_eq!(CommandName::parse("runs.delete"), None);
    }

    #[test]
    fn envelope_without_payload_defaults_to_null() {
        let envelope: CommandEnvelope =
            serde_json::from_str(r#"{"v":1,"request_id":"r1","command":"runs.next"}"#).unwrap();
        assert!(envelope.payload.is_null());
        envelope.validate().unwrap();
    }

    #[test]
    fn validate_rejects_wrong_version_and_empty_id() {
        let mut envelope = CommandEnvelope::new("r1", CommandName::HostPing, serde_json::json!({}));
        envelope.v = 2;
        assert_eq!(
            envelope.validate().unwrap_err().kind,
            ContractErrorKind::UnsupportedVersion
        );

        let envelope = CommandEnvelope::new("  ", CommandName::HostPing, serde_json::json!({}));
        assert_eq!(
            envelope.validate().unwrap_err().kind,
            ContractErrorKind::InvalidEnvelope
        );
    }

    #[test]
    fn error_response_is_well_formed() {
        let resp = ResponseEnvelope::error("parse-error", "bad json");
        assert!(!resp.ok);
        assert_eq!(resp.v, CONTRACT_VERSION);
        assert!(resp.payload.is_null());
        assert_eq!(resp.error.as_deref(), Some("bad json"));
    }
}
