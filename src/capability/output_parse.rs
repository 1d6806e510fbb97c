use crate::capability::{diagnosis_status, CapabilityError, CapabilityResponse};
use crate::coordination::task::{CapabilityKind, StepStatus};
use serde::Deserialize;
use serde_json::Value;

/// JSON reply written to stdout by a capability program.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub confidence: Option<u8>,
    #[serde(default)]
    pub problem_identified: Option<bool>,
}

pub fn parse_capability_reply(
    kind: CapabilityKind,
    stdout: &str,
    low_confidence_threshold: u8,
) -> Result<CapabilityResponse, CapabilityError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(CapabilityError::InvalidOutput {
            kind,
            reason: "stdout was empty".to_string(),
        });
    }
    let reply: CapabilityReply =
        serde_json::from_str(last_json_line(trimmed)).map_err(|err| {
            CapabilityError::InvalidOutput {
                kind,
                reason: format!("invalid reply json: {err}"),
            }
        })?;

    let status = match reply.status.as_deref() {
        Some(raw) => StepStatus::parse(raw)
            .map_err(|reason| CapabilityError::InvalidOutput { kind, reason })?,
        None if kind == CapabilityKind::Diagnosis => diagnosis_status(
            reply.confidence,
            reply.problem_identified,
            low_confidence_threshold,
        ),
        None => StepStatus::Success,
    };
    if status != StepStatus::Error && reply.summary.trim().is_empty() {
        return Err(CapabilityError::InvalidOutput {
            kind,
            reason: "reply is missing `summary`".to_string(),
        });
    }

    let mut payload = reply.payload;
    if kind == CapabilityKind::Diagnosis {
        payload = attach_diagnosis_fields(payload, reply.confidence, reply.problem_identified);
    }

    Ok(CapabilityResponse {
        status,
        payload,
        summary: reply.summary.trim().to_string(),
    })
}

/// Programs may log before the reply; the reply is the last non-empty line
/// unless the whole output is one JSON document.
fn last_json_line(stdout: &str) -> &str {
    if serde_json::from_str::<Value>(stdout).is_ok() {
        return stdout;
    }
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(stdout)
}

fn attach_diagnosis_fields(
    payload: Value,
    confidence: Option<u8>,
    problem_identified: Option<bool>,
) -> Value {
    if confidence.is_none() && problem_identified.is_none() {
        return payload;
    }
    let mut object = match payload {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    if let Some(confidence) = confidence {
        object
            .entry("confidence")
            .or_insert_with(|| Value::from(confidence));
    }
    if let Some(problem_identified) = problem_identified {
        object
            .entry("problemIdentified")
            .or_insert(Value::Bool(problem_identified));
    }
    Value::Object(object)
}
