//! Domain model and wire DTOs shared between the HTTP front end, the queue
//! producer/consumer, and the pipeline.
//!
//! Mirrors the split between persisted records and wire DTOs in the service
//! this crate's host system reimplements: the persisted shape and the JSON
//! shape are kept as separate types because they evolve independently
//! (e.g. `id` is never accepted from a client).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Status lattice for a `factorial_calculations` row.
///
/// Transitions only move forward (`calculating -> uploading -> done`);
/// `failed` is terminal for the attempt that produced it but is reopened by
/// the next delivery of the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CalculationStatus {
    Calculating,
    Uploading,
    Done,
    Failed,
}

impl CalculationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalculationStatus::Calculating => "calculating",
            CalculationStatus::Uploading => "uploading",
            CalculationStatus::Done => "done",
            CalculationStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CalculationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calculating" => Ok(CalculationStatus::Calculating),
            "uploading" => Ok(CalculationStatus::Uploading),
            "done" => Ok(CalculationStatus::Done),
            "failed" => Ok(CalculationStatus::Failed),
            other => Err(format!("unknown calculation status: {other}")),
        }
    }
}

/// A row in `factorial_calculations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationRecord {
    pub id: i64,
    pub number: u64,
    pub status: CalculationStatus,
    pub artifact_key: String,
    pub checksum: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The maximum input accepted by the service regardless of configuration.
pub const HARD_MAX_FACTORIAL: u64 = 100_000;

/// The default configured bound, used when `MAX_FACTORIAL` is unset.
pub const DEFAULT_MAX_FACTORIAL: u64 = 10_000;

/// Default cache threshold, used when `REDIS_THRESHOLD` is unset.
pub const DEFAULT_CACHE_THRESHOLD: u64 = 1_000;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid number format: {0}")]
    InvalidFormat(String),
    #[error("number must be non-negative")]
    Negative,
    #[error("number exceeds maximum allowed value of {0}")]
    TooLarge(u64),
}

/// Parses and bounds-checks a decimal request number against `max`.
///
/// `max` is the service's *configured* bound (never above
/// [`HARD_MAX_FACTORIAL`]); callers are expected to have already clamped it
/// via [`clamp_max_factorial`].
pub fn validate_number(raw: &str, max: u64) -> Result<u64, ValidationError> {
    if raw.starts_with('-') {
        return Err(ValidationError::Negative);
    }
    let n: u64 = raw
        .parse()
        .map_err(|_| ValidationError::InvalidFormat(raw.to_string()))?;
    if n > max {
        return Err(ValidationError::TooLarge(max));
    }
    Ok(n)
}

/// Clamps a configured `MAX_FACTORIAL` to the hard cap.
pub fn clamp_max_factorial(configured: u64) -> u64 {
    configured.min(HARD_MAX_FACTORIAL)
}

/// The message body published to and consumed from the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorialMessage {
    pub number: String,
}

impl FactorialMessage {
    pub fn new(number: u64) -> Self {
        FactorialMessage {
            number: number.to_string(),
        }
    }
}

/// The uniform HTTP response envelope used by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub status: String,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(code: u16, message: impl Into<String>, data: T) -> Self {
        ApiResponse {
            code,
            status: "ok".to_string(),
            message: message.into(),
            data,
        }
    }
}

impl ApiResponse<ErrorData> {
    pub fn fail(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        ApiResponse {
            code,
            status: "fail".to_string(),
            message: message.clone(),
            data: ErrorData {
                error: "fail".to_string(),
                message,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorData {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CalculateRequest {
    pub number: String,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct CalculateResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResultResponseData {
    pub number: String,
    pub factorial_result: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetadataResponseData {
    pub id: String,
    pub number: String,
    pub artifact_key: String,
    pub checksum: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&CalculationRecord> for MetadataResponseData {
    fn from(record: &CalculationRecord) -> Self {
        MetadataResponseData {
            id: record.id.to_string(),
            number: record.number.to_string(),
            artifact_key: record.artifact_key.clone(),
            checksum: record.checksum.clone(),
            status: record.status.to_string(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_number_accepts_within_bound() {
        assert_eq!(validate_number("42", 100).unwrap(), 42);
    }

    #[test]
    fn validate_number_rejects_above_bound() {
        assert_eq!(
            validate_number("101", 100),
            Err(ValidationError::TooLarge(100))
        );
    }

    #[test]
    fn validate_number_rejects_negative_and_garbage() {
        assert_eq!(validate_number("-1", 100), Err(ValidationError::Negative));
        assert!(matches!(
            validate_number("abc", 100),
            Err(ValidationError::InvalidFormat(_))
        ));
    }

    #[test]
    fn clamp_never_exceeds_hard_cap() {
        assert_eq!(clamp_max_factorial(500_000), HARD_MAX_FACTORIAL);
        assert_eq!(clamp_max_factorial(5_000), 5_000);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in ["calculating", "uploading", "done", "failed"] {
            let status: CalculationStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
    }
}
