use thiserror::Error;

/// Failures surfaced by the terrain pipeline.
///
/// Unmet buildability targets are not errors; they are reported through
/// [`crate::verify::VerificationOutcome`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TerrainError {
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
    #[error("particle {particle} diverged: {detail}")]
    NumericDivergence { particle: u64, detail: String },
    #[error("stage `{stage}` broke a grid invariant: {detail}")]
    InvariantViolation { stage: &'static str, detail: String },
    #[error("run cancelled during `{stage}`")]
    Cancelled { stage: &'static str },
}

impl TerrainError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }
}
