//! Typed errors for the detection loop and the history reader.
//!
//! Glue and startup code uses `anyhow`; these types mark the seams where a
//! caller has to pick a policy (end the stream, skip a frame, answer a request
//! with an error body).

use std::fmt;

/// Failure of one detection loop step.
#[derive(Debug)]
pub enum PipelineError {
    /// The frame source returned no frame. Ends the stream.
    Capture(anyhow::Error),
    /// The detector failed on a frame.
    Detect(anyhow::Error),
    /// The annotated frame could not be encoded.
    Encode(anyhow::Error),
}

impl PipelineError {
    pub fn step(&self) -> &'static str {
        match self {
            PipelineError::Capture(_) => "capture",
            PipelineError::Detect(_) => "detect",
            PipelineError::Encode(_) => "encode",
        }
    }

    /// Capture failures terminate the loop regardless of frame error policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Capture(_))
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Capture(err) => write!(f, "capture failed: {:#}", err),
            PipelineError::Detect(err) => write!(f, "detection failed: {:#}", err),
            PipelineError::Encode(err) => write!(f, "encoding failed: {:#}", err),
        }
    }
}

impl std::error::Error for PipelineError {}

/// Failure reading sensor history from the remote store.
#[derive(Debug)]
pub enum StoreError {
    /// Transport failure or non-success status from the store.
    Unreachable(String),
    /// A required path is absent from the snapshot.
    NotFound(String),
    /// A record's timestamp is not an integer.
    MalformedTimestamp { key: String, value: String },
    /// The snapshot has an unexpected shape.
    Malformed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unreachable(reason) => write!(f, "store unreachable: {}", reason),
            StoreError::NotFound(path) => write!(f, "no data found at {}", path),
            StoreError::MalformedTimestamp { key, value } => {
                write!(f, "record {} has malformed timestamp {}", key, value)
            }
            StoreError::Malformed(reason) => write!(f, "malformed snapshot: {}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn only_capture_is_fatal() {
        assert!(PipelineError::Capture(anyhow!("gone")).is_fatal());
        assert!(!PipelineError::Detect(anyhow!("bad tensor")).is_fatal());
        assert!(!PipelineError::Encode(anyhow!("jpeg")).is_fatal());
    }

    #[test]
    fn store_error_messages_name_the_cause() {
        let err = StoreError::MalformedTimestamp {
            key: "-Nabc".to_string(),
            value: "\"abc\"".to_string(),
        };
        assert_eq!(err.to_string(), "record -Nabc has malformed timestamp \"abc\"");
    }
}
