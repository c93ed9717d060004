//! Typed error hierarchy for the fabula pipeline.
//!
//! Three top-level enums cover the three subsystems:
//! - `GenerationError` — client/transport failures during a generation attempt
//! - `CheckpointError` — snapshot persistence failures
//! - `PipelineError` — orchestration failures
//!
//! The generation client never lets a `GenerationError` escape its public
//! surface: transport, service, and empty-output failures are retried, and
//! an exhausted budget surfaces as an absence. The variants exist so the
//! retry loop and the tests can classify individual attempts.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single generation attempt, or of the overall retry budget.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned non-success status {status}")]
    Service { status: u16 },

    #[error("service returned an empty response body")]
    EmptyOutput,

    #[error("failed to decode structured output: {0}")]
    Decode(String),

    #[error("retry budget exhausted after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },
}

impl GenerationError {
    /// Transport, service, and empty-output failures are retried by
    /// re-issuing the request. Decode failures are not — they are handled
    /// by local repair against the already-obtained text.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Transport(_)
                | GenerationError::Service { .. }
                | GenerationError::EmptyOutput
        )
    }
}

/// Errors from the checkpoint store.
///
/// `NotFound` is an expected, non-fatal outcome: callers asking for the
/// latest snapshot of a phase that never ran get it routinely.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no snapshot found for {0}")]
    NotFound(String),

    #[error("snapshot at {path} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the pipeline orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("prerequisite not met: {0}")]
    Prerequisite(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_service_and_empty_are_retryable() {
        assert!(GenerationError::Transport("connection refused".into()).is_retryable());
        assert!(GenerationError::Service { status: 500 }.is_retryable());
        assert!(GenerationError::EmptyOutput.is_retryable());
    }

    #[test]
    fn decode_and_exhaustion_are_not_retryable() {
        assert!(!GenerationError::Decode("bad json".into()).is_retryable());
        assert!(!GenerationError::ExhaustedRetries { attempts: 3 }.is_retryable());
    }

    #[test]
    fn exhausted_retries_carries_attempt_count() {
        let err = GenerationError::ExhaustedRetries { attempts: 5 };
        match &err {
            GenerationError::ExhaustedRetries { attempts } => assert_eq!(*attempts, 5),
            _ => panic!("expected ExhaustedRetries"),
        }
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn checkpoint_decode_is_distinct_from_not_found() {
        let missing = CheckpointError::NotFound("phase1_expansion".into());
        assert!(matches!(missing, CheckpointError::NotFound(_)));

        let bad_json: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let corrupt = CheckpointError::Decode {
            path: PathBuf::from("phase1_20240101_090000.json"),
            source: bad_json,
        };
        assert!(matches!(corrupt, CheckpointError::Decode { .. }));
    }

    #[test]
    fn pipeline_error_converts_from_checkpoint_error() {
        let inner = CheckpointError::NotFound("phase3_world".into());
        let err: PipelineError = inner.into();
        match &err {
            PipelineError::Checkpoint(CheckpointError::NotFound(phase)) => {
                assert_eq!(phase, "phase3_world");
            }
            _ => panic!("expected PipelineError::Checkpoint(NotFound)"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&GenerationError::EmptyOutput);
        assert_std_error(&CheckpointError::NotFound("x".into()));
        assert_std_error(&PipelineError::Prerequisite("server down".into()));
    }
}
