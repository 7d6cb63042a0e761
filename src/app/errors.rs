// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error;

/// Error taxonomy for everything a job can fail with. Validation and
/// concurrency rejections surface to the RPC caller as 400s; the rest are
/// server-side failures recorded on the job row.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error(
        "you already have more than {limit} {category} jobs in progress, please wait for it to finish"
    )]
    ConcurrencyExceeded { category: &'static str, limit: u32 },

    #[error("platform request failed: {0}")]
    Platform(String),

    #[error("bad backup file: {0}")]
    Format(String),

    #[error("job cancelled")]
    Cancelled,

    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<JobError>,
    },

    #[error("{0}")]
    Internal(String),
}

impl JobError {
    pub fn validation(message: impl Into<String>) -> Self {
        JobError::Validation(message.into())
    }

    pub fn platform(message: impl Into<String>) -> Self {
        JobError::Platform(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        JobError::Format(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        JobError::Internal(message.into())
    }

    pub fn step(step: &str, source: JobError) -> Self {
        JobError::Step {
            step: step.to_string(),
            source: Box::new(source),
        }
    }

    /// The step the error occurred in, if it happened inside a stepper run.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            JobError::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Whether the error is the caller's fault (rejected before any work ran).
    pub fn is_rejection(&self) -> bool {
        match self {
            JobError::Validation(_) | JobError::ConcurrencyExceeded { .. } => true,
            JobError::Step { source, .. } => source.is_rejection(),
            _ => false,
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_message_names_category_and_limit() {
        let err = JobError::ConcurrencyExceeded {
            category: "backup-related",
            limit: 1,
        };
        assert_eq!(
            err.to_string(),
            "you already have more than 1 backup-related jobs in progress, please wait for it to finish"
        );
        assert!(err.is_rejection());
    }

    #[test]
    fn step_errors_carry_the_step_name() {
        let err = JobError::step("create_new_roles", JobError::platform("boom"));
        assert_eq!(err.step_name(), Some("create_new_roles"));
        assert!(err.to_string().contains("create_new_roles"));
        assert!(!err.is_rejection());
    }
}
