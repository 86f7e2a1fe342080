use thiserror::Error;

/// Errors raised synchronously while preparing an optimization run.
///
/// Solver-side outcomes (infeasibility, time limits, backend failures) are
/// *not* errors: the solver driver reports them as a [`crate::solver::Termination`]
/// and the extractor turns them into a diagnostic result with an empty
/// schedule. Only the caller-side faults below propagate as `Err`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The price bundle or request is malformed: wrong array lengths,
    /// missing series, non-finite prices, invalid c-rate or alpha.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The configuration is internally inconsistent: bad segment cost list,
    /// malformed calendar breakpoints, unknown model type.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SchedulerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::invalid_input("day_ahead has 10 entries, expected 96");
        assert_eq!(
            err.to_string(),
            "invalid input: day_ahead has 10 entries, expected 96"
        );

        let err = SchedulerError::configuration("unknown model type: IV");
        assert_eq!(err.to_string(), "configuration error: unknown model type: IV");
    }
}
