use thiserror::Error;

/// Errors raised before a calculation starts.
///
/// Non-convergence is not an error: solvers report it through their result
/// types so a batch can carry on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid input `{field}`: {reason}")]
    InvalidInput { field: &'static str, reason: String },

    #[error("malformed bracket table for regime `{regime}`: {reason}")]
    MalformedBrackets { regime: String, reason: String },

    #[error("numerical error in {context}: {reason}")]
    Numerical {
        context: &'static str,
        reason: String,
    },
}

impl EngineError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    pub fn brackets(regime: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::MalformedBrackets {
            regime: regime.into(),
            reason: reason.into(),
        }
    }

    pub fn numerical(context: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Numerical {
            context,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_message_names_field() {
        let err = EngineError::invalid("swr", "must be > 0");
        assert_eq!(err.to_string(), "invalid input `swr`: must be > 0");
    }

    #[test]
    fn bracket_error_names_regime() {
        let err = EngineError::brackets("new", "gap between 400000 and 500000");
        assert!(err.to_string().contains("`new`"));
    }
}
