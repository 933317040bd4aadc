// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Errors raised while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CelError {
    /// The text failed to lex, parse or type-check against its environment.
    #[error("invalid expression {expression:?}: {message}")]
    InvalidExpression { expression: String, message: String },

    /// A runtime failure: missing binding, overflow, wrong operand kind.
    #[error("evaluation error: {0}")]
    Eval(String),

    /// A persisted checked form could not be decoded.
    #[error("failed to decode checked expression: {0}")]
    Decode(String),
}

impl CelError {
    pub(crate) fn invalid(expression: &str, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn eval(message: impl Into<String>) -> Self {
        Self::Eval(message.into())
    }
}

pub type Result<T> = std::result::Result<T, CelError>;
