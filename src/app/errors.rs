// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const CONNECTIVITY_ERROR: &str = "connectivity_error";
    pub const STAGING_ERROR: &str = "staging_error";
    pub const EXECUTION_ERROR: &str = "execution_error";
    pub const PARSE_ERROR: &str = "parse_error";
    pub const CANCELED: &str = "canceled";
    pub const CLEANUP_ERROR: &str = "cleanup_error";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Coarse error categories. `Canceled` is a normal termination path, not a
/// failure; `Cleanup` errors are collected per resource and never escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    Connectivity,
    Staging,
    Execution,
    Parse,
    Canceled,
    Cleanup,
    InvalidArgument,
    Internal,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Connectivity, codes::CONNECTIVITY_ERROR, message)
    }

    pub fn staging(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Staging, codes::STAGING_ERROR, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Execution, codes::EXECUTION_ERROR, message)
    }

    pub fn canceled() -> Self {
        Self::new(AppErrorKind::Canceled, codes::CANCELED)
    }

    pub fn cleanup(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Cleanup, codes::CLEANUP_ERROR, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::InvalidArgument,
            codes::INVALID_ARGUMENT,
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Internal, codes::INTERNAL_ERROR, message)
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn is_canceled(&self) -> bool {
        self.kind == AppErrorKind::Canceled
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_when_present() {
        let err = AppError::staging("upload failed").with_context("model.h5");
        assert_eq!(err.to_string(), "upload failed (model.h5)");
        assert_eq!(err.code(), codes::STAGING_ERROR);
    }

    #[test]
    fn canceled_is_not_a_failure_kind() {
        let err = AppError::canceled();
        assert!(err.is_canceled());
        assert_eq!(err.kind(), AppErrorKind::Canceled);
    }
}
