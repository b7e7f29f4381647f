use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type CogCheckResult<T> = Result<T, CogCheckError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Success,
    VerificationFailure,
    InputValidationError,
    IoSystemError,
    ServiceError,
    InternalError,
}

impl ErrorCategory {
    pub const fn exit_mapping(self) -> ExitMapping {
        match self {
            Self::Success => ExitMapping {
                exit_code: 0,
                category_name: "Success",
            },
            Self::VerificationFailure => ExitMapping {
                exit_code: 1,
                category_name: "VerificationFailure",
            },
            Self::InputValidationError => ExitMapping {
                exit_code: 2,
                category_name: "InputValidationError",
            },
            Self::IoSystemError => ExitMapping {
                exit_code: 3,
                category_name: "IoSystemError",
            },
            Self::ServiceError => ExitMapping {
                exit_code: 4,
                category_name: "ServiceError",
            },
            Self::InternalError => ExitMapping {
                exit_code: 5,
                category_name: "InternalError",
            },
        }
    }

    pub const fn exit_code(self) -> i32 {
        self.exit_mapping().exit_code
    }

    pub const fn category_name(self) -> &'static str {
        self.exit_mapping().category_name
    }

    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitMapping {
    pub exit_code: i32,
    pub category_name: &'static str,
}

/// Why a single artifact or scenario failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    UnreadableArtifact,
    StructuralMismatch,
    MetadataMismatch,
    ShapeMismatch,
    ContentMismatch,
    UnexpectedJobOutcome,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnreadableArtifact => "UnreadableArtifact",
            Self::StructuralMismatch => "StructuralMismatch",
            Self::MetadataMismatch => "MetadataMismatch",
            Self::ShapeMismatch => "ShapeMismatch",
            Self::ContentMismatch => "ContentMismatch",
            Self::UnexpectedJobOutcome => "UnexpectedJobOutcome",
        }
    }

    pub const fn placeholder(self) -> &'static str {
        match self {
            Self::UnreadableArtifact => "VERIFY.UNREADABLE_ARTIFACT",
            Self::StructuralMismatch => "VERIFY.STRUCTURE",
            Self::MetadataMismatch => "VERIFY.METADATA",
            Self::ShapeMismatch => "VERIFY.SHAPE",
            Self::ContentMismatch => "VERIFY.CONTENT",
            Self::UnexpectedJobOutcome => "VERIFY.JOB_OUTCOME",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CogCheckError {
    category: ErrorCategory,
    placeholder: &'static str,
    message: String,
}

impl CogCheckError {
    pub fn new(category: ErrorCategory, placeholder: &'static str, message: impl Into<String>) -> Self {
        Self {
            category,
            placeholder,
            message: message.into(),
        }
    }

    pub fn verification(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::VerificationFailure, kind.placeholder(), message)
    }

    pub fn input_validation(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InputValidationError, placeholder, message)
    }

    pub fn io_system(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::IoSystemError, placeholder, message)
    }

    pub fn service(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ServiceError, placeholder, message)
    }

    pub fn internal(placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InternalError, placeholder, message)
    }

    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        let severity = if self.category.is_fatal() {
            "ERROR"
        } else {
            "INFO"
        };
        format!("{}: [{}] {}", severity, self.placeholder, self.message)
    }

    pub fn fatal_exit_line(&self) -> Option<String> {
        self.category
            .is_fatal()
            .then(|| format!("EXIT CODE: {}", self.exit_code()))
    }
}

impl Display for CogCheckError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.category.category_name(),
            self.placeholder,
            self.message
        )
    }
}

impl Error for CogCheckError {}
