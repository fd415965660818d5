//! Exit codes for the `sqa-aggregate` binary.
//!
//! Exit code ranges:
//! - 0: reports written
//! - 10-19: user/input errors (fixable by the operator)
//! - 20-29: internal errors

use crate::aggregate::AggregateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every report written.
    Clean = 0,

    /// Invalid arguments, or nothing to aggregate.
    ArgsError = 10,

    /// A shard contained a line that could not be decoded.
    DataError = 11,

    /// Internal error (bug - please report)
    InternalError = 20,

    /// Reading shards or writing reports failed.
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_user_error(self) -> bool {
        (10..20).contains(&self.as_i32())
    }

    pub fn is_internal_error(self) -> bool {
        self.as_i32() >= 20
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::DataError => "ERR_DATA",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

impl From<&AggregateError> for ExitCode {
    fn from(err: &AggregateError) -> Self {
        match err {
            AggregateError::NoDefinitionShards(_) => ExitCode::ArgsError,
            AggregateError::MalformedLine { .. } => ExitCode::DataError,
            AggregateError::Io { .. } | AggregateError::Json { .. } => ExitCode::IoError,
            AggregateError::WorkerPanicked => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
