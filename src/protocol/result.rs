//! Operation result codes
//!
//! Numeric error codes carried in `*Completed` messages.

use std::fmt;

/// Outcome of a write-side operation as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Success,
    PrepareTimeout,
    CommitTimeout,
    ForwardTimeout,
    WrongExpectedVersion,
    StreamDeleted,
    InvalidTransaction,
    /// A code outside the known table
    Unknown(i32),
}

impl OperationResult {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => OperationResult::Success,
            1 => OperationResult::PrepareTimeout,
            2 => OperationResult::CommitTimeout,
            3 => OperationResult::ForwardTimeout,
            4 => OperationResult::WrongExpectedVersion,
            5 => OperationResult::StreamDeleted,
            6 => OperationResult::InvalidTransaction,
            other => OperationResult::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            OperationResult::Success => 0,
            OperationResult::PrepareTimeout => 1,
            OperationResult::CommitTimeout => 2,
            OperationResult::ForwardTimeout => 3,
            OperationResult::WrongExpectedVersion => 4,
            OperationResult::StreamDeleted => 5,
            OperationResult::InvalidTransaction => 6,
            OperationResult::Unknown(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == OperationResult::Success
    }
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationResult::Success => f.write_str("Success"),
            OperationResult::PrepareTimeout => f.write_str("PrepareTimeout"),
            OperationResult::CommitTimeout => f.write_str("CommitTimeout"),
            OperationResult::ForwardTimeout => f.write_str("ForwardTimeout"),
            OperationResult::WrongExpectedVersion => f.write_str("WrongExpectedVersion"),
            OperationResult::StreamDeleted => f.write_str("StreamDeleted"),
            OperationResult::InvalidTransaction => f.write_str("InvalidTransaction"),
            OperationResult::Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}
