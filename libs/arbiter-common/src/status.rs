/// Judge status codes and their severity order
///
/// **Severity Rules:**
/// - Every status has a fixed rank; "worst observed" is the highest rank
/// - Accepted < in-flight (Compiling, Judging) < Wrong Answer
///   < Time Limit Exceeded < Memory Limit Exceeded < Runtime Error
///   < Compile Error < System Error
/// - The rank is spelled out in `severity()` instead of relying on the
///   declaration order or on wire codes, so adding a variant forces a
///   decision about where it sits.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Accepted,
    Compiling,
    Judging,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompileError,
    SystemError,
}

impl Status {
    /// Every variant, lowest severity first
    pub const ALL: [Status; 9] = [
        Status::Accepted,
        Status::Compiling,
        Status::Judging,
        Status::WrongAnswer,
        Status::TimeLimitExceeded,
        Status::MemoryLimitExceeded,
        Status::RuntimeError,
        Status::CompileError,
        Status::SystemError,
    ];

    pub fn severity(self) -> u8 {
        match self {
            Status::Accepted => 0,
            Status::Compiling => 1,
            Status::Judging => 2,
            Status::WrongAnswer => 3,
            Status::TimeLimitExceeded => 4,
            Status::MemoryLimitExceeded => 5,
            Status::RuntimeError => 6,
            Status::CompileError => 7,
            Status::SystemError => 8,
        }
    }

    /// Numeric code used on the judge wire protocol
    pub fn code(self) -> u8 {
        match self {
            Status::Accepted => 1,
            Status::WrongAnswer => 2,
            Status::TimeLimitExceeded => 3,
            Status::MemoryLimitExceeded => 4,
            Status::RuntimeError => 6,
            Status::CompileError => 7,
            Status::SystemError => 8,
            Status::Judging => 20,
            Status::Compiling => 21,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Status::ALL.iter().copied().find(|s| s.code() == code)
    }

    /// Severity max of two statuses
    pub fn worst(self, other: Status) -> Status {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// True for placeholder statuses that never end up in a verdict
    pub fn is_in_flight(self) -> bool {
        matches!(self, Status::Compiling | Status::Judging)
    }

    pub fn is_accepted(self) -> bool {
        self == Status::Accepted
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Accepted
    }
}

impl PartialOrd for Status {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Status {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Accepted => "Accepted",
            Status::Compiling => "Compiling",
            Status::Judging => "Judging",
            Status::WrongAnswer => "Wrong Answer",
            Status::TimeLimitExceeded => "Time Limit Exceeded",
            Status::MemoryLimitExceeded => "Memory Limit Exceeded",
            Status::RuntimeError => "Runtime Error",
            Status::CompileError => "Compile Error",
            Status::SystemError => "System Error",
        };
        f.pad(name)
    }
}
