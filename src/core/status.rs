use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job or step execution.
///
/// Variants are declared in order of increasing severity, which is what
/// [`BatchStatus::upgrade_to`] relies on when combining statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    /**
     * The batch job has successfully completed its execution.
     */
    Completed,
    /**
     * Status of a batch job prior to its execution.
     */
    Starting,
    /**
     * Status of a batch job that is running.
     */
    Started,
    /**
     * Status of batch job waiting for a step to complete before stopping the batch job.
     */
    Stopping,
    /**
     * Status of a batch job that has been stopped by request.
     */
    Stopped,
    /**
     * Status of a batch job that has failed during its execution.
     */
    Failed,
    /**
     * Status of a batch job that did not stop properly and can not be restarted.
     */
    Abandoned,
    /**
     * Status of a batch job that is in an uncertain state.
     */
    Unknown,
}

impl BatchStatus {
    /// Returns the more severe of the two statuses.
    ///
    /// Running statuses are an exception: upgrading from `Starting` or
    /// `Started` to `Completed` is allowed, since that is the normal end of a
    /// running execution.
    ///
    /// ```
    /// use resumable_batch::core::status::BatchStatus;
    ///
    /// assert_eq!(BatchStatus::Completed.upgrade_to(BatchStatus::Failed), BatchStatus::Failed);
    /// assert_eq!(BatchStatus::Failed.upgrade_to(BatchStatus::Completed), BatchStatus::Failed);
    /// assert_eq!(BatchStatus::Started.upgrade_to(BatchStatus::Completed), BatchStatus::Completed);
    /// ```
    pub fn upgrade_to(self, other: BatchStatus) -> BatchStatus {
        if self.is_greater_than_started() || other.is_greater_than_started() {
            self.max(other)
        } else if self == BatchStatus::Completed || other == BatchStatus::Completed {
            BatchStatus::Completed
        } else {
            self.max(other)
        }
    }

    fn is_greater_than_started(&self) -> bool {
        *self > BatchStatus::Started
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    pub fn is_unsuccessful(&self) -> bool {
        matches!(
            self,
            BatchStatus::Failed | BatchStatus::Unknown | BatchStatus::Abandoned
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Abandoned => "ABANDONED",
            BatchStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a job or step: an exit code plus free-form description.
///
/// Unlike [`BatchStatus`], the exit code is open ended; listeners may set any
/// code they like. The well-known codes are ranked by severity so that two
/// outcomes can be combined with [`ExitStatus::and`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    exit_code: String,
    exit_description: String,
}

impl ExitStatus {
    pub const UNKNOWN_CODE: &'static str = "UNKNOWN";
    pub const EXECUTING_CODE: &'static str = "EXECUTING";
    pub const COMPLETED_CODE: &'static str = "COMPLETED";
    pub const NOOP_CODE: &'static str = "NOOP";
    pub const FAILED_CODE: &'static str = "FAILED";
    pub const STOPPED_CODE: &'static str = "STOPPED";

    pub fn new(exit_code: &str) -> Self {
        Self::with_description(exit_code, "")
    }

    pub fn with_description(exit_code: &str, exit_description: &str) -> Self {
        Self {
            exit_code: exit_code.to_string(),
            exit_description: exit_description.to_string(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN_CODE)
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING_CODE)
    }

    pub fn completed() -> Self {
        Self::new(Self::COMPLETED_CODE)
    }

    pub fn noop() -> Self {
        Self::new(Self::NOOP_CODE)
    }

    pub fn failed() -> Self {
        Self::new(Self::FAILED_CODE)
    }

    pub fn stopped() -> Self {
        Self::new(Self::STOPPED_CODE)
    }

    pub fn exit_code(&self) -> &str {
        &self.exit_code
    }

    pub fn exit_description(&self) -> &str {
        &self.exit_description
    }

    /// Combines two outcomes: the exit code of the more severe one wins and
    /// the descriptions are concatenated.
    ///
    /// ```
    /// use resumable_batch::core::status::ExitStatus;
    ///
    /// let status = ExitStatus::completed().and(&ExitStatus::failed());
    /// assert_eq!(status.exit_code(), ExitStatus::FAILED_CODE);
    /// ```
    pub fn and(&self, other: &ExitStatus) -> ExitStatus {
        let mut result = self.add_exit_description(&other.exit_description);
        if self.severity() < other.severity() {
            result.exit_code = other.exit_code.clone();
        }
        result
    }

    /// Ranks exit codes; custom codes outrank every built-in one.
    fn severity(&self) -> u8 {
        match self.exit_code.as_str() {
            Self::EXECUTING_CODE => 1,
            Self::COMPLETED_CODE => 2,
            Self::NOOP_CODE => 3,
            Self::STOPPED_CODE => 4,
            Self::FAILED_CODE => 5,
            Self::UNKNOWN_CODE => 6,
            _ => 7,
        }
    }

    pub fn add_exit_description(&self, description: &str) -> ExitStatus {
        let exit_description = match (self.exit_description.is_empty(), description.is_empty()) {
            (_, true) => self.exit_description.clone(),
            (true, false) => description.to_string(),
            (false, false) if self.exit_description == description => self.exit_description.clone(),
            (false, false) => format!("{}; {}", self.exit_description, description),
        };
        ExitStatus {
            exit_code: self.exit_code.clone(),
            exit_description,
        }
    }

    pub fn replace_exit_code(&self, exit_code: &str) -> ExitStatus {
        ExitStatus {
            exit_code: exit_code.to_string(),
            exit_description: self.exit_description.clone(),
        }
    }

    /// True while the execution this status belongs to has not finished.
    pub fn is_running(&self) -> bool {
        self.exit_code == Self::EXECUTING_CODE || self.exit_code == Self::UNKNOWN_CODE
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::executing()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exitCode={};exitDescription={}",
            self.exit_code, self.exit_description
        )
    }
}
