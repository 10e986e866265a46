//! Cooperative async operations.
//!
//! Every long-running piece of work in this crate (manifest decoding, cache
//! verification, downloads, version updates) is an explicit step machine
//! implementing [`AsyncOperation`]. The host drives it by calling `update()`
//! from its own loop; nothing blocks the driving thread except
//! [`AsyncOperation::wait_for_async_complete`], which re-entrantly ticks the
//! same machine until it reaches a terminal status.
//!
//! # Example
//!
//! ```ignore
//! use assetpatch::operation::AsyncOperation;
//!
//! let mut op = package.update_package_version(false);
//! while !op.is_done() {
//!     op.update();
//!     // ... render a frame, poll input, etc.
//! }
//! println!("version: {:?}", op.package_version());
//! ```

use std::fmt;
use std::thread;
use std::time::Duration;

/// Interval slept between ticks while forcing synchronous completion.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Terminal and non-terminal status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationStatus {
    /// Created but not started.
    #[default]
    None,
    /// Work in progress.
    Processing,
    /// Completed successfully.
    Succeed,
    /// Completed with an error.
    Failed,
}

impl OperationStatus {
    /// Whether this status is terminal.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Succeed | Self::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Processing => "processing",
            Self::Succeed => "succeed",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// A step machine driven by repeated `update()` calls.
pub trait AsyncOperation {
    /// Advance the machine by one step.
    ///
    /// Calling `update()` on a finished operation is a no-op.
    fn update(&mut self);

    /// Current status.
    fn status(&self) -> OperationStatus;

    /// Progress in `0.0..=1.0`.
    fn progress(&self) -> f32;

    /// Last error message, if the operation failed.
    fn error(&self) -> Option<&str>;

    /// Whether the operation reached a terminal status.
    fn is_done(&self) -> bool {
        self.status().is_done()
    }

    /// Force synchronous completion by driving `update()` until done.
    fn wait_for_async_complete(&mut self) {
        while !self.is_done() {
            self.update();
            if !self.is_done() {
                thread::sleep(WAIT_POLL_INTERVAL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountDown {
        remaining: u32,
        status: OperationStatus,
    }

    impl AsyncOperation for CountDown {
        fn update(&mut self) {
            if self.status.is_done() {
                return;
            }
            self.status = OperationStatus::Processing;
            self.remaining = self.remaining.saturating_sub(1);
            if self.remaining == 0 {
                self.status = OperationStatus::Succeed;
            }
        }

        fn status(&self) -> OperationStatus {
            self.status
        }

        fn progress(&self) -> f32 {
            0.0
        }

        fn error(&self) -> Option<&str> {
            None
        }
    }

    #[test]
    fn test_wait_for_async_complete_drives_to_terminal() {
        let mut op = CountDown {
            remaining: 5,
            status: OperationStatus::None,
        };
        op.wait_for_async_complete();
        assert_eq!(op.status(), OperationStatus::Succeed);
        assert_eq!(op.remaining, 0);
    }

    #[test]
    fn test_status_is_done() {
        assert!(!OperationStatus::None.is_done());
        assert!(!OperationStatus::Processing.is_done());
        assert!(OperationStatus::Succeed.is_done());
        assert!(OperationStatus::Failed.is_done());
        assert_eq!(OperationStatus::Failed.to_string(), "failed");
    }
}
