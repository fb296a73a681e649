//! Machine state reported by drivers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Observed state of a machine.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum State {
    /// The machine does not exist or its state is unknown.
    #[default]
    None,
    /// The machine is running.
    Running,
    /// The machine exists but is powered off.
    Stopped,
    /// The machine is paused in memory.
    Paused,
    /// The machine state was saved to disk.
    Saved,
    /// The backend reported an error condition.
    Error,
    /// The backend did not answer in time.
    Timeout,
}

impl State {
    /// Returns `true` when the machine is running.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "None",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Paused => "Paused",
            Self::Saved => "Saved",
            Self::Error => "Error",
            Self::Timeout => "Timeout",
        };
        f.write_str(label)
    }
}
