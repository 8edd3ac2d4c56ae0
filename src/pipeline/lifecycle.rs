use std::fmt;

/// Lifecycle of a [`Pipeline`](super::Pipeline).
///
/// `Stopped → Starting → Running → Stopping → Stopped`. The transitional
/// states are only observable while a start or stop holds the lifecycle lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    /// Whether `start` has anything to do
    pub fn can_start(self) -> bool {
        self == LifecycleState::Stopped
    }

    /// Whether `stop` has anything to do
    pub fn can_stop(self) -> bool {
        self == LifecycleState::Running
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        write!(f, "{}", name)
    }
}
