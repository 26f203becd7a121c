use core::time::Duration;
use thiserror::Error;

/// Every failure that a trajectory solve can surface.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrajectoryError {
    /// Keyframes, segments or state updates with an invalid shape.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("frame {frame} is out of range for a clip of {frame_count} frames")]
    FrameIndex { frame: usize, frame_count: usize },
    /// The motion graph could not connect the source to the sink.
    #[error("no path found in the motion graph between frames {first} and {last}")]
    NoPathFound { first: usize, last: usize },
    /// The linear system has a vanishing pivot, usually from conflicting hard constraints.
    #[error("linear system of size {size} is singular (vanishing pivot at column {pivot})")]
    SingularSystem { size: usize, pivot: usize },
    /// The orientation optimizer ran out of time before the gradient norm fell below tolerance.
    #[error("orientation optimization did not converge in {elapsed:?} (gradient norm {gradient_norm:e})")]
    OptimizationTimeout {
        elapsed: Duration,
        gradient_norm: f64,
    },
}

impl TrajectoryError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }
}

pub type Result<T, E = TrajectoryError> = core::result::Result<T, E>;
