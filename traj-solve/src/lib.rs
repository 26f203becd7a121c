//! # Trajectory Solve
//!
//! This crate puts the rest of the workspace together to recompute the camera trajectory of an
//! editing session whenever its keyframes or segments change.
//!
//! A solve runs in the following order:
//!
//! 1. The dirty segments are planned: tracked segments sharing a boundary frame are joined and
//!    the frames outside of every dirty segment are reported as unchanged.
//! 2. Tracked ranges are followed through the scene with the motion graph, linear segments are
//!    interpolated between their endpoint keyframes, and everything else keeps its last position.
//! 3. A single Poisson solve over the whole clip stabilizes the positions.
//! 4. The velocities give a direction field, and their speeds a matching confidence, which the
//!    orientation optimizer follows for every dirty tracked orientation segment.
//! 5. The results are merged into the [`TrajectoryStore`], segment by segment.
//!
//! [`solve_positions`] and [`solve_orientations`] are pure functions of their inputs and can be
//! used on their own. [`TrajectorySolver`] runs the whole pipeline against the stored state of a
//! session.

mod orientations;
mod planner;
mod positions;
mod settings;
mod solver;
mod static_shot;
mod store;

pub use orientations::*;
pub use planner::*;
pub use positions::*;
pub use settings::*;
pub use solver::*;
pub use static_shot::*;
pub use store::*;
