//! Optimizers that turn raw tracks and keyframes into a camera trajectory.
//!
//! [`PoissonTrajectory`] integrates target velocities into positions under hard keyframe
//! constraints by solving one sparse saddle point system with [`TripletMatrix`].
//! [`OrientationOptimizer`] solves smooth orientations on the rotation group with
//! Levenberg-Marquardt.

mod orientation;
mod sparse;
mod trajectory;

pub use orientation::*;
pub use sparse::*;
pub use trajectory::*;
