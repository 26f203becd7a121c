//! # Trajectory Core
//!
//! This library provides the shared abstractions and types used by every crate that takes part in
//! recovering a camera trajectory from sparse keyframes. The other crates of the workspace only talk
//! to each other through the types defined here: keyframes, segments, per-frame map access and the
//! small amount of rotation group machinery that both the solvers and the interpolation code need.
//!
//! ## Frames, maps and screen space
//!
//! A clip is a sequence of frames indexed from `0`. For every frame, an external preprocessing step
//! has produced several dense maps:
//!
//! * a 3d position per pixel, in the scene space of the clip
//! * a 3d motion (flow) vector per pixel, pointing to where that surface point is in the next frame
//! * a feature descriptor per pixel, at a (usually coarser) feature resolution
//! * a validity mask at the feature resolution, marking the pixels whose flow can be trusted
//!
//! These maps are accessed through the [`FrameData`] trait. Keyframes refer to pixels in normalized
//! screen space, where `(0, 0)` is the top left corner of the image and `(1, 1)` the bottom right.
//! A [`MapResolution`] converts such a screen position into a [`Pixel`] of a given map, and rescales
//! pixels between maps of different resolutions. Flattened maps are stored x-major, so the flat index
//! of `(x, y)` is `x * height + y`.
//!
//! ## Keyframes and segments
//!
//! The user constrains the trajectory with [`PositionKeyframe`] and [`OrientationKeyframe`] values,
//! collected into a sorted [`Keyframes`] list. The frame range is split into [`Segments`], each
//! of which is either linearly interpolated or tracked through the video, and is flagged dirty when
//! it must be recomputed.
//!
//! ```text
//!  frame:  0    1    2    3    4    5    6    7    8    9
//!          K---------------------K------------------------K
//!          [   linear, dirty     ]
//!                                [   tracked, dirty       ]
//! ```
//!
//! ## Rotations
//!
//! Orientations are stored as [`Rotation3`](nalgebra::Rotation3) matrices. Optimizers work on the
//! tangent space of the rotation group through [`Skew3`], which provides the exponential and log
//! maps along with the jacobians needed to differentiate rotated vectors.

mod error;
mod frame;
mod keyframe;
mod memory;
mod segment;
mod so3;

pub use error::*;
pub use frame::*;
pub use keyframe::*;
pub use memory::*;
pub use nalgebra;
pub use segment::*;
pub use so3::*;
