use crate::positions::default_position;
use log::*;
use traj_core::nalgebra::{Rotation3, Vector3};
use traj_core::{
    interpolate_rotations, FrameData, Keyframes, OrientationKeyframe, PositionKeyframe, Result,
    TrajectoryError,
};

/// The trajectory of a camera standing still.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticShot {
    /// The position of the camera at every frame, divided by the down scale factor.
    pub positions: Vec<Vector3<f64>>,
    pub orientations: Vec<Rotation3<f64>>,
}

/// Places the camera at the first position keyframe for the whole clip and slerps the
/// orientation keyframes.
pub fn solve_static<F: FrameData>(
    frames: &F,
    positions: &Keyframes<PositionKeyframe>,
    orientations: &Keyframes<OrientationKeyframe>,
) -> Result<StaticShot> {
    let frame_count = frames.frame_count();
    positions.check_bounds(frame_count)?;
    orientations.check_bounds(frame_count)?;
    let first = positions.first().ok_or_else(|| {
        TrajectoryError::malformed("a static camera needs a position keyframe")
    })?;
    let position = default_position(frames, first)? / frames.down_scale_factor();
    debug!("static camera placed at {:?}", position);
    let keys = orientations
        .iter()
        .map(|k| (k.t, k.rotation))
        .collect::<Vec<_>>();
    let orientations = if frame_count == 0 {
        Vec::new()
    } else {
        interpolate_rotations(&keys, 0..=frame_count - 1)
    };
    Ok(StaticShot {
        positions: vec![position; frame_count],
        orientations,
    })
}
