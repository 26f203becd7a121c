use crate::{planner, SegmentFailure, SolverSettings, TrajectoryState};
use float_ord::FloatOrd;
use itertools::Itertools;
use log::*;
use std::time::Instant;
use traj_core::nalgebra::Vector3;
use traj_core::{
    FrameData, InterpolationMode, KeyframePosition, Keyframes, PositionKeyframe, Result, Segment,
    Segments, TrajectoryError,
};
use traj_optimize::{keyframe_constraints, PoissonTrajectory};

/// The outcome of a position solve over a whole clip.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSolution {
    /// The solved positions, divided by the down scale factor of the clip.
    pub positions: Vec<Vector3<f64>>,
    /// The velocities the positions were solved from, in the scaled scene space.
    pub velocities: Vec<Vector3<f64>>,
    /// The confidence in the direction of each velocity, in `[0, 1]`.
    pub matching_weights: Vec<f64>,
    /// Segments that could not be recomputed and kept their previous positions.
    pub failures: Vec<SegmentFailure>,
}

/// Where a keyframe places the camera in the scaled scene space.
///
/// Screen keyframes sample the position map of their frame.
pub fn default_position<F: FrameData>(
    frames: &F,
    keyframe: &PositionKeyframe,
) -> Result<Vector3<f64>> {
    match keyframe.position {
        KeyframePosition::World(position) => Ok(position),
        KeyframePosition::Screen(screen) => frames.position_at(keyframe.t, screen),
    }
}

/// Recomputes the positions of the dirty segments of a clip.
///
/// Tracked segments follow the scene through the motion graph and linear segments interpolate
/// their endpoint keyframes. A single Poisson solve over the whole clip then fits every frame to
/// its velocity, holding the interpolated frames in place. Clean frames start from their
/// `previous` trajectory but stay free, so they follow their stored velocities and the keyframes
/// and blend into the recomputed segments. A segment that cannot be recomputed is reported in
/// [`PositionSolution::failures`] and is held at its previous positions, while the other
/// segments are solved normally.
pub fn solve_positions<F: FrameData>(
    frames: &F,
    keyframes: &Keyframes<PositionKeyframe>,
    segments: &Segments,
    previous: &TrajectoryState,
    settings: &SolverSettings,
) -> Result<PositionSolution> {
    let start = Instant::now();
    let frame_count = frames.frame_count();
    if previous.len() != frame_count {
        return Err(TrajectoryError::malformed(format!(
            "previous trajectory has {} frames but the clip has {}",
            previous.len(),
            frame_count
        )));
    }
    keyframes.check_bounds(frame_count)?;
    if let Some(segment) = segments.iter().find(|segment| segment.end >= frame_count) {
        return Err(TrajectoryError::FrameIndex {
            frame: segment.end,
            frame_count,
        });
    }

    let mut positions = previous.positions.clone();
    let mut velocities = previous.velocities.clone();
    let mut presolved = vec![false; frame_count];
    let mut failures = Vec::new();

    let search = settings.motion_graph();
    let mut tracked = vec![false; frame_count];
    for range in planner::tracking_ranges(segments) {
        let (first, last) = (*range.start(), *range.end());
        let segment = Segment::tracked(first, last);
        let result = if keyframes.in_range(first, last).is_empty() {
            Err(TrajectoryError::malformed(format!(
                "tracked frames {}..={} have no position keyframe",
                first, last
            )))
        } else {
            search.search(frames, keyframes, first, last)
        };
        match result {
            Ok(path) => {
                for (i, t) in range.enumerate() {
                    positions[t] = path.positions[i];
                    velocities[t] = path.velocities[i];
                    tracked[t] = true;
                }
            }
            Err(error) => {
                warn!("tracking frames {}..={} failed: {}", first, last, error);
                for t in range {
                    presolved[t] = true;
                }
                failures.push(SegmentFailure { segment, error });
            }
        }
    }

    for segment in segments
        .dirty()
        .filter(|segment| segment.mode == InterpolationMode::Linear)
    {
        if let Err(error) = interpolate_segment(
            frames,
            keyframes,
            segment,
            &tracked,
            &mut positions,
            &mut velocities,
            &mut presolved,
        ) {
            warn!(
                "interpolating frames {}..={} failed: {}",
                segment.start, segment.end, error
            );
            for t in segment.frames() {
                presolved[t] = true;
            }
            failures.push(SegmentFailure {
                segment: *segment,
                error,
            });
        }
    }

    let free_keyframes = keyframes
        .iter()
        .filter(|keyframe| !presolved[keyframe.t])
        .copied()
        .collect_vec();
    let constraints = keyframe_constraints(frames, &free_keyframes, 0)?;
    let down_scale_factor = frames.down_scale_factor();
    let solved = PoissonTrajectory::new(&velocities, &positions, &presolved)?
        .proximity_weight(settings.keyframe_proximity_weight)
        .down_scale_factor(down_scale_factor)
        .solve(&constraints)?;

    let weights = matching_weights(
        &velocities,
        settings.velocity_quantile,
        settings.minimum_velocity_scale,
    );
    info!(
        "solved {} positions with {} tracked and {} failed segments in {} seconds",
        frame_count,
        tracked.iter().filter(|&&t| t).count(),
        failures.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(PositionSolution {
        positions: solved,
        velocities,
        matching_weights: weights,
        failures,
    })
}

/// Fills a linear segment from its endpoint keyframes and marks its frames presolved.
///
/// Nothing is written unless the segment has an endpoint keyframe.
fn interpolate_segment<F: FrameData>(
    frames: &F,
    keyframes: &Keyframes<PositionKeyframe>,
    segment: &Segment,
    tracked: &[bool],
    positions: &mut [Vector3<f64>],
    velocities: &mut [Vector3<f64>],
    presolved: &mut [bool],
) -> Result<()> {
    let from = keyframes
        .at(segment.start)
        .map(|keyframe| default_position(frames, keyframe))
        .transpose()?;
    let to = keyframes
        .at(segment.end)
        .map(|keyframe| default_position(frames, keyframe))
        .transpose()?;
    let (from, to) = match (from, to) {
        (Some(from), Some(to)) => (from, to),
        (Some(only), None) | (None, Some(only)) => (only, only),
        (None, None) => {
            return Err(TrajectoryError::malformed(format!(
                "linear frames {}..={} have no keyframe at either end",
                segment.start, segment.end
            )))
        }
    };

    let span = (segment.end - segment.start).max(1) as f64;
    for t in segment.frames() {
        let u = (t - segment.start) as f64 / span;
        positions[t] = from.lerp(&to, u);
        presolved[t] = true;
    }
    for t in segment.start..segment.end {
        velocities[t] = positions[t + 1] - positions[t];
    }
    // The last frame belongs to the next tracked range if there is one.
    if !tracked[segment.end] {
        velocities[segment.end] = if segment.end > segment.start {
            velocities[segment.end - 1]
        } else {
            Vector3::zeros()
        };
    }
    Ok(())
}

/// The confidence in the direction of each velocity.
///
/// Speeds are normalized by their `quantile` over the clip and clamped to `[0, 1]`. A clip that
/// barely moves gets no confidence at all.
pub fn matching_weights(
    velocities: &[Vector3<f64>],
    quantile: f64,
    minimum_scale: f64,
) -> Vec<f64> {
    let speeds = velocities.iter().map(|v| v.norm()).collect_vec();
    let scale = speed_quantile(&speeds, quantile);
    if scale.is_nan() || scale < minimum_scale {
        debug!("velocity scale {} is too small to match orientations", scale);
        return vec![0.0; speeds.len()];
    }
    speeds
        .iter()
        .map(|&speed| (speed / scale).clamp(0.0, 1.0))
        .collect()
}

/// The `quantile` of `values`, interpolating linearly between order statistics.
fn speed_quantile(values: &[f64], quantile: f64) -> f64 {
    let sorted = values
        .iter()
        .copied()
        .sorted_by_key(|&v| FloatOrd(v))
        .collect_vec();
    if sorted.is_empty() {
        return 0.0;
    }
    let position = quantile.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let below = position.floor() as usize;
    let above = (below + 1).min(sorted.len() - 1);
    let fraction = position - below as f64;
    sorted[below] + (sorted[above] - sorted[below]) * fraction
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quantiles_interpolate_order_statistics() {
        let values = [4.0, 0.0, 3.0, 1.0, 2.0];
        assert_relative_eq!(speed_quantile(&values, 0.0), 0.0);
        assert_relative_eq!(speed_quantile(&values, 0.5), 2.0);
        assert_relative_eq!(speed_quantile(&values, 0.9), 3.6);
        assert_relative_eq!(speed_quantile(&values, 1.0), 4.0);
        assert_eq!(speed_quantile(&[], 0.9), 0.0);
    }

    #[test]
    fn weights_saturate_above_the_quantile() {
        let velocities = (0..11)
            .map(|i| Vector3::new(0.0, i as f64, 0.0))
            .collect_vec();
        let weights = matching_weights(&velocities, 0.9, 1e-4);
        assert_relative_eq!(weights[0], 0.0);
        assert_relative_eq!(weights[3], 1.0 / 3.0);
        assert_relative_eq!(weights[9], 1.0);
        assert_relative_eq!(weights[10], 1.0);
    }

    #[test]
    fn static_clips_get_no_weight() {
        let velocities = vec![Vector3::new(1e-6, 0.0, 0.0); 5];
        assert_eq!(matching_weights(&velocities, 0.9, 1e-4), vec![0.0; 5]);
    }
}
