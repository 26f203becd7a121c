use crate::SolverSettings;
use itertools::Itertools;
use log::*;
use traj_core::nalgebra::{Rotation3, Vector3};
use traj_core::{
    interpolate_rotations, InterpolationMode, Keyframes, OrientationKeyframe, Result, Segment,
    Segments, TrajectoryError,
};

/// The orientations solved for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOrientations {
    /// One orientation per frame of the segment.
    pub orientations: Vec<Rotation3<f64>>,
    /// The optimizer segment of each frame, `None` for keyframed or interpolated frames.
    pub segment_ids: Vec<Option<usize>>,
    pub base_rotations: Vec<Rotation3<f64>>,
}

/// The outcome of recomputing the orientations of one dirty segment.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientationUpdate {
    pub segment: Segment,
    pub result: Result<SegmentOrientations>,
}

/// Recomputes the orientations of every dirty segment.
///
/// Tracked segments look along `velocities`, trusting each frame according to its
/// `matching_weights`. Linear segments and segments of at most two frames slerp between their
/// endpoint keyframes. Segments are solved independently and one failing leaves the others alone.
pub fn solve_orientations(
    keyframes: &Keyframes<OrientationKeyframe>,
    velocities: &[Vector3<f64>],
    matching_weights: &[f64],
    segments: &Segments,
    settings: &SolverSettings,
) -> Result<Vec<OrientationUpdate>> {
    let frame_count = velocities.len();
    if matching_weights.len() != frame_count {
        return Err(TrajectoryError::malformed(format!(
            "{} velocities with {} matching weights",
            frame_count,
            matching_weights.len()
        )));
    }
    keyframes.check_bounds(frame_count)?;
    if let Some(segment) = segments.iter().find(|segment| segment.end >= frame_count) {
        return Err(TrajectoryError::FrameIndex {
            frame: segment.end,
            frame_count,
        });
    }

    let optimizer = settings.orientation_optimizer();
    Ok(segments
        .dirty()
        .map(|&segment| {
            let result = if segment.mode == InterpolationMode::Linear || segment.len() <= 2 {
                Ok(interpolate_segment(keyframes, &segment))
            } else {
                let frames = segment.frames();
                let local = keyframes
                    .in_range(segment.start, segment.end)
                    .iter()
                    .map(|k| OrientationKeyframe::new(k.t - segment.start, k.rotation))
                    .collect_vec();
                optimizer
                    .optimize(&velocities[frames.clone()], &matching_weights[frames], &local)
                    .map(|solution| {
                        debug!(
                            "orientations of frames {}..={} went from cost {} to {} (converged: {})",
                            segment.start,
                            segment.end,
                            solution.initial_cost,
                            solution.cost,
                            solution.converged
                        );
                        SegmentOrientations {
                            orientations: solution.orientations,
                            segment_ids: solution.segment_ids,
                            base_rotations: solution.base_rotations,
                        }
                    })
            };
            if let Err(error) = &result {
                warn!(
                    "orientations of frames {}..={} failed: {}",
                    segment.start, segment.end, error
                );
            }
            OrientationUpdate { segment, result }
        })
        .collect())
}

fn interpolate_segment(
    keyframes: &Keyframes<OrientationKeyframe>,
    segment: &Segment,
) -> SegmentOrientations {
    let keys = [segment.start, segment.end]
        .iter()
        .dedup()
        .filter_map(|&t| keyframes.at(t))
        .map(|k| (k.t, k.rotation))
        .collect_vec();
    if keys.is_empty() {
        warn!(
            "frames {}..={} have no orientation keyframe at either end, using the identity",
            segment.start, segment.end
        );
    }
    SegmentOrientations {
        orientations: interpolate_rotations(&keys, segment.frames()),
        segment_ids: vec![None; segment.len()],
        base_rotations: Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn keyframes() -> Keyframes<OrientationKeyframe> {
        Keyframes::new(vec![
            OrientationKeyframe::new(0, Rotation3::identity()),
            OrientationKeyframe::new(
                4,
                Rotation3::from_axis_angle(&Vector3::y_axis(), 0.8),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn linear_segments_slerp_their_endpoints() {
        let segments = Segments::new(vec![Segment::linear(0, 4)], 6).unwrap();
        let updates = solve_orientations(
            &keyframes(),
            &[Vector3::x(); 6],
            &[1.0; 6],
            &segments,
            &SolverSettings::default(),
        )
        .unwrap();
        assert_eq!(updates.len(), 1);
        let solved = updates[0].result.as_ref().unwrap();
        assert_eq!(solved.orientations.len(), 5);
        assert_relative_eq!(solved.orientations[2].angle(), 0.4, epsilon = 1e-12);
        assert_eq!(solved.orientations[4], keyframes()[1].rotation);
        assert_eq!(solved.segment_ids, vec![None; 5]);
    }

    #[test]
    fn clean_segments_are_skipped() {
        let segments = Segments::new(
            vec![Segment::linear(0, 4).dirty(false), Segment::linear(4, 5)],
            6,
        )
        .unwrap();
        let updates = solve_orientations(
            &keyframes(),
            &[Vector3::x(); 6],
            &[1.0; 6],
            &segments,
            &SolverSettings::default(),
        )
        .unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].segment, Segment::linear(4, 5));
        let solved = updates[0].result.as_ref().unwrap();
        assert_eq!(solved.orientations, vec![keyframes()[1].rotation; 2]);
    }

    #[test]
    fn segments_without_keyframes_face_forward() {
        let segments = Segments::new(vec![Segment::linear(1, 3)], 6).unwrap();
        let updates = solve_orientations(
            &Keyframes::default(),
            &[Vector3::x(); 6],
            &[1.0; 6],
            &segments,
            &SolverSettings::default(),
        )
        .unwrap();
        let solved = updates[0].result.as_ref().unwrap();
        assert_eq!(solved.orientations, vec![Rotation3::identity(); 3]);
    }

    #[test]
    fn mismatched_inputs_are_rejected() {
        let segments = Segments::new(vec![Segment::tracked(0, 5)], 6).unwrap();
        assert!(solve_orientations(
            &keyframes(),
            &[Vector3::x(); 6],
            &[1.0; 5],
            &segments,
            &SolverSettings::default(),
        )
        .is_err());
        assert_eq!(
            solve_orientations(
                &keyframes(),
                &[Vector3::x(); 3],
                &[1.0; 3],
                &segments,
                &SolverSettings::default(),
            ),
            Err(TrajectoryError::FrameIndex {
                frame: 4,
                frame_count: 3
            })
        );
    }
}
