use crate::{
    solve_orientations, solve_positions, solve_static, update_free_zones, SessionId,
    SolverSettings, StateUpdate, TrajectoryStore,
};
use log::*;
use std::time::Instant;
use traj_core::nalgebra::{Rotation3, Vector3};
use traj_core::{
    FrameData, Keyframe, Keyframes, OrientationKeyframe, PositionKeyframe, Result, Segment,
    Segments, TrajectoryError,
};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// How the camera moves through the clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Movement {
    /// The camera follows its keyframes and the scene between them.
    Tracked,
    /// The camera stands still at its first position keyframe.
    Static,
}

/// Everything the editor sends to recompute the trajectory of a session.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct SolveRequest {
    pub position_keyframes: Keyframes<PositionKeyframe>,
    pub orientation_keyframes: Keyframes<OrientationKeyframe>,
    pub position_segments: Segments,
    pub orientation_segments: Segments,
    pub movement: Movement,
}

/// A segment that could not be recomputed and kept its previous trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFailure {
    pub segment: Segment,
    pub error: TrajectoryError,
}

/// The trajectory of a session after a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// The positions of every frame, divided by the down scale factor of the clip.
    pub positions: Vec<Vector3<f64>>,
    pub orientations: Vec<Rotation3<f64>>,
    /// Frames whose position no dirty segment covers.
    pub unchanged_positions: Vec<usize>,
    /// Frames whose orientation no dirty segment covers.
    pub unchanged_orientations: Vec<usize>,
    pub position_failures: Vec<SegmentFailure>,
    pub orientation_failures: Vec<SegmentFailure>,
}

/// Solves the trajectories of editing sessions and remembers them between edits.
#[derive(Debug, Default)]
pub struct TrajectorySolver {
    settings: SolverSettings,
    store: TrajectoryStore,
}

impl TrajectorySolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            store: TrajectoryStore::new(),
        }
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn store(&self) -> &TrajectoryStore {
        &self.store
    }

    /// Drops the trajectory of `session`, the next solve starts from the origin.
    pub fn reset(&self, session: &SessionId) {
        if self.store.clear(session) {
            info!(
                "reset trajectory of clip {} canvas {}",
                session.clip, session.canvas
            );
        }
    }

    /// Recomputes the dirty segments of `request` and merges them into the session.
    ///
    /// Positions are solved first and their velocities and matching weights steer the
    /// orientations. The session stays locked for the whole solve. Errors returned here leave
    /// the session untouched, while segments that fail on their own are listed in the report.
    pub fn solve_session<F: FrameData>(
        &self,
        session: &SessionId,
        frames: &F,
        request: &SolveRequest,
    ) -> Result<SessionReport> {
        let start = Instant::now();
        let frame_count = frames.frame_count();
        validate(request, frame_count)?;
        let shared = self.store.session(session, frame_count)?;
        let mut state = shared.lock();
        let down_scale_factor = frames.down_scale_factor();

        let mut position_failures = Vec::new();
        let mut orientation_failures = Vec::new();
        let (unchanged_positions, unchanged_orientations) = match request.movement {
            Movement::Static => {
                let shot = solve_static(
                    frames,
                    &request.position_keyframes,
                    &request.orientation_keyframes,
                )?;
                state.apply(
                    &StateUpdate {
                        positions: Some(
                            shot.positions
                                .iter()
                                .map(|p| p * down_scale_factor)
                                .collect(),
                        ),
                        velocities: Some(vec![Vector3::zeros(); frame_count]),
                        orientations: Some(shot.orientations),
                        matching_weights: Some(vec![0.0; frame_count]),
                    },
                    None,
                )?;
                (Vec::new(), Vec::new())
            }
            Movement::Tracked => {
                let solution = solve_positions(
                    frames,
                    &request.position_keyframes,
                    &request.position_segments,
                    &state,
                    &self.settings,
                )?;
                let updates = solve_orientations(
                    &request.orientation_keyframes,
                    &solution.velocities,
                    &solution.matching_weights,
                    &request.orientation_segments,
                    &self.settings,
                )?;
                state.apply(
                    &StateUpdate {
                        positions: Some(
                            solution
                                .positions
                                .iter()
                                .map(|p| p * down_scale_factor)
                                .collect(),
                        ),
                        velocities: Some(solution.velocities),
                        matching_weights: Some(solution.matching_weights),
                        orientations: None,
                    },
                    None,
                )?;
                position_failures = solution.failures;
                for update in updates {
                    match update.result {
                        Ok(solved) => {
                            let indices = update.segment.frames().collect::<Vec<_>>();
                            state.apply(
                                &StateUpdate::orientations(solved.orientations),
                                Some(&indices),
                            )?;
                        }
                        Err(error) => orientation_failures.push(SegmentFailure {
                            segment: update.segment,
                            error,
                        }),
                    }
                }
                (
                    update_free_zones(&request.position_segments, frame_count),
                    update_free_zones(&request.orientation_segments, frame_count),
                )
            }
        };

        info!(
            "solved session {}/{} with {} frames in {} seconds ({} failed segments)",
            session.clip,
            session.canvas,
            frame_count,
            start.elapsed().as_secs_f64(),
            position_failures.len() + orientation_failures.len()
        );
        Ok(SessionReport {
            positions: state
                .positions
                .iter()
                .map(|p| p / down_scale_factor)
                .collect(),
            orientations: state.orientations.clone(),
            unchanged_positions,
            unchanged_orientations,
            position_failures,
            orientation_failures,
        })
    }
}

/// Checks that everything in `request` fits a clip of `frame_count` frames.
fn validate(request: &SolveRequest, frame_count: usize) -> Result<()> {
    if frame_count == 0 {
        return Err(TrajectoryError::malformed("the clip has no frames"));
    }
    // Deserialized keyframes never went through `Keyframes::new`.
    for keyframe in request.position_keyframes.iter() {
        keyframe.validate()?;
    }
    for keyframe in request.orientation_keyframes.iter() {
        keyframe.validate()?;
    }
    request.position_keyframes.check_bounds(frame_count)?;
    request.orientation_keyframes.check_bounds(frame_count)?;
    for segment in request
        .position_segments
        .iter()
        .chain(request.orientation_segments.iter())
    {
        if segment.end >= frame_count {
            return Err(TrajectoryError::FrameIndex {
                frame: segment.end,
                frame_count,
            });
        }
    }
    Ok(())
}
