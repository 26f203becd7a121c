use crate::TripletMatrix;
use itertools::Itertools;
use log::*;
use std::time::Instant;
use traj_core::nalgebra::{DVector, Vector3};
use traj_core::{
    CameraModel, FrameData, KeyframePosition, PositionKeyframe, Ray, Result, TrajectoryError,
};

/// What a position keyframe imposes on the trajectory at its frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionConstraint {
    /// The position must be this point.
    Point(Vector3<f64>),
    /// The position must lie on this ray, at a depth left to the solver.
    Ray(Ray),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyframeConstraint {
    pub t: usize,
    pub constraint: PositionConstraint,
}

/// Turns position keyframes into constraints, casting the camera ray of screen keyframes.
///
/// `first` is subtracted from the frame of every keyframe.
pub fn keyframe_constraints<F: FrameData>(
    frames: &F,
    keyframes: &[PositionKeyframe],
    first: usize,
) -> Result<Vec<KeyframeConstraint>> {
    keyframes
        .iter()
        .map(|keyframe| {
            let constraint = match keyframe.position {
                KeyframePosition::World(point) => PositionConstraint::Point(point),
                KeyframePosition::Screen(screen) => {
                    PositionConstraint::Ray(frames.camera(keyframe.t)?.ray(screen))
                }
            };
            let t = keyframe.t.checked_sub(first).ok_or_else(|| {
                TrajectoryError::malformed(format!(
                    "keyframe {} precedes the first frame {}",
                    keyframe.t, first
                ))
            })?;
            Ok(KeyframeConstraint { t, constraint })
        })
        .collect()
}

/// Reconstructs positions from target velocities and hard constraints.
///
/// Positions `p_0..p_{N-1}` minimize `Σ |p_{i+1} - p_i - v_i|²` subject to keyframes and to the
/// presolved frames keeping their initial position. The constraints are enforced with Lagrange
/// multipliers and the whole saddle point system is solved at once. A screen keyframe at frame
/// `t` adds one unknown `s` and the constraint `p_t = o + s d` for its ray. The ray parameter is
/// also pulled towards the velocities of the neighbors of `t` and, with a small proximity weight,
/// towards the initial position of `t` to settle the depth.
#[derive(Debug, Clone, Copy)]
pub struct PoissonTrajectory<'a> {
    velocities: &'a [Vector3<f64>],
    initial_positions: &'a [Vector3<f64>],
    presolved: &'a [bool],
    proximity_weight: f64,
    down_scale_factor: f64,
}

/// Indices of the unknowns, interleaved frame by frame to keep the system banded.
struct Layout {
    positions: Vec<usize>,
    rays: Vec<Option<usize>>,
    multipliers: Vec<Option<usize>>,
    size: usize,
}

impl<'a> PoissonTrajectory<'a> {
    pub fn new(
        velocities: &'a [Vector3<f64>],
        initial_positions: &'a [Vector3<f64>],
        presolved: &'a [bool],
    ) -> Result<Self> {
        if velocities.is_empty()
            || velocities.len() != initial_positions.len()
            || velocities.len() != presolved.len()
        {
            return Err(TrajectoryError::malformed(format!(
                "mismatched trajectory inputs: {} velocities, {} positions, {} presolved flags",
                velocities.len(),
                initial_positions.len(),
                presolved.len()
            )));
        }
        Ok(Self {
            velocities,
            initial_positions,
            presolved,
            proximity_weight: 0.01,
            down_scale_factor: 1.0,
        })
    }

    #[must_use]
    pub fn proximity_weight(self, proximity_weight: f64) -> Self {
        Self {
            proximity_weight,
            ..self
        }
    }

    /// The solved positions are divided by this factor.
    #[must_use]
    pub fn down_scale_factor(self, down_scale_factor: f64) -> Self {
        Self {
            down_scale_factor,
            ..self
        }
    }

    pub fn len(&self) -> usize {
        self.velocities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.velocities.is_empty()
    }

    /// Solves for the positions of every frame.
    ///
    /// Keyframes on presolved frames are ignored. Fails with
    /// [`TrajectoryError::SingularSystem`] if the constraints leave the trajectory undetermined
    /// or contradict each other.
    pub fn solve(&self, keyframes: &[KeyframeConstraint]) -> Result<Vec<Vector3<f64>>> {
        let start = Instant::now();
        let constraints = self.constraints(keyframes)?;
        let layout = layout(&constraints);
        let (matrix, rhs) = self.assemble(&constraints, &layout);
        let (lower, upper) = matrix.bandwidths();
        debug!(
            "solving trajectory system of size {} with bandwidths {} and {}",
            layout.size, lower, upper
        );
        let solution = matrix.solve(&rhs)?;
        let positions = layout
            .positions
            .iter()
            .map(|&p| {
                Vector3::new(solution[p], solution[p + 1], solution[p + 2]) / self.down_scale_factor
            })
            .collect();
        info!(
            "solved trajectory of {} frames in {} seconds",
            self.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(positions)
    }

    /// The constraint of every frame, presolved frames taking precedence over keyframes.
    fn constraints(&self, keyframes: &[KeyframeConstraint]) -> Result<Vec<Option<Constraint>>> {
        let mut constraints: Vec<Option<Constraint>> = self
            .presolved
            .iter()
            .zip(self.initial_positions)
            .map(|(&presolved, &initial)| presolved.then(|| Constraint::Presolved(initial)))
            .collect();
        let n = self.len();
        for keyframe in keyframes.iter().sorted_by_key(|k| k.t) {
            let slot = constraints
                .get_mut(keyframe.t)
                .ok_or(TrajectoryError::FrameIndex {
                    frame: keyframe.t,
                    frame_count: n,
                })?;
            match slot {
                Some(Constraint::Presolved(_)) => {
                    trace!("keyframe {} lies on a presolved frame", keyframe.t);
                }
                Some(Constraint::Keyframe(_)) => {
                    return Err(TrajectoryError::malformed(format!(
                        "two position keyframes share frame {}",
                        keyframe.t
                    )));
                }
                None => *slot = Some(Constraint::Keyframe(keyframe.constraint)),
            }
        }
        Ok(constraints)
    }

    fn assemble(
        &self,
        constraints: &[Option<Constraint>],
        layout: &Layout,
    ) -> (TripletMatrix, DVector<f64>) {
        let n = self.len();
        let v = self.velocities;
        let w = self.proximity_weight;
        let mut matrix = TripletMatrix::new(layout.size);
        let mut rhs = DVector::zeros(layout.size);

        // Velocity matching.
        if n > 1 {
            for i in 0..n {
                let p = layout.positions[i];
                for c in 0..3 {
                    let row = p + c;
                    if i == 0 {
                        matrix.push(row, row, 1.0);
                        matrix.push(row, layout.positions[1] + c, -1.0);
                        rhs[row] = -v[0][c];
                    } else if i == n - 1 {
                        matrix.push(row, layout.positions[i - 1] + c, -1.0);
                        matrix.push(row, row, 1.0);
                        rhs[row] = v[i - 1][c];
                    } else {
                        matrix.push(row, row, 2.0);
                        matrix.push(row, layout.positions[i - 1] + c, -1.0);
                        matrix.push(row, layout.positions[i + 1] + c, -1.0);
                        rhs[row] = -v[i][c] + v[i - 1][c];
                    }
                }
            }
        }

        for (t, constraint) in constraints.iter().enumerate() {
            let p = layout.positions[t];
            let multiplier = match layout.multipliers[t] {
                Some(multiplier) => multiplier,
                None => continue,
            };
            match constraint {
                Some(Constraint::Keyframe(PositionConstraint::Ray(ray))) => {
                    let s = match layout.rays[t] {
                        Some(s) => s,
                        None => continue,
                    };
                    let o = ray.origin;
                    let d = ray.direction.into_inner();
                    let dd = d.dot(&d);
                    let od = o.dot(&d);
                    if t + 1 < n {
                        matrix.push(s, s, dd);
                        for c in 0..3 {
                            matrix.push(s, layout.positions[t + 1] + c, -d[c]);
                        }
                        rhs[s] += -od - v[t].dot(&d);
                    }
                    if t > 0 {
                        matrix.push(s, s, dd);
                        for c in 0..3 {
                            matrix.push(s, layout.positions[t - 1] + c, -d[c]);
                        }
                        rhs[s] += -od + v[t - 1].dot(&d);
                    }

                    let initial = self.initial_positions[t];
                    matrix.push(s, s, w * dd);
                    rhs[s] += w * (initial.dot(&d) - od);
                    for c in 0..3 {
                        matrix.push(p + c, p + c, w);
                        rhs[p + c] += w * initial[c];
                    }

                    // p_t - s d = o
                    for c in 0..3 {
                        matrix.push(multiplier + c, p + c, -1.0);
                        matrix.push(multiplier + c, s, d[c]);
                        matrix.push(p + c, multiplier + c, -1.0);
                        matrix.push(s, multiplier + c, d[c]);
                        rhs[multiplier + c] = -o[c];
                    }
                }
                Some(Constraint::Keyframe(PositionConstraint::Point(point)))
                | Some(Constraint::Presolved(point)) => {
                    for c in 0..3 {
                        matrix.push(multiplier + c, p + c, 1.0);
                        matrix.push(p + c, multiplier + c, 1.0);
                        rhs[multiplier + c] = point[c];
                    }
                }
                None => {}
            }
        }
        (matrix, rhs)
    }
}

#[derive(Debug, Clone, Copy)]
enum Constraint {
    Keyframe(PositionConstraint),
    Presolved(Vector3<f64>),
}

/// Per frame, the position, then the ray parameter, then the multipliers.
fn layout(constraints: &[Option<Constraint>]) -> Layout {
    let mut layout = Layout {
        positions: Vec::with_capacity(constraints.len()),
        rays: Vec::with_capacity(constraints.len()),
        multipliers: Vec::with_capacity(constraints.len()),
        size: 0,
    };
    for constraint in constraints {
        layout.positions.push(layout.size);
        layout.size += 3;
        if let Some(Constraint::Keyframe(PositionConstraint::Ray(_))) = constraint {
            layout.rays.push(Some(layout.size));
            layout.size += 1;
        } else {
            layout.rays.push(None);
        }
        if constraint.is_some() {
            layout.multipliers.push(Some(layout.size));
            layout.size += 3;
        } else {
            layout.multipliers.push(None);
        }
    }
    layout
}
