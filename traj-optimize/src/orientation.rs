use float_ord::FloatOrd;
use itertools::Itertools;
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::*;
use std::ops::Range;
use std::time::{Duration, Instant};
use traj_core::nalgebra::{
    dimension::{Dynamic, U1},
    DMatrix, DVector, Matrix3, Rotation3, VecStorage, Vector3,
};
use traj_core::{interpolate_rotations, slerp, OrientationKeyframe, Result, Skew3, TrajectoryError};

/// Targets shorter than this are left unnormalized and cannot seed a base rotation.
const MIN_TARGET_NORM: f64 = 1e-8;

/// The rotation `B` such that the first column of `R B` is `target`, obtained by turning the
/// frame `R` around as little as possible.
///
/// The axis of `R` closest to `target` is swapped for `target`, and the next axis is
/// re-orthogonalized against it. A vanishing target gives the identity.
pub fn closest_aligned_frame(rotation: &Rotation3<f64>, target: &Vector3<f64>) -> Rotation3<f64> {
    let norm = target.norm();
    if norm < MIN_TARGET_NORM {
        return Rotation3::identity();
    }
    let u = target / norm;
    let local = rotation.inverse() * u;
    let closest = (0..3).max_by_key(|&c| FloatOrd(local[c].abs())).unwrap_or(0);
    let next = rotation.matrix().column((closest + 1) % 3).into_owned();
    let v = u.cross(&next.cross(&u)).normalize();
    let w = u.cross(&v);
    rotation.inverse() * Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[u, v, w]))
}

/// Smooth camera orientations that look along a direction field.
///
/// The orientations `X_i` of the sampled frames and one base rotation `B_s` per segment of
/// continuous motion minimize
///
/// `W_match Σ w_i |X_i B_s e_0 - v_i|² + W_smooth Σ |X_{k+1} - X_k|² / gap_k`
///
/// with the keyframed orientations held fixed. The samples are every `stride`-th frame plus the
/// keyframes, the discontinuities and both ends. Frames whose weight falls below the
/// discontinuity threshold split the free frames into segments. Split pieces shorter than
/// `min_segment_len` get no matching term, while an unsplit range always forms one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationOptimizer {
    pub match_weight: f64,
    pub smooth_weight: f64,
    pub stride: usize,
    pub discontinuity_threshold: f64,
    pub min_segment_len: usize,
    /// The wall clock time after which no more solver rounds are started.
    pub time_budget: Duration,
    /// The norm of the gradient of the cost under which the orientations are converged.
    pub gradient_tolerance: f64,
    /// Bounds the evaluations of each Levenberg-Marquardt round.
    pub patience: usize,
    pub max_rounds: usize,
}

impl Default for OrientationOptimizer {
    fn default() -> Self {
        Self {
            match_weight: 1.0,
            smooth_weight: 10.0,
            stride: 5,
            discontinuity_threshold: 0.2,
            min_segment_len: 3,
            time_budget: Duration::from_secs(40),
            gradient_tolerance: 1e-6,
            patience: 10,
            max_rounds: 20,
        }
    }
}

/// Orientations for every frame of the optimized range.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientationSolution {
    pub orientations: Vec<Rotation3<f64>>,
    /// The segment of every frame, `None` for keyframes and frames outside of any segment.
    pub segment_ids: Vec<Option<usize>>,
    pub base_rotations: Vec<Rotation3<f64>>,
    /// Whether the solver converged. Otherwise the orientations are the interpolated keyframes.
    pub converged: bool,
    pub initial_cost: f64,
    pub cost: f64,
}

impl OrientationOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn match_weight(self, match_weight: f64) -> Self {
        Self {
            match_weight,
            ..self
        }
    }

    #[must_use]
    pub fn smooth_weight(self, smooth_weight: f64) -> Self {
        Self {
            smooth_weight,
            ..self
        }
    }

    #[must_use]
    pub fn stride(self, stride: usize) -> Self {
        Self { stride, ..self }
    }

    #[must_use]
    pub fn discontinuity_threshold(self, discontinuity_threshold: f64) -> Self {
        Self {
            discontinuity_threshold,
            ..self
        }
    }

    #[must_use]
    pub fn time_budget(self, time_budget: Duration) -> Self {
        Self {
            time_budget,
            ..self
        }
    }

    #[must_use]
    pub fn gradient_tolerance(self, gradient_tolerance: f64) -> Self {
        Self {
            gradient_tolerance,
            ..self
        }
    }

    /// Solves the orientations of `targets.len()` frames.
    ///
    /// `targets` are the directions to look along, usually the velocities, and `weights` the
    /// confidence in each of them. The frames of `keyframes` count from the start of the range.
    pub fn optimize(
        &self,
        targets: &[Vector3<f64>],
        weights: &[f64],
        keyframes: &[OrientationKeyframe],
    ) -> Result<OrientationSolution> {
        let start = Instant::now();
        let plan = self.plan(targets, weights, keyframes)?;
        let mut problem = plan.problem(self);
        let initial_cost = problem.cost();
        let initial = problem.rotations.clone();
        let initial_bases = problem.bases.clone();

        let mut converged = problem.is_trivial();
        let mut rounds = 0;
        while !converged {
            let gradient_norm = problem.gradient_norm();
            if gradient_norm <= self.gradient_tolerance {
                converged = true;
                break;
            }
            let elapsed = start.elapsed();
            if elapsed > self.time_budget || rounds >= self.max_rounds {
                warn!(
                    "{}, falling back to interpolated orientations",
                    TrajectoryError::OptimizationTimeout {
                        elapsed,
                        gradient_norm
                    }
                );
                break;
            }
            let cost = problem.cost();
            let (solved, report) = LevenbergMarquardt::new()
                .with_patience(self.patience)
                .minimize(problem);
            info!(
                "Levenberg-Marquardt terminated with reason {:?} after {} evaluations",
                report.termination, report.number_of_evaluations
            );
            problem = solved;
            let improved = problem.cost();
            if !improved.is_finite() || improved > cost {
                warn!(
                    "orientation round ended at cost {} above {}, falling back to interpolated orientations",
                    improved, cost
                );
                break;
            }
            problem.retract();
            rounds += 1;
        }

        let (rotations, bases, cost) = if converged {
            let cost = problem.cost();
            (problem.rotations, problem.bases, cost)
        } else {
            (initial, initial_bases, initial_cost)
        };
        info!(
            "solved {} orientations from {} samples in {} rounds and {} seconds",
            plan.frame_count,
            plan.samples.len(),
            rounds,
            start.elapsed().as_secs_f64()
        );
        Ok(OrientationSolution {
            orientations: plan.upsample(&rotations),
            segment_ids: plan.upsample_segments(),
            base_rotations: bases,
            converged,
            initial_cost,
            cost,
        })
    }

    fn plan(
        &self,
        targets: &[Vector3<f64>],
        weights: &[f64],
        keyframes: &[OrientationKeyframe],
    ) -> Result<Plan> {
        let n = targets.len();
        if n == 0 || weights.len() != n {
            return Err(TrajectoryError::malformed(format!(
                "{} orientation targets with {} weights",
                n,
                weights.len()
            )));
        }
        let mut keys = keyframes.iter().map(|k| (k.t, k.rotation)).collect_vec();
        keys.sort_by_key(|&(t, _)| t);
        if let Some(&(t, _)) = keys.iter().find(|&&(t, _)| t >= n) {
            return Err(TrajectoryError::FrameIndex {
                frame: t,
                frame_count: n,
            });
        }
        if let Some((a, _)) = keys.iter().tuple_windows().find(|(a, b)| a.0 == b.0) {
            return Err(TrajectoryError::malformed(format!(
                "two orientation keyframes share frame {}",
                a.0
            )));
        }

        let stride = if n <= self.stride + 1 {
            1
        } else {
            self.stride.max(1)
        };
        let targets = targets
            .iter()
            .map(|v| {
                let norm = v.norm();
                if norm < MIN_TARGET_NORM {
                    *v
                } else {
                    v / norm
                }
            })
            .collect_vec();
        let mut keyed = vec![false; n];
        for &(t, _) in &keys {
            keyed[t] = true;
        }
        let discontinuous = weights
            .iter()
            .map(|&w| w < self.discontinuity_threshold)
            .collect_vec();
        let samples = (0..n)
            .filter(|&i| i % stride == 0 || keyed[i] || discontinuous[i] || i == n - 1)
            .collect_vec();
        let initial = interpolate_rotations(&keys, 0..=n - 1);

        // Discontinuities split the free samples. Those on keyframes are never free.
        let free = (0..samples.len())
            .filter(|&k| !keyed[samples[k]])
            .collect_vec();
        let mut boundaries = vec![0];
        boundaries.extend(
            free.iter()
                .enumerate()
                .filter(|&(j, &k)| j > 0 && discontinuous[samples[k]])
                .map(|(j, _)| j),
        );
        boundaries.push(free.len());
        // Only pieces split off at a discontinuity can be too short to keep.
        let ranges: Vec<Range<usize>> = if free.is_empty() {
            Vec::new()
        } else if boundaries.len() == 2 {
            vec![0..free.len()]
        } else {
            boundaries
                .iter()
                .tuple_windows()
                .map(|(&a, &b)| a..b)
                .filter(|range| range.len() >= self.min_segment_len.max(1))
                .collect()
        };
        debug!(
            "{} of {} samples are free, split in {} segments",
            free.len(),
            samples.len(),
            ranges.len()
        );

        let mut segments = vec![None; samples.len()];
        let mut bases = Vec::with_capacity(ranges.len());
        for (segment, range) in ranges.iter().enumerate() {
            for &k in &free[range.clone()] {
                segments[k] = Some(segment);
            }
            let frame = samples[free[range.start]];
            bases.push(closest_aligned_frame(&initial[frame], &targets[frame]));
        }

        Ok(Plan {
            frame_count: n,
            keyed: samples.iter().map(|&i| keyed[i]).collect(),
            initial: samples.iter().map(|&i| initial[i]).collect(),
            targets: samples.iter().map(|&i| targets[i]).collect(),
            weights: samples.iter().map(|&i| weights[i]).collect(),
            samples,
            segments,
            bases,
        })
    }
}

/// The sampled frames and everything known about them before solving.
struct Plan {
    frame_count: usize,
    samples: Vec<usize>,
    keyed: Vec<bool>,
    segments: Vec<Option<usize>>,
    initial: Vec<Rotation3<f64>>,
    targets: Vec<Vector3<f64>>,
    weights: Vec<f64>,
    bases: Vec<Rotation3<f64>>,
}

impl Plan {
    fn problem(&self, settings: &OrientationOptimizer) -> OrientationProblem {
        let mut variables = Vec::with_capacity(self.samples.len());
        let mut free_count = 0;
        for &keyed in &self.keyed {
            if keyed {
                variables.push(None);
            } else {
                variables.push(Some(free_count));
                free_count += 1;
            }
        }
        let matches = (0..self.samples.len())
            .filter_map(|k| {
                Some(MatchTerm {
                    sample: k,
                    segment: self.segments[k]?,
                    weight: (settings.match_weight * self.weights[k]).max(0.0).sqrt(),
                    target: self.targets[k],
                })
            })
            .collect_vec();
        let pairs = self
            .samples
            .iter()
            .tuple_windows()
            .enumerate()
            .filter(|&(k, _)| !(self.keyed[k] && self.keyed[k + 1]))
            .map(|(k, (&a, &b))| SmoothTerm {
                sample: k,
                weight: (settings.smooth_weight / (b - a) as f64).max(0.0).sqrt(),
            })
            .collect_vec();
        OrientationProblem {
            references: self.initial.clone(),
            base_references: self.bases.clone(),
            rotations: self.initial.clone(),
            bases: self.bases.clone(),
            variables,
            free_count,
            matches,
            pairs,
            deltas: DVector::zeros(3 * (free_count + self.bases.len())),
        }
    }

    /// Slerps the sampled rotations back to every frame.
    fn upsample(&self, rotations: &[Rotation3<f64>]) -> Vec<Rotation3<f64>> {
        (0..self.frame_count)
            .map(|i| {
                let next = self.samples.partition_point(|&s| s < i);
                if self.samples[next] == i {
                    rotations[next]
                } else {
                    let (a, b) = (self.samples[next - 1], self.samples[next]);
                    let u = (i - a) as f64 / (b - a) as f64;
                    slerp(&rotations[next - 1], &rotations[next], u)
                }
            })
            .collect()
    }

    /// Frames between two samples of the same segment join that segment.
    ///
    /// Interpolated frames take the id of the segment around them, so callers see one id per
    /// solved range rather than only on the sampled frames. Frames between two segments, or
    /// next to a keyframe, get `None`.
    fn upsample_segments(&self) -> Vec<Option<usize>> {
        (0..self.frame_count)
            .map(|i| {
                let next = self.samples.partition_point(|&s| s < i);
                if self.samples[next] == i {
                    self.segments[next]
                } else if self.segments[next - 1] == self.segments[next] {
                    self.segments[next]
                } else {
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct MatchTerm {
    sample: usize,
    segment: usize,
    /// Square root of the weight of the term.
    weight: f64,
    target: Vector3<f64>,
}

/// Smoothness between sample `sample` and the next one.
#[derive(Debug, Clone, Copy)]
struct SmoothTerm {
    sample: usize,
    weight: f64,
}

/// The orientation least squares problem, linearized around reference rotations.
///
/// Each free sample and each base rotation is perturbed on the left by its own 3 parameters. The
/// references are moved to the solution after every round so that the perturbations stay small.
#[derive(Debug, Clone)]
struct OrientationProblem {
    references: Vec<Rotation3<f64>>,
    base_references: Vec<Rotation3<f64>>,
    rotations: Vec<Rotation3<f64>>,
    bases: Vec<Rotation3<f64>>,
    variables: Vec<Option<usize>>,
    free_count: usize,
    matches: Vec<MatchTerm>,
    pairs: Vec<SmoothTerm>,
    deltas: DVector<f64>,
}

impl OrientationProblem {
    fn residual_count(&self) -> usize {
        3 * self.matches.len() + 9 * self.pairs.len()
    }

    fn is_trivial(&self) -> bool {
        self.deltas.is_empty() || self.residual_count() == 0
    }

    fn delta(&self, block: usize) -> Skew3 {
        Skew3(self.deltas.fixed_rows::<3>(3 * block).into_owned())
    }

    fn base_column(&self, segment: usize) -> usize {
        3 * (self.free_count + segment)
    }

    fn compute_residuals(&self) -> DVector<f64> {
        let mut residuals = DVector::zeros(self.residual_count());
        for (ix, term) in self.matches.iter().enumerate() {
            let forward = self.rotations[term.sample] * self.bases[term.segment] * Vector3::x();
            residuals
                .fixed_rows_mut::<3>(3 * ix)
                .copy_from(&((forward - term.target) * term.weight));
        }
        let offset = 3 * self.matches.len();
        for (ix, term) in self.pairs.iter().enumerate() {
            let difference =
                self.rotations[term.sample + 1].matrix() - self.rotations[term.sample].matrix();
            for c in 0..3 {
                residuals
                    .fixed_rows_mut::<3>(offset + 9 * ix + 3 * c)
                    .copy_from(&(difference.column(c) * term.weight));
            }
        }
        residuals
    }

    fn compute_jacobian(&self) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(self.residual_count(), self.deltas.len());
        for (ix, term) in self.matches.iter().enumerate() {
            let row = 3 * ix;
            let rotation = self.rotations[term.sample];
            let forward_local = self.bases[term.segment] * Vector3::x();
            if let Some(variable) = self.variables[term.sample] {
                let d = self.delta(variable).jacobian_self(rotation * forward_local);
                jacobian
                    .fixed_slice_mut::<3, 3>(row, 3 * variable)
                    .copy_from(&(d * term.weight));
            }
            let d = rotation.matrix()
                * self.delta(self.free_count + term.segment).jacobian_self(forward_local);
            jacobian
                .fixed_slice_mut::<3, 3>(row, self.base_column(term.segment))
                .copy_from(&(d * term.weight));
        }
        let offset = 3 * self.matches.len();
        for (ix, term) in self.pairs.iter().enumerate() {
            let (a, b) = (term.sample, term.sample + 1);
            for c in 0..3 {
                let row = offset + 9 * ix + 3 * c;
                if let Some(variable) = self.variables[b] {
                    let axis = self.rotations[b].matrix().column(c).into_owned();
                    let d = self.delta(variable).jacobian_self(axis);
                    jacobian
                        .fixed_slice_mut::<3, 3>(row, 3 * variable)
                        .copy_from(&(d * term.weight));
                }
                if let Some(variable) = self.variables[a] {
                    let axis = self.rotations[a].matrix().column(c).into_owned();
                    let d = self.delta(variable).jacobian_self(axis);
                    jacobian
                        .fixed_slice_mut::<3, 3>(row, 3 * variable)
                        .copy_from(&(-d * term.weight));
                }
            }
        }
        jacobian
    }

    fn cost(&self) -> f64 {
        self.compute_residuals().norm_squared()
    }

    /// The norm of the gradient of the cost at the references.
    fn gradient_norm(&self) -> f64 {
        2.0 * (self.compute_jacobian().transpose() * self.compute_residuals()).norm()
    }

    /// Moves the references to the current rotations.
    fn retract(&mut self) {
        self.references = self.rotations.clone();
        self.base_references = self.bases.clone();
        self.deltas.fill(0.0);
    }
}

impl LeastSquaresProblem<f64, Dynamic, Dynamic> for OrientationProblem {
    type ResidualStorage = VecStorage<f64, Dynamic, U1>;
    type JacobianStorage = VecStorage<f64, Dynamic, Dynamic>;
    type ParameterStorage = VecStorage<f64, Dynamic, U1>;

    fn set_params(&mut self, params: &DVector<f64>) {
        self.deltas.copy_from(params);
        for (k, variable) in self.variables.iter().enumerate() {
            self.rotations[k] = match *variable {
                Some(variable) => self.delta(variable).rotation() * self.references[k],
                None => self.references[k],
            };
        }
        for segment in 0..self.bases.len() {
            self.bases[segment] =
                self.delta(self.free_count + segment).rotation() * self.base_references[segment];
        }
    }

    fn params(&self) -> DVector<f64> {
        self.deltas.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.compute_residuals())
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.compute_jacobian())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn aligned_frame_points_at_target() {
        let rotation = Rotation3::from_euler_angles(0.3, -0.8, 1.1);
        let target = Vector3::new(0.2, -0.5, 0.9);
        let base = closest_aligned_frame(&rotation, &target);
        assert_relative_eq!(
            rotation * base * Vector3::x(),
            target.normalize(),
            epsilon = 1e-12
        );
        assert_relative_eq!(base.matrix().determinant(), 1.0, epsilon = 1e-12);
        assert_eq!(
            closest_aligned_frame(&rotation, &Vector3::zeros()),
            Rotation3::identity()
        );
        // Already aligned frames are kept.
        assert_relative_eq!(
            closest_aligned_frame(&Rotation3::identity(), &Vector3::x()),
            Rotation3::identity(),
            epsilon = 1e-12
        );
    }

    fn rotating_targets(n: usize) -> Vec<Vector3<f64>> {
        (0..n)
            .map(|i| {
                let angle = 0.1 * i as f64;
                Vector3::new(angle.cos(), angle.sin(), 0.2)
            })
            .collect()
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let n = 9;
        let targets = rotating_targets(n);
        let mut weights = vec![1.0; n];
        weights[5] = 0.0;
        let keyframes = [OrientationKeyframe::new(
            3,
            Rotation3::from_euler_angles(0.1, 0.2, 0.3),
        )];
        let optimizer = OrientationOptimizer::new().stride(2);
        let plan = optimizer.plan(&targets, &weights, &keyframes).unwrap();
        let mut problem = plan.problem(&optimizer);
        // The discontinuity at 5 splits the free samples in two segments.
        assert_eq!(problem.bases.len(), 2);

        let params = DVector::from_fn(problem.deltas.len(), |i, _| 0.1 * ((i * 7 % 5) as f64 - 2.0));
        problem.set_params(&params);
        let analytic = problem.compute_jacobian();
        let eps = 1e-6;
        for column in 0..params.len() {
            let mut plus = params.clone();
            plus[column] += eps;
            let mut minus = params.clone();
            minus[column] -= eps;
            problem.set_params(&plus);
            let high = problem.compute_residuals();
            problem.set_params(&minus);
            let low = problem.compute_residuals();
            let numeric = (high - low) / (2.0 * eps);
            assert_relative_eq!(analytic.column(column).into_owned(), numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn samples_keep_keyframes_and_discontinuities() {
        let n = 12;
        let mut weights = vec![1.0; n];
        weights[7] = 0.1;
        let keyframes = [OrientationKeyframe::new(3, Rotation3::identity())];
        let plan = OrientationOptimizer::new()
            .plan(&rotating_targets(n), &weights, &keyframes)
            .unwrap();
        assert_eq!(plan.samples, vec![0, 3, 5, 7, 10, 11]);
        // The discontinuity at 7 leaves [0, 5] too short to form a segment.
        assert_eq!(
            plan.segments,
            vec![None, None, None, Some(0), Some(0), Some(0)]
        );
        assert_eq!(plan.bases.len(), 1);
    }

    #[test]
    fn unsplit_ranges_form_a_segment_whatever_their_length() {
        let optimizer = OrientationOptimizer::new();
        for n in 1..=optimizer.min_segment_len {
            let plan = optimizer
                .plan(&vec![Vector3::z(); n], &vec![1.0; n], &[])
                .unwrap();
            assert_eq!(plan.segments, vec![Some(0); n]);
            assert_eq!(plan.bases.len(), 1);
        }
        // A keyframe does not split the range either.
        let keyframes = [OrientationKeyframe::new(0, Rotation3::identity())];
        let plan = optimizer
            .plan(&[Vector3::z(); 2], &[1.0; 2], &keyframes)
            .unwrap();
        assert_eq!(plan.segments, vec![None, Some(0)]);
        // Fully keyframed ranges have nothing to match.
        let plan = optimizer
            .plan(&[Vector3::z(); 1], &[1.0; 1], &keyframes)
            .unwrap();
        assert!(plan.bases.is_empty());
    }

    #[test]
    fn short_ranges_are_fully_sampled() {
        let plan = OrientationOptimizer::new()
            .plan(&rotating_targets(6), &[1.0; 6], &[])
            .unwrap();
        assert_eq!(plan.samples, (0..6).collect_vec());
    }

    #[test]
    fn rejects_bad_keyframes() {
        let targets = rotating_targets(4);
        let outside = [OrientationKeyframe::new(4, Rotation3::identity())];
        assert!(matches!(
            OrientationOptimizer::new().optimize(&targets, &[1.0; 4], &outside),
            Err(TrajectoryError::FrameIndex { frame: 4, .. })
        ));
        let twice = [
            OrientationKeyframe::new(1, Rotation3::identity()),
            OrientationKeyframe::new(1, Rotation3::identity()),
        ];
        assert!(matches!(
            OrientationOptimizer::new().optimize(&targets, &[1.0; 4], &twice),
            Err(TrajectoryError::MalformedInput(_))
        ));
        assert!(OrientationOptimizer::new()
            .optimize(&targets, &[1.0; 3], &[])
            .is_err());
    }
}
