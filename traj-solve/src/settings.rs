use core::time::Duration;
use motion_graph::MotionGraphSearch;
use traj_optimize::OrientationOptimizer;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings of the trajectory solver.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SolverSettings {
    /// The fraction of the pixels of each frame dropped from the motion graph
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_prune_nodes"))]
    pub prune_nodes: f64,
    /// The weight of the distance between an advected node and the next node
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_proximity_weight")
    )]
    pub proximity_weight: f64,
    /// The weight of the descriptor distance between consecutive nodes
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_feature_similarity_weight")
    )]
    pub feature_similarity_weight: f64,
    /// The weight of the descriptor distance between a node and its bounding keyframes
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_target_feature_similarity_weight")
    )]
    pub target_feature_similarity_weight: f64,
    /// The weight pulling screen keyframes towards the tracked depth
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_keyframe_proximity_weight")
    )]
    pub keyframe_proximity_weight: f64,
    /// The quantile of the speeds of the clip that gets full matching confidence
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_velocity_quantile")
    )]
    pub velocity_quantile: f64,
    /// Below this speed scale the clip is considered static and no direction is trusted
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_minimum_velocity_scale")
    )]
    pub minimum_velocity_scale: f64,
    /// Frames with a lower matching confidence are treated as track discontinuities
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_discontinuity_threshold")
    )]
    pub discontinuity_threshold: f64,
    /// The weight of looking along the direction of motion
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_match_weight"))]
    pub match_weight: f64,
    /// The weight of the smoothness of the orientations
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_smooth_weight"))]
    pub smooth_weight: f64,
    /// Every this many frames an orientation is optimized, the others are interpolated
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_orientation_stride")
    )]
    pub orientation_stride: usize,
    /// The minimum number of free samples that make up an orientation segment
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_minimum_segment_len")
    )]
    pub minimum_segment_len: usize,
    /// The time in seconds after which the orientation optimizer gives up
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_orientation_time_budget")
    )]
    pub orientation_time_budget: f64,
    /// The gradient norm at which the orientations are considered converged
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_gradient_tolerance")
    )]
    pub gradient_tolerance: f64,
    /// The patience of each Levenberg-Marquardt round
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_orientation_patience")
    )]
    pub orientation_patience: usize,
    /// The maximum number of Levenberg-Marquardt rounds
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_orientation_rounds")
    )]
    pub orientation_rounds: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            prune_nodes: default_prune_nodes(),
            proximity_weight: default_proximity_weight(),
            feature_similarity_weight: default_feature_similarity_weight(),
            target_feature_similarity_weight: default_target_feature_similarity_weight(),
            keyframe_proximity_weight: default_keyframe_proximity_weight(),
            velocity_quantile: default_velocity_quantile(),
            minimum_velocity_scale: default_minimum_velocity_scale(),
            discontinuity_threshold: default_discontinuity_threshold(),
            match_weight: default_match_weight(),
            smooth_weight: default_smooth_weight(),
            orientation_stride: default_orientation_stride(),
            minimum_segment_len: default_minimum_segment_len(),
            orientation_time_budget: default_orientation_time_budget(),
            gradient_tolerance: default_gradient_tolerance(),
            orientation_patience: default_orientation_patience(),
            orientation_rounds: default_orientation_rounds(),
        }
    }
}

impl SolverSettings {
    pub fn motion_graph(&self) -> MotionGraphSearch {
        MotionGraphSearch::new()
            .prune_nodes(self.prune_nodes)
            .proximity_weight(self.proximity_weight)
            .feature_similarity_weight(self.feature_similarity_weight)
            .target_feature_similarity_weight(self.target_feature_similarity_weight)
    }

    pub fn orientation_optimizer(&self) -> OrientationOptimizer {
        OrientationOptimizer {
            match_weight: self.match_weight,
            smooth_weight: self.smooth_weight,
            stride: self.orientation_stride,
            discontinuity_threshold: self.discontinuity_threshold,
            min_segment_len: self.minimum_segment_len,
            time_budget: Duration::from_secs_f64(self.orientation_time_budget.max(0.0).min(1e9)),
            gradient_tolerance: self.gradient_tolerance,
            patience: self.orientation_patience,
            max_rounds: self.orientation_rounds,
        }
    }
}

fn default_prune_nodes() -> f64 {
    0.9
}

fn default_proximity_weight() -> f64 {
    1.0
}

fn default_feature_similarity_weight() -> f64 {
    0.0
}

fn default_target_feature_similarity_weight() -> f64 {
    0.0
}

fn default_keyframe_proximity_weight() -> f64 {
    0.01
}

fn default_velocity_quantile() -> f64 {
    0.9
}

fn default_minimum_velocity_scale() -> f64 {
    1e-4
}

fn default_discontinuity_threshold() -> f64 {
    0.2
}

fn default_match_weight() -> f64 {
    1.0
}

fn default_smooth_weight() -> f64 {
    10.0
}

fn default_orientation_stride() -> usize {
    5
}

fn default_minimum_segment_len() -> usize {
    3
}

fn default_orientation_time_budget() -> f64 {
    40.0
}

fn default_gradient_tolerance() -> f64 {
    1e-6
}

fn default_orientation_patience() -> usize {
    10
}

fn default_orientation_rounds() -> usize {
    20
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_solvers() {
        let settings = SolverSettings::default();
        assert_eq!(settings.motion_graph(), MotionGraphSearch::default());
        assert_eq!(
            settings.orientation_optimizer(),
            OrientationOptimizer::default()
        );
    }

    #[test]
    fn negative_budgets_expire_immediately() {
        let settings = SolverSettings {
            orientation_time_budget: -3.0,
            ..SolverSettings::default()
        };
        assert_eq!(settings.orientation_optimizer().time_budget, Duration::ZERO);
    }
}
