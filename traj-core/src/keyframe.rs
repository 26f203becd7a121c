use crate::{Result, TrajectoryError};
use derive_more::{AsRef, Deref, Into};
use nalgebra::{Matrix3, Point2, Rotation3, Vector3};
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Anything that constrains the trajectory at a single frame.
pub trait Keyframe {
    /// The frame this keyframe applies to.
    fn frame(&self) -> usize;

    /// Checks the values carried by the keyframe, independently of any clip.
    fn validate(&self) -> Result<()>;
}

/// Where a position keyframe places the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum KeyframePosition {
    /// A point in the scaled scene space of the clip.
    World(Vector3<f64>),
    /// A normalized screen position. The depth along the camera ray is left to the solver.
    Screen(Point2<f64>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct PositionKeyframe {
    pub t: usize,
    pub position: KeyframePosition,
}

impl PositionKeyframe {
    pub fn world(t: usize, position: Vector3<f64>) -> Self {
        Self {
            t,
            position: KeyframePosition::World(position),
        }
    }

    pub fn screen(t: usize, position: Point2<f64>) -> Self {
        Self {
            t,
            position: KeyframePosition::Screen(position),
        }
    }

    pub fn world_position(&self) -> Option<Vector3<f64>> {
        match self.position {
            KeyframePosition::World(position) => Some(position),
            KeyframePosition::Screen(_) => None,
        }
    }

    pub fn screen_position(&self) -> Option<Point2<f64>> {
        match self.position {
            KeyframePosition::Screen(position) => Some(position),
            KeyframePosition::World(_) => None,
        }
    }
}

impl Keyframe for PositionKeyframe {
    fn frame(&self) -> usize {
        self.t
    }

    fn validate(&self) -> Result<()> {
        match self.position {
            KeyframePosition::World(position) => {
                if position.iter().all(|n| n.is_finite()) {
                    Ok(())
                } else {
                    Err(TrajectoryError::malformed(format!(
                        "position keyframe at frame {} is not finite",
                        self.t
                    )))
                }
            }
            KeyframePosition::Screen(position) => {
                if position.iter().all(|n| n.is_finite() && (0.0..=1.0).contains(n)) {
                    Ok(())
                } else {
                    Err(TrajectoryError::malformed(format!(
                        "screen keyframe at frame {} lies outside of the image: {:?}",
                        self.t, position
                    )))
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct OrientationKeyframe {
    pub t: usize,
    pub rotation: Rotation3<f64>,
}

impl OrientationKeyframe {
    pub fn new(t: usize, rotation: Rotation3<f64>) -> Self {
        Self { t, rotation }
    }
}

impl Keyframe for OrientationKeyframe {
    fn frame(&self) -> usize {
        self.t
    }

    fn validate(&self) -> Result<()> {
        let matrix = self.rotation.matrix();
        let orthonormal = (matrix.transpose() * matrix - Matrix3::identity()).amax() < 1e-6;
        if orthonormal && (matrix.determinant() - 1.0).abs() < 1e-6 {
            Ok(())
        } else {
            Err(TrajectoryError::malformed(format!(
                "orientation keyframe at frame {} is not a rotation",
                self.t
            )))
        }
    }
}

/// A list of keyframes of one kind, sorted by frame with at most one keyframe per frame.
#[derive(Debug, Clone, PartialEq, AsRef, Deref, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Keyframes<K>(Vec<K>);

impl<K> Default for Keyframes<K> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<K: Keyframe> Keyframes<K> {
    /// Validates and sorts the keyframes.
    ///
    /// Two keyframes on the same frame are rejected, since every solver assumes a single
    /// constraint per frame.
    pub fn new(mut keyframes: Vec<K>) -> Result<Self> {
        for keyframe in &keyframes {
            keyframe.validate()?;
        }
        keyframes.sort_by_key(K::frame);
        if let Some(pair) = keyframes
            .windows(2)
            .find(|pair| pair[0].frame() == pair[1].frame())
        {
            return Err(TrajectoryError::malformed(format!(
                "two keyframes share frame {}",
                pair[0].frame()
            )));
        }
        Ok(Self(keyframes))
    }

    /// Fails if any keyframe lies past the end of a clip of `frame_count` frames.
    pub fn check_bounds(&self, frame_count: usize) -> Result<()> {
        match self.0.last() {
            Some(last) if last.frame() >= frame_count => Err(TrajectoryError::FrameIndex {
                frame: last.frame(),
                frame_count,
            }),
            _ => Ok(()),
        }
    }

    pub fn at(&self, frame: usize) -> Option<&K> {
        self.0
            .binary_search_by_key(&frame, K::frame)
            .ok()
            .map(|ix| &self.0[ix])
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.at(frame).is_some()
    }

    /// The keyframes whose frame lies in `first..=last`.
    pub fn in_range(&self, first: usize, last: usize) -> &[K] {
        let begin = self.0.partition_point(|k| k.frame() < first);
        let end = self.0.partition_point(|k| k.frame() <= last);
        &self.0[begin..end.max(begin)]
    }

    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().map(K::frame)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keyframes_are_sorted() {
        let keyframes = Keyframes::new(vec![
            PositionKeyframe::world(5, Vector3::zeros()),
            PositionKeyframe::screen(1, Point2::new(0.5, 0.5)),
            PositionKeyframe::world(3, Vector3::x()),
        ])
        .unwrap();
        assert_eq!(keyframes.frames().collect::<Vec<_>>(), vec![1, 3, 5]);
        assert!(keyframes.contains(3));
        assert!(!keyframes.contains(4));
        assert_eq!(keyframes.in_range(2, 5).len(), 2);
        assert_eq!(keyframes.in_range(6, 9).len(), 0);
        assert_eq!(keyframes.at(1).and_then(|k| k.screen_position()), Some(Point2::new(0.5, 0.5)));
    }

    #[test]
    fn duplicate_frames_are_rejected() {
        let result = Keyframes::new(vec![
            PositionKeyframe::world(2, Vector3::zeros()),
            PositionKeyframe::screen(2, Point2::new(0.5, 0.5)),
        ]);
        assert!(matches!(result, Err(TrajectoryError::MalformedInput(_))));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(PositionKeyframe::screen(0, Point2::new(1.5, 0.5))
            .validate()
            .is_err());
        assert!(PositionKeyframe::world(0, Vector3::new(f64::NAN, 0.0, 0.0))
            .validate()
            .is_err());
        let skewed = Rotation3::from_matrix_unchecked(Matrix3::new(
            1.0, 0.1, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ));
        assert!(OrientationKeyframe::new(0, skewed).validate().is_err());
        assert!(OrientationKeyframe::new(0, Rotation3::from_euler_angles(0.1, 0.2, 0.3))
            .validate()
            .is_ok());
    }

    #[test]
    fn bounds() {
        let keyframes =
            Keyframes::new(vec![OrientationKeyframe::new(9, Rotation3::identity())]).unwrap();
        assert!(keyframes.check_bounds(10).is_ok());
        assert_eq!(
            keyframes.check_bounds(9),
            Err(TrajectoryError::FrameIndex {
                frame: 9,
                frame_count: 9
            })
        );
    }
}
