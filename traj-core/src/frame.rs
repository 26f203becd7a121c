use crate::{Result, TrajectoryError};
use nalgebra::{Point2, UnitVector3, Vector3};
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Integer coordinates of a pixel in one of the per-frame maps.
///
/// `x` goes right and `y` goes down, matching normalized screen space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Pixel {
    pub x: usize,
    pub y: usize,
}

impl Pixel {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// The dimensions of a per-frame map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct MapResolution {
    pub width: usize,
    pub height: usize,
}

impl MapResolution {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> usize {
        self.width * self.height
    }

    /// The flat index of a pixel in an x-major map.
    ///
    /// ```
    /// use traj_core::{MapResolution, Pixel};
    /// let res = MapResolution::new(4, 3);
    /// assert_eq!(res.index(Pixel::new(2, 1)), 7);
    /// assert_eq!(res.pixel(7), Pixel::new(2, 1));
    /// ```
    pub fn index(self, pixel: Pixel) -> usize {
        pixel.x * self.height + pixel.y
    }

    /// The pixel stored at a flat index of an x-major map.
    pub fn pixel(self, index: usize) -> Pixel {
        Pixel {
            x: index / self.height,
            y: index % self.height,
        }
    }

    pub fn contains(self, pixel: Pixel) -> bool {
        pixel.x < self.width && pixel.y < self.height
    }

    /// All pixels of the map in flat index order.
    pub fn pixels(self) -> impl Iterator<Item = Pixel> {
        (0..self.pixel_count()).map(move |index| self.pixel(index))
    }

    /// The pixel under a normalized screen position, rounded to the nearest pixel and clamped
    /// to the map.
    pub fn screen_pixel(self, screen: Point2<f64>) -> Pixel {
        Pixel {
            x: clamp_round(screen.x * self.width as f64, self.width),
            y: clamp_round(screen.y * self.height as f64, self.height),
        }
    }

    /// Maps a pixel of a map with resolution `from` onto this resolution.
    ///
    /// ```
    /// use traj_core::{MapResolution, Pixel};
    /// let features = MapResolution::new(8, 6);
    /// let maps = MapResolution::new(32, 24);
    /// assert_eq!(maps.rescale(Pixel::new(3, 5), features), Pixel::new(12, 20));
    /// assert_eq!(features.rescale(Pixel::new(31, 23), maps), Pixel::new(7, 5));
    /// ```
    pub fn rescale(self, pixel: Pixel, from: MapResolution) -> Pixel {
        let sx = self.width as f64 / from.width as f64;
        let sy = self.height as f64 / from.height as f64;
        Pixel {
            x: clamp_round(pixel.x as f64 * sx, self.width),
            y: clamp_round(pixel.y as f64 * sy, self.height),
        }
    }
}

fn clamp_round(value: f64, size: usize) -> usize {
    let max = size.saturating_sub(1) as f64;
    value.round().max(0.0).min(max) as usize
}

/// A half-line in scene space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vector3<f64>,
    pub direction: UnitVector3<f64>,
}

impl Ray {
    /// The point at parameter `s` along the ray.
    pub fn at(&self, s: f64) -> Vector3<f64> {
        self.origin + s * self.direction.into_inner()
    }

    /// The parameter of the point on the ray closest to `point`.
    pub fn parameter_of(&self, point: &Vector3<f64>) -> f64 {
        (point - self.origin).dot(&self.direction.into_inner())
    }

    /// The distance from `point` to the infinite line supporting the ray.
    pub fn distance_to(&self, point: &Vector3<f64>) -> f64 {
        (self.at(self.parameter_of(point)) - point).norm()
    }
}

/// A camera that can cast rays through normalized screen positions.
///
/// Implementors work in the scaled scene space of the clip, so the rays they return can be
/// compared directly with positions sampled from the maps.
pub trait CameraModel {
    /// The ray from the optical center through a normalized screen position.
    fn ray(&self, screen: Point2<f64>) -> Ray;

    /// The normalized screen position of a scene point, or `None` if it is behind the camera.
    fn project(&self, point: &Vector3<f64>) -> Option<Point2<f64>>;
}

/// Read-only access to the precomputed per-frame maps of a clip.
///
/// Positions and flows are stored at [`FrameData::map_resolution`]. Descriptors and validity masks
/// are stored at [`FrameData::feature_resolution`], with validity masks flattened x-major.
pub trait FrameData {
    type Camera: CameraModel;

    fn frame_count(&self) -> usize;

    fn map_resolution(&self) -> MapResolution;

    fn feature_resolution(&self) -> MapResolution;

    /// The factor applied to scene space to obtain the space positions are solved in.
    fn down_scale_factor(&self) -> f64;

    fn position(&self, frame: usize, pixel: Pixel) -> Result<Vector3<f64>>;

    fn flow(&self, frame: usize, pixel: Pixel) -> Result<Vector3<f64>>;

    fn feature(&self, frame: usize, pixel: Pixel) -> Result<&[f32]>;

    fn validity_mask(&self, frame: usize) -> Result<&[bool]>;

    fn camera(&self, frame: usize) -> Result<Self::Camera>;

    /// Fails with [`TrajectoryError::FrameIndex`] if `frame` is not part of the clip.
    fn check_frame(&self, frame: usize) -> Result<()> {
        let frame_count = self.frame_count();
        if frame < frame_count {
            Ok(())
        } else {
            Err(TrajectoryError::FrameIndex { frame, frame_count })
        }
    }

    /// Whether the flow at a feature resolution pixel can be trusted.
    fn is_valid(&self, frame: usize, pixel: Pixel) -> Result<bool> {
        let resolution = self.feature_resolution();
        let mask = self.validity_mask(frame)?;
        Ok(mask
            .get(resolution.index(pixel))
            .copied()
            .unwrap_or(false))
    }

    /// Samples the position map under a normalized screen position, clamped to the image.
    fn position_at(&self, frame: usize, screen: Point2<f64>) -> Result<Vector3<f64>> {
        let screen = Point2::new(screen.x.clamp(0.0, 1.0), screen.y.clamp(0.0, 1.0));
        self.position(frame, self.map_resolution().screen_pixel(screen))
    }

    /// Samples the flow map under a normalized screen position, clamped to the image.
    fn flow_at(&self, frame: usize, screen: Point2<f64>) -> Result<Vector3<f64>> {
        let screen = Point2::new(screen.x.clamp(0.0, 1.0), screen.y.clamp(0.0, 1.0));
        self.flow(frame, self.map_resolution().screen_pixel(screen))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn screen_pixels_are_clamped() {
        let res = MapResolution::new(10, 5);
        assert_eq!(res.screen_pixel(Point2::new(0.0, 0.0)), Pixel::new(0, 0));
        assert_eq!(res.screen_pixel(Point2::new(1.0, 1.0)), Pixel::new(9, 4));
        assert_eq!(res.screen_pixel(Point2::new(-0.3, 2.0)), Pixel::new(0, 4));
        assert_eq!(res.screen_pixel(Point2::new(0.42, 0.5)), Pixel::new(4, 3));
    }

    #[test]
    fn flat_indices_round_trip() {
        let res = MapResolution::new(7, 3);
        for (index, pixel) in res.pixels().enumerate() {
            assert!(res.contains(pixel));
            assert_eq!(res.index(pixel), index);
        }
        assert_eq!(res.pixels().count(), 21);
    }

    #[test]
    fn ray_distance() {
        let ray = Ray {
            origin: Vector3::new(1.0, 0.0, 0.0),
            direction: UnitVector3::new_normalize(Vector3::new(0.0, 0.0, 2.0)),
        };
        let point = Vector3::new(1.0, 3.0, 5.0);
        assert_relative_eq!(ray.parameter_of(&point), 5.0);
        assert_relative_eq!(ray.distance_to(&point), 3.0);
        assert_relative_eq!(ray.at(2.0), Vector3::new(1.0, 0.0, 2.0));
    }
}
