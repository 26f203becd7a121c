//! This crate plugs into `traj-core` and provides the pinhole camera used to relate keyframes placed
//! on screen to the scene. A [`FrameCamera`] carries the intrinsics and the pose of the camera at one
//! frame, and implements [`CameraModel`] so that solvers can cast rays through screen positions and
//! project scene points back onto the screen.
//!
//! Screen positions are normalized: `(0, 0)` is the top left corner and `(1, 1)` the bottom right.
//! They are converted to pixels with the image size of the camera before the intrinsics apply.

use traj_core::nalgebra::{
    Matrix3, Matrix4, Point2, Point3, Rotation3, UnitVector3, Vector2, Vector3, Vector4,
};
use traj_core::{CameraModel, Ray};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Focal lengths, principal point and skew of a pinhole camera, all in pixels.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
    pub skew: f64,
}

impl CameraIntrinsics {
    /// Unit focals, no skew and a principal point at the pixel origin.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            skew: 0.0,
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    pub fn skew(self, skew: f64) -> Self {
        Self { skew, ..self }
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  self.skew,      self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Moves a pixel onto the image plane at depth `1`, undoing [`CameraIntrinsics::matrix`].
    ///
    /// ```
    /// use traj_core::nalgebra::{Point2, Vector2};
    /// use traj_pinhole::CameraIntrinsics;
    /// let intrinsics = CameraIntrinsics {
    ///     focals: Vector2::new(800.0, 900.0),
    ///     principal_point: Point2::new(500.0, 600.0),
    ///     skew: 1.7,
    /// };
    /// let pixel = Point2::new(471.0, 322.0);
    /// let normalized = intrinsics.calibrate(pixel);
    /// let distance = (pixel.to_homogeneous() - intrinsics.matrix() * normalized.to_homogeneous()).norm();
    /// assert!(distance < 1e-9);
    /// ```
    pub fn calibrate(&self, pixel: Point2<f64>) -> Point2<f64> {
        let centered = pixel - self.principal_point;
        let y = centered.y / self.focals.y;
        let x = (centered.x - self.skew * y) / self.focals.x;
        Point2::new(x, y)
    }

    /// Converts normalized image coordinates back into pixel coordinates.
    pub fn uncalibrate(&self, normalized: Point2<f64>) -> Point2<f64> {
        let y = normalized.y * self.focals.y;
        let x = normalized.x * self.focals.x + self.skew * normalized.y;
        Point2::new(x, y) + self.principal_point.coords
    }
}

/// The windowing matrix that maps normalized device coordinates to pixels, with the `y` axis of
/// the device coordinates pointing up.
#[rustfmt::skip]
fn windowing_matrix(image_size: Vector2<f64>) -> Matrix3<f64> {
    let (w, h) = (image_size.x, image_size.y);
    Matrix3::new(
        w / 2.0,  0.0,       w / 2.0,
        0.0,     -h / 2.0,   h / 2.0,
        0.0,      0.0,       1.0,
    )
}

/// The camera of one frame of the clip.
///
/// `rotation` and `translation` place the camera in the scene (camera to world). `scale` is the
/// down scale factor of the clip: the scene space of the camera is multiplied by it to obtain
/// the space that positions are solved in.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FrameCamera {
    pub intrinsics: CameraIntrinsics,
    /// Width and height of the image in pixels.
    pub image_size: Vector2<f64>,
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    pub near: f64,
    pub far: f64,
    pub scale: f64,
}

impl FrameCamera {
    /// A camera at the origin looking down its `z` axis, with clipping planes at `0.1` and `10`.
    pub fn new(intrinsics: CameraIntrinsics, image_size: Vector2<f64>) -> Self {
        Self {
            intrinsics,
            image_size,
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
            near: 0.1,
            far: 10.0,
            scale: 1.0,
        }
    }

    #[must_use]
    pub fn rotation(self, rotation: Rotation3<f64>) -> Self {
        Self { rotation, ..self }
    }

    #[must_use]
    pub fn translation(self, translation: Vector3<f64>) -> Self {
        Self {
            translation,
            ..self
        }
    }

    #[must_use]
    pub fn clipping(self, near: f64, far: f64) -> Self {
        Self { near, far, ..self }
    }

    #[must_use]
    pub fn scale(self, scale: f64) -> Self {
        Self { scale, ..self }
    }

    pub fn to_pixel(&self, screen: Point2<f64>) -> Point2<f64> {
        Point2::new(screen.x * self.image_size.x, screen.y * self.image_size.y)
    }

    pub fn to_screen(&self, pixel: Point2<f64>) -> Point2<f64> {
        Point2::new(pixel.x / self.image_size.x, pixel.y / self.image_size.y)
    }

    /// The OpenGL projection matrix equivalent to the intrinsics, for a camera looking down its
    /// negative `z` axis with `y` up.
    pub fn gl_projection(&self) -> Matrix4<f64> {
        let near = self.near;
        let far = self.far;
        let windowing_inverse = windowing_matrix(self.image_size)
            .try_inverse()
            .unwrap_or_else(Matrix3::zeros);
        let dimensionless = windowing_inverse * self.intrinsics.matrix();
        let gamma = -(far + near) / (far - near);
        let beta = -2.0 * near * far / (far - near);
        let mut projection = Matrix4::zeros();
        projection
            .fixed_slice_mut::<2, 3>(0, 0)
            .copy_from(&dimensionless.fixed_slice::<2, 3>(0, 0));
        projection[(2, 0)] = dimensionless[(2, 0)];
        projection[(2, 1)] = dimensionless[(2, 1)];
        projection[(2, 2)] = gamma;
        projection[(2, 3)] = beta;
        projection[(3, 2)] = -1.0;
        projection
    }

    /// Converts a screen position and an OpenGL depth buffer value in `[-1, 1]` into a point in
    /// the solving space.
    ///
    /// Returns `None` if the projection cannot be inverted or the depth lies at infinity.
    pub fn unproject_depth(&self, screen: Point2<f64>, depth: f64) -> Option<Vector3<f64>> {
        let ndc = Vector4::new(2.0 * screen.x - 1.0, -2.0 * screen.y + 1.0, depth, 1.0);
        let unprojected = self.gl_projection().try_inverse()? * ndc;
        let camera_point = Point3::from_homogeneous(unprojected)?.coords;
        let point = (self.rotation * camera_point + self.translation) * self.scale;
        point.iter().all(|n| n.is_finite()).then(|| point)
    }
}

impl CameraModel for FrameCamera {
    /// The ray starts at the optical center and passes through the point of the near plane
    /// under the screen position.
    fn ray(&self, screen: Point2<f64>) -> Ray {
        let origin = self.translation * self.scale;
        let near_point = self.intrinsics.calibrate(self.to_pixel(screen)).to_homogeneous() * self.near;
        let through = (self.rotation * near_point + self.translation) * self.scale;
        Ray {
            origin,
            direction: UnitVector3::new_normalize(through - origin),
        }
    }

    fn project(&self, point: &Vector3<f64>) -> Option<Point2<f64>> {
        let camera_point = self.rotation.inverse() * (point / self.scale - self.translation);
        if camera_point.z <= 0.0 {
            return None;
        }
        let normalized = Point2::new(camera_point.x / camera_point.z, camera_point.y / camera_point.z);
        Some(self.to_screen(self.intrinsics.uncalibrate(normalized)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> FrameCamera {
        let intrinsics = CameraIntrinsics::identity()
            .focal(500.0)
            .principal_point(Point2::new(320.0, 240.0));
        FrameCamera::new(intrinsics, Vector2::new(640.0, 480.0))
            .rotation(Rotation3::from_euler_angles(0.1, -0.3, 0.2))
            .translation(Vector3::new(1.0, -2.0, 0.5))
            .scale(2.0)
    }

    #[test]
    fn center_ray_follows_optical_axis() {
        let camera = camera();
        let ray = camera.ray(Point2::new(0.5, 0.5));
        assert_relative_eq!(ray.origin, Vector3::new(2.0, -4.0, 1.0), epsilon = 1e-12);
        assert_relative_eq!(
            ray.direction.into_inner(),
            camera.rotation * Vector3::z(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn project_inverts_ray() {
        let camera = camera();
        let screen = Point2::new(0.21, 0.83);
        let ray = camera.ray(screen);
        let projected = camera.project(&ray.at(7.5)).unwrap();
        assert_relative_eq!(projected, screen, epsilon = 1e-9);
        assert!(camera.project(&ray.at(-1.0)).is_none());
    }

    #[test]
    fn depth_unprojection_hits_clipping_planes() {
        let intrinsics = CameraIntrinsics::identity()
            .focal(500.0)
            .principal_point(Point2::new(320.0, 240.0));
        let camera =
            FrameCamera::new(intrinsics, Vector2::new(640.0, 480.0)).clipping(0.5, 20.0);
        let center = Point2::new(0.5, 0.5);
        assert_relative_eq!(
            camera.unproject_depth(center, -1.0).unwrap(),
            Vector3::new(0.0, 0.0, -0.5),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            camera.unproject_depth(center, 1.0).unwrap(),
            Vector3::new(0.0, 0.0, -20.0),
            epsilon = 1e-9
        );
        // The middle of the depth range lies at the harmonic mean of the clipping planes.
        assert_relative_eq!(
            camera.unproject_depth(center, 0.0).unwrap(),
            Vector3::new(0.0, 0.0, -2.0 * 0.5 * 20.0 / 20.5),
            epsilon = 1e-9
        );
        // At the right edge of the near plane, x = near * (width / 2) / focal.
        assert_relative_eq!(
            camera.unproject_depth(Point2::new(1.0, 0.5), -1.0).unwrap(),
            Vector3::new(0.5 * 320.0 / 500.0, 0.0, -0.5),
            epsilon = 1e-9
        );
    }

    #[test]
    fn depth_unprojection_applies_pose_and_scale() {
        let intrinsics = CameraIntrinsics::identity()
            .focal(500.0)
            .principal_point(Point2::new(320.0, 240.0));
        let rotation = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.4);
        let translation = Vector3::new(0.0, 1.0, 3.0);
        let camera = FrameCamera::new(intrinsics, Vector2::new(640.0, 480.0))
            .rotation(rotation)
            .translation(translation)
            .scale(0.5);
        let point = camera.unproject_depth(Point2::new(0.5, 0.5), -1.0).unwrap();
        assert_relative_eq!(
            point,
            (rotation * Vector3::new(0.0, 0.0, -0.1) + translation) * 0.5,
            epsilon = 1e-9
        );
    }
}
