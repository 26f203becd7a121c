use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Matrix3, Rotation3, Unit, Vector3};
use num_traits::Float;
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A tangent vector of the rotation group SO(3), its direction being the axis and its norm the
/// angle of the rotation.
///
/// Orientations are stored as rotation matrices. This type only exists to give the optimizers
/// three unconstrained degrees of freedom per rotation.
///
/// Perturbations are applied on the left: a rotation `R` perturbed by `w` is `exp(w) * R`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Skew3(pub Vector3<f64>);

impl Skew3 {
    pub fn zeros() -> Self {
        Self(Vector3::zeros())
    }

    /// The exponential map.
    pub fn rotation(self) -> Rotation3<f64> {
        self.into()
    }

    /// First order exponential map, only accurate for tiny angles.
    pub fn rotation_small(self) -> Rotation3<f64> {
        Rotation3::from_matrix(&(Matrix3::identity() + self.hat()))
    }

    /// Reads the vector back out of a skew-symmetric matrix, ignoring the symmetric part.
    pub fn vee(mat: Matrix3<f64>) -> Self {
        Self(Vector3::new(mat.m32, mat.m13, mat.m21))
    }

    /// The cross product matrix `[w]×`.
    pub fn hat(self) -> Matrix3<f64> {
        self.0.cross_matrix()
    }

    /// The left jacobian of SO(3) at this point of the tangent space.
    ///
    /// `exp(w + dw) ~= exp(J_l(w) * dw) * exp(w)`
    ///
    /// `J_l(w) = I + (1 - cos θ) / θ² [w]× + (θ - sin θ) / θ³ [w]×²`
    pub fn left_jacobian(self) -> Matrix3<f64> {
        let theta2 = self.0.norm_squared();
        let hat = self.hat();
        if theta2 <= f64::epsilon() {
            Matrix3::identity() + 0.5 * hat
        } else {
            let theta = theta2.sqrt();
            Matrix3::identity()
                + (1.0 - theta.cos()) / theta2 * hat
                + (theta - theta.sin()) / (theta2 * theta) * hat * hat
        }
    }

    /// The jacobian of a rotated vector in respect to the perturbation itself.
    ///
    /// `y = exp(w) * x`
    ///
    /// `dy/dw = -hat(y) * J_l(w)`
    ///
    /// Only the rotated vector `y` is needed, so the unrotated one is never passed in.
    pub fn jacobian_self(self, y: Vector3<f64>) -> Matrix3<f64> {
        -y.cross_matrix() * self.left_jacobian()
    }
}

impl From<Skew3> for Rotation3<f64> {
    fn from(w: Skew3) -> Self {
        // No axis can be recovered from a vanishing angle.
        let theta2 = w.0.norm_squared();
        if theta2 <= f64::epsilon() {
            w.rotation_small()
        } else {
            let theta = theta2.sqrt();
            let axis = Unit::new_unchecked(w.0 / theta);
            Self::from_axis_angle(&axis, theta)
        }
    }
}

/// The log map. Rotations of angle `π` have no unique log and give some valid one.
impl From<Rotation3<f64>> for Skew3 {
    fn from(r: Rotation3<f64>) -> Self {
        let skew3 = r.scaled_axis();
        let skew3 = if skew3.iter().any(|n| n.is_nan()) {
            Vector3::zeros()
        } else {
            skew3
        };
        Self(skew3)
    }
}

/// Geodesic interpolation between two rotations, `u = 0` giving `a` and `u = 1` giving `b`.
pub fn slerp(a: &Rotation3<f64>, b: &Rotation3<f64>, u: f64) -> Rotation3<f64> {
    let delta = Skew3::from(b * a.inverse());
    Skew3(delta.0 * u).rotation() * a
}

/// Interpolates keyed rotations over every frame of `frames`.
///
/// `keys` must be sorted by frame. Without keys every frame gets the identity, with a single key
/// every frame gets that key. Otherwise frames between two keys are slerped and frames before the
/// first (after the last) key are held at the first (last) key.
pub fn interpolate_rotations(
    keys: &[(usize, Rotation3<f64>)],
    frames: core::ops::RangeInclusive<usize>,
) -> Vec<Rotation3<f64>> {
    frames
        .map(|t| match keys {
            [] => Rotation3::identity(),
            [(_, only)] => *only,
            _ => {
                let next = keys.partition_point(|&(k, _)| k < t);
                if next < keys.len() && keys[next].0 == t {
                    keys[next].1
                } else if next == 0 {
                    keys[0].1
                } else if next == keys.len() {
                    keys[keys.len() - 1].1
                } else {
                    let (t0, r0) = keys[next - 1];
                    let (t1, r1) = keys[next];
                    slerp(&r0, &r1, (t - t0) as f64 / (t1 - t0) as f64)
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exp_log() {
        let w = Skew3(Vector3::new(0.3, -0.2, 0.9));
        let back = Skew3::from(w.rotation());
        assert_relative_eq!(back.0, w.0, epsilon = 1e-12);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let w = Skew3(Vector3::new(0.4, 0.1, -0.7));
        let x = Vector3::new(0.2, -1.0, 0.5);
        let analytic = w.jacobian_self(w.rotation() * x);
        let eps = 1e-6;
        for c in 0..3 {
            let mut plus = w;
            plus.0[c] += eps;
            let mut minus = w;
            minus.0[c] -= eps;
            let numeric = (plus.rotation() * x - minus.rotation() * x) / (2.0 * eps);
            assert_relative_eq!(analytic.column(c).into_owned(), numeric, epsilon = 1e-8);
        }
    }

    #[test]
    fn slerp_endpoints_and_midpoint() {
        let a = Rotation3::from_euler_angles(0.1, 0.0, 0.0);
        let b = Rotation3::from_axis_angle(&Vector3::z_axis(), 1.0) * a;
        assert_relative_eq!(slerp(&a, &b, 0.0), a, epsilon = 1e-12);
        assert_relative_eq!(slerp(&a, &b, 1.0), b, epsilon = 1e-12);
        let mid = slerp(&a, &b, 0.5);
        assert_relative_eq!(mid.angle_to(&a), 0.5, epsilon = 1e-12);
        assert_relative_eq!(mid.angle_to(&b), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn interpolation_pads_and_slerps() {
        let r = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.8);
        assert!(interpolate_rotations(&[], 0..=3)
            .iter()
            .all(|&rot| rot == Rotation3::identity()));
        assert!(interpolate_rotations(&[(2, r)], 0..=3)
            .iter()
            .all(|&rot| rot == r));

        let rotations = interpolate_rotations(&[(2, Rotation3::identity()), (6, r)], 0..=8);
        assert_eq!(rotations.len(), 9);
        assert_relative_eq!(rotations[0], Rotation3::identity());
        assert_relative_eq!(rotations[4].angle(), 0.4, epsilon = 1e-12);
        assert_relative_eq!(rotations[8], r, epsilon = 1e-12);
    }
}
