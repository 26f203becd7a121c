use approx::assert_relative_eq;
use traj_core::nalgebra::{Point2, Vector2, Vector3};
use traj_core::{InMemoryFrames, MapResolution, PositionKeyframe, Ray, TrajectoryError};
use traj_optimize::{
    keyframe_constraints, KeyframeConstraint, PoissonTrajectory, PositionConstraint,
};
use traj_pinhole::{CameraIntrinsics, FrameCamera};

fn point(t: usize, x: f64) -> KeyframeConstraint {
    KeyframeConstraint {
        t,
        constraint: PositionConstraint::Point(Vector3::new(x, 0.0, 0.0)),
    }
}

#[test]
fn integrates_velocities_from_a_keyframe() {
    let velocities = vec![Vector3::x(); 5];
    let initial = vec![Vector3::zeros(); 5];
    let presolved = vec![false; 5];
    let positions = PoissonTrajectory::new(&velocities, &initial, &presolved)
        .unwrap()
        .solve(&[point(0, 0.0)])
        .unwrap();
    for (t, position) in positions.iter().enumerate() {
        assert_relative_eq!(*position, Vector3::new(t as f64, 0.0, 0.0), epsilon = 1e-9);
    }
}

#[test]
fn keyframes_override_velocities() {
    let velocities = vec![Vector3::zeros(); 5];
    let initial = vec![Vector3::zeros(); 5];
    let presolved = vec![false; 5];
    let positions = PoissonTrajectory::new(&velocities, &initial, &presolved)
        .unwrap()
        .solve(&[point(4, 4.0), point(0, 0.0)])
        .unwrap();
    for (t, position) in positions.iter().enumerate() {
        assert_relative_eq!(*position, Vector3::new(t as f64, 0.0, 0.0), epsilon = 1e-9);
    }
}

#[test]
fn screen_keyframes_settle_on_their_ray() {
    let velocities = vec![Vector3::x(); 3];
    let initial = vec![
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(2.0, 0.0, 0.0),
        Vector3::new(3.0, 0.0, 0.0),
    ];
    let presolved = vec![false; 3];
    let ray = KeyframeConstraint {
        t: 1,
        constraint: PositionConstraint::Ray(Ray {
            origin: Vector3::new(2.0, 0.0, -5.0),
            direction: Vector3::z_axis(),
        }),
    };
    let positions = PoissonTrajectory::new(&velocities, &initial, &presolved)
        .unwrap()
        .solve(&[point(0, 1.0), ray])
        .unwrap();
    for (position, expected) in positions.iter().zip(&initial) {
        assert_relative_eq!(position, expected, epsilon = 1e-9);
    }
}

#[test]
fn presolved_frames_are_held_and_rescaled() {
    let velocities = vec![Vector3::new(0.0, 1.0, 0.0); 4];
    let initial = vec![
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(2.0, 0.0, 0.0),
        Vector3::new(4.0, 0.0, 0.0),
        Vector3::new(6.0, 0.0, 0.0),
    ];
    let presolved = vec![true, true, false, true];
    // The keyframe on a presolved frame is ignored.
    let positions = PoissonTrajectory::new(&velocities, &initial, &presolved)
        .unwrap()
        .down_scale_factor(2.0)
        .solve(&[point(0, 100.0)])
        .unwrap();
    assert_relative_eq!(positions[0], Vector3::zeros(), epsilon = 1e-9);
    assert_relative_eq!(positions[1], Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-9);
    assert_relative_eq!(positions[3], Vector3::new(3.0, 0.0, 0.0), epsilon = 1e-9);
    // The velocities around frame 2 agree, so it lands halfway between its neighbors.
    assert_relative_eq!(positions[2], Vector3::new(2.0, 0.0, 0.0), epsilon = 1e-9);
}

#[test]
fn unconstrained_systems_are_singular() {
    let velocities = vec![Vector3::x(); 3];
    let initial = vec![Vector3::zeros(); 3];
    let presolved = vec![false; 3];
    let trajectory = PoissonTrajectory::new(&velocities, &initial, &presolved).unwrap();
    assert!(matches!(
        trajectory.solve(&[]),
        Err(TrajectoryError::SingularSystem { .. })
    ));
    assert!(matches!(
        trajectory.solve(&[point(1, 0.0), point(1, 1.0)]),
        Err(TrajectoryError::MalformedInput(_))
    ));
    assert!(matches!(
        trajectory.solve(&[point(3, 0.0)]),
        Err(TrajectoryError::FrameIndex { frame: 3, .. })
    ));
    assert!(PoissonTrajectory::new(&velocities, &initial[..2], &presolved).is_err());
}

#[test]
fn screen_keyframes_become_camera_rays() {
    let intrinsics = CameraIntrinsics::identity().principal_point(Point2::new(0.5, 0.5));
    let camera = FrameCamera::new(intrinsics, Vector2::new(1.0, 1.0)).translation(Vector3::y());
    let res = MapResolution::new(2, 2);
    let frames = InMemoryFrames::new(4, res, res, 0, camera);
    let constraints = keyframe_constraints(
        &frames,
        &[
            PositionKeyframe::screen(2, Point2::new(0.5, 0.5)),
            PositionKeyframe::world(3, Vector3::z()),
        ],
        1,
    )
    .unwrap();
    assert_eq!(constraints[0].t, 1);
    match constraints[0].constraint {
        PositionConstraint::Ray(ray) => {
            assert_relative_eq!(ray.origin, Vector3::y(), epsilon = 1e-12);
            assert_relative_eq!(ray.direction.into_inner(), Vector3::z(), epsilon = 1e-12);
        }
        PositionConstraint::Point(_) => panic!("screen keyframe became a point"),
    }
    assert_eq!(constraints[1], point_at(2, Vector3::z()));
    assert!(keyframe_constraints(&frames, &[PositionKeyframe::world(0, Vector3::z())], 1).is_err());
}

fn point_at(t: usize, position: Vector3<f64>) -> KeyframeConstraint {
    KeyframeConstraint {
        t,
        constraint: PositionConstraint::Point(position),
    }
}
