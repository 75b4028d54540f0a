use approx::assert_relative_eq;
use glam::{DMat3, DVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};

use kornia_registration::residual::{point_to_plane_rmse, point_to_point_rmse};
use kornia_registration::{
    estimate_affine_combined, estimate_rigid_combined_2d, estimate_rigid_combined_3d,
    AffineTransform, Correspondence, EstimationStatus, ExecutionStrategy, MetricTerm, PointSets,
    PointTransform, RegistrationError, RigidTransform, SolverConfig, ValueWeight,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type PlaneDataset<const D: usize> = (Vec<[f64; D]>, Vec<[f64; D]>);

// points on the six faces of a box, with the outward face normals
fn cube_faces(rng: &mut StdRng, num_points: usize) -> PlaneDataset<3> {
    let extent = [1.0, 1.5, 2.0];
    (0..num_points)
        .map(|i| {
            let axis = i % 3;
            let sign = if (i / 3) % 2 == 0 { -1.0 } else { 1.0 };
            let mut p: [f64; 3] =
                std::array::from_fn(|k| extent[k] * rng.random_range(-1.0..1.0));
            p[axis] = sign * extent[axis];
            let mut n = [0.0; 3];
            n[axis] = sign;
            (p, n)
        })
        .unzip()
}

// points on the four sides of a rectangle, with the outward side normals
fn rectangle_sides(rng: &mut StdRng, num_points: usize) -> PlaneDataset<2> {
    let extent = [1.0, 2.0];
    (0..num_points)
        .map(|i| {
            let axis = i % 2;
            let sign = if (i / 2) % 2 == 0 { -1.0 } else { 1.0 };
            let mut p: [f64; 2] =
                std::array::from_fn(|k| extent[k] * rng.random_range(-1.0..1.0));
            p[axis] = sign * extent[axis];
            let mut n = [0.0; 2];
            n[axis] = sign;
            (p, n)
        })
        .unzip()
}

fn small_motion_3d() -> RigidTransform<3> {
    let axis = DVec3::new(0.3, -0.5, 0.8).normalize();
    RigidTransform::new(
        DMat3::from_axis_angle(axis, 0.08)
            .transpose()
            .to_cols_array_2d(),
        [0.05, -0.03, 0.04],
    )
}

fn small_motion_2d() -> RigidTransform<2> {
    let (s, c) = 0.1f64.sin_cos();
    RigidTransform::new([[c, -s], [s, c]], [0.06, -0.04])
}

fn move_points<const D: usize, T: PointTransform<D>>(t: &T, src: &[[f64; D]]) -> Vec<[f64; D]> {
    let mut dst = vec![[0.0; D]; src.len()];
    t.transform_points(src, &mut dst);
    dst
}

fn identity_correspondences(n: usize) -> Vec<Correspondence> {
    (0..n).map(|i| Correspondence::new(i, i, 1.0)).collect()
}

fn assert_rigid_eq<const D: usize>(a: &RigidTransform<D>, b: &RigidTransform<D>, eps: f64) {
    for i in 0..D {
        for j in 0..D {
            assert_relative_eq!(a.rotation[i][j], b.rotation[i][j], epsilon = eps);
        }
        assert_relative_eq!(a.translation[i], b.translation[i], epsilon = eps);
    }
}

#[test]
fn point_to_plane_converges_3d() -> Result<(), RegistrationError> {
    init_logger();
    let mut rng = StdRng::seed_from_u64(10);
    let (dst, normals) = cube_faces(&mut rng, 300);
    let motion = small_motion_3d();
    let src = move_points(&motion.inverse(), &dst);
    let corr = identity_correspondences(dst.len());
    let points = PointSets::new(&dst, &normals, &src);

    let config = SolverConfig::default()
        .with_max_iterations(20)
        .with_convergence_tolerance(1e-5);

    let plane_only = estimate_rigid_combined_3d(
        &points,
        &MetricTerm::none(),
        &MetricTerm::new(&corr),
        &config.clone().with_weights(0.0, 1.0),
    )?;
    assert!(plane_only.is_success());
    assert!(plane_only.num_iterations <= 20);
    assert!(plane_only.transform.is_proper_rotation(1e-9));
    assert_rigid_eq(&plane_only.transform, &motion, 1e-6);

    let point_only = estimate_rigid_combined_3d(
        &points,
        &MetricTerm::new(&corr),
        &MetricTerm::none(),
        &config.clone().with_weights(1.0, 0.0),
    )?;
    assert!(point_only.is_success());
    assert_rigid_eq(&point_only.transform, &plane_only.transform, 1e-6);

    let mixed = estimate_rigid_combined_3d(
        &points,
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &config.with_weights(0.5, 0.5),
    )?;
    assert!(mixed.is_success());
    assert_rigid_eq(&mixed.transform, &plane_only.transform, 1e-6);

    let rmse = point_to_plane_rmse(&mixed.transform, &dst, &normals, &src, &corr)?;
    assert!(rmse < 1e-6);
    Ok(())
}

#[test]
fn point_to_plane_converges_2d() -> Result<(), RegistrationError> {
    init_logger();
    let mut rng = StdRng::seed_from_u64(11);
    let (dst, normals) = rectangle_sides(&mut rng, 200);
    let motion = small_motion_2d();
    let src = move_points(&motion.inverse(), &dst);
    let corr = identity_correspondences(dst.len());
    let points = PointSets::new(&dst, &normals, &src);

    let config = SolverConfig::default()
        .with_max_iterations(20)
        .with_convergence_tolerance(1e-5);

    let plane_only = estimate_rigid_combined_2d(
        &points,
        &MetricTerm::none(),
        &MetricTerm::new(&corr),
        &config.clone().with_weights(0.0, 1.0),
    )?;
    assert!(plane_only.is_success());
    assert_rigid_eq(&plane_only.transform, &motion, 1e-6);

    let point_only = estimate_rigid_combined_2d(
        &points,
        &MetricTerm::new(&corr),
        &MetricTerm::none(),
        &config.clone().with_weights(1.0, 0.0),
    )?;
    assert!(point_only.is_success());
    assert_rigid_eq(&point_only.transform, &plane_only.transform, 1e-6);

    let mixed = estimate_rigid_combined_2d(
        &points,
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &config.with_weights(0.5, 0.5),
    )?;
    assert!(mixed.is_success());
    assert_rigid_eq(&mixed.transform, &plane_only.transform, 1e-6);

    let rmse = point_to_point_rmse(&mixed.transform, &dst, &src, &corr)?;
    assert!(rmse < 1e-6);
    Ok(())
}

#[test]
fn combined_identity_recovery() -> Result<(), RegistrationError> {
    init_logger();
    let mut rng = StdRng::seed_from_u64(12);
    let (dst, normals) = cube_faces(&mut rng, 60);
    let corr = identity_correspondences(dst.len());
    let points = PointSets::new(&dst, &normals, &dst);
    let config = SolverConfig::default().with_max_iterations(5);

    let rigid = estimate_rigid_combined_3d(
        &points,
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &config,
    )?;
    assert!(rigid.is_success());
    assert_eq!(rigid.num_iterations, 1);
    assert_rigid_eq(&rigid.transform, &RigidTransform::identity(), 1e-9);

    let affine = estimate_affine_combined(
        &points,
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &config,
    )?;
    assert!(affine.is_success());
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_relative_eq!(affine.transform.linear[i][j], expected, epsilon = 1e-9);
        }
        assert_relative_eq!(affine.transform.translation[i], 0.0, epsilon = 1e-9);
    }
    Ok(())
}

#[test]
fn combined_zero_correspondences_fail_with_identity() -> Result<(), RegistrationError> {
    init_logger();
    let points3 = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
    let points2 = vec![[0.0, 0.0], [1.0, 0.0]];
    let config = SolverConfig::default().with_max_iterations(10);

    let rigid3 = estimate_rigid_combined_3d(
        &PointSets::new(&points3, &points3, &points3),
        &MetricTerm::none(),
        &MetricTerm::none(),
        &config,
    )?;
    assert_eq!(rigid3.status, EstimationStatus::Underdetermined);
    assert_eq!(rigid3.transform, RigidTransform::identity());
    assert_eq!(rigid3.num_iterations, 0);

    let rigid2 = estimate_rigid_combined_2d(
        &PointSets::without_normals(&points2, &points2),
        &MetricTerm::none(),
        &MetricTerm::none(),
        &config,
    )?;
    assert_eq!(rigid2.status, EstimationStatus::Underdetermined);
    assert_eq!(rigid2.transform, RigidTransform::identity());

    let affine = estimate_affine_combined(
        &PointSets::without_normals(&points2, &points2),
        &MetricTerm::none(),
        &MetricTerm::none(),
        &config,
    )?;
    assert_eq!(affine.status, EstimationStatus::Underdetermined);
    assert_eq!(affine.transform, AffineTransform::identity());
    Ok(())
}

#[test]
fn normal_count_mismatch() -> Result<(), RegistrationError> {
    let mut rng = StdRng::seed_from_u64(13);
    let (dst, normals) = cube_faces(&mut rng, 30);
    let corr = identity_correspondences(dst.len());

    let estimate = estimate_rigid_combined_3d(
        &PointSets::new(&dst, &normals[..10], &dst),
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &SolverConfig::default(),
    )?;
    assert_eq!(estimate.status, EstimationStatus::InputMismatch);
    assert_eq!(estimate.transform, RigidTransform::identity());

    // normals are not read when the plane term is disabled
    let estimate = estimate_rigid_combined_3d(
        &PointSets::new(&dst, &normals[..10], &dst),
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &SolverConfig::default().with_weights(1.0, 0.0),
    )?;
    assert_ne!(estimate.status, EstimationStatus::InputMismatch);
    Ok(())
}

#[test]
fn doubling_a_weight_equals_duplicating_the_correspondence() -> Result<(), RegistrationError> {
    init_logger();
    let mut rng = StdRng::seed_from_u64(14);
    let (dst, normals) = cube_faces(&mut rng, 90);
    // noisy source so that every correspondence pulls the solution
    let src = move_points(&small_motion_3d().inverse(), &dst)
        .into_iter()
        .map(|p| p.map(|x| x + rng.random_range(-0.02..0.02)))
        .collect::<Vec<_>>();
    let points = PointSets::new(&dst, &normals, &src);

    let mut weighted = identity_correspondences(dst.len());
    weighted[7].value = 2.0;
    let mut duplicated = identity_correspondences(dst.len());
    duplicated.push(Correspondence::new(7, 7, 1.0));

    let config = SolverConfig::default()
        .with_weights(0.3, 0.7)
        .with_execution(ExecutionStrategy::Serial);

    let affine_weighted = estimate_affine_combined(
        &points,
        &MetricTerm::new(&weighted).with_evaluator(ValueWeight),
        &MetricTerm::new(&weighted).with_evaluator(ValueWeight),
        &config,
    )?;
    let affine_duplicated = estimate_affine_combined(
        &points,
        &MetricTerm::new(&duplicated).with_evaluator(ValueWeight),
        &MetricTerm::new(&duplicated).with_evaluator(ValueWeight),
        &config,
    )?;
    assert!(affine_weighted.is_success());
    assert!(affine_duplicated.is_success());
    for i in 0..3 {
        for j in 0..3 {
            assert_relative_eq!(
                affine_weighted.transform.linear[i][j],
                affine_duplicated.transform.linear[i][j],
                epsilon = 1e-9
            );
        }
        assert_relative_eq!(
            affine_weighted.transform.translation[i],
            affine_duplicated.transform.translation[i],
            epsilon = 1e-9
        );
    }

    let config = config.with_max_iterations(10);
    let rigid_weighted = estimate_rigid_combined_3d(
        &points,
        &MetricTerm::new(&weighted).with_evaluator(ValueWeight),
        &MetricTerm::new(&weighted).with_evaluator(ValueWeight),
        &config,
    )?;
    let rigid_duplicated = estimate_rigid_combined_3d(
        &points,
        &MetricTerm::new(&duplicated).with_evaluator(ValueWeight),
        &MetricTerm::new(&duplicated).with_evaluator(ValueWeight),
        &config,
    )?;
    assert_eq!(rigid_weighted.status, rigid_duplicated.status);
    assert_rigid_eq(&rigid_weighted.transform, &rigid_duplicated.transform, 1e-8);
    Ok(())
}

#[test]
fn zero_weight_evaluator_discards_outliers() -> Result<(), RegistrationError> {
    init_logger();
    let mut rng = StdRng::seed_from_u64(15);
    let (dst, normals) = cube_faces(&mut rng, 120);
    let motion = small_motion_3d();
    let mut src = move_points(&motion.inverse(), &dst);
    for p in src.iter_mut().step_by(10) {
        p[0] += 5.0;
    }
    let corr = identity_correspondences(dst.len());
    let inliers = |i: usize, _j: usize, _v: &f64| if i % 10 == 0 { 0.0 } else { 1.0 };

    let estimate = estimate_rigid_combined_3d(
        &PointSets::new(&dst, &normals, &src),
        &MetricTerm::new(&corr).with_evaluator(inliers),
        &MetricTerm::new(&corr).with_evaluator(inliers),
        &SolverConfig::default()
            .with_max_iterations(20)
            .with_weights(0.5, 0.5),
    )?;
    assert!(estimate.is_success());
    assert_rigid_eq(&estimate.transform, &motion, 1e-6);
    Ok(())
}

#[test]
fn combined_execution_strategies_agree() -> Result<(), RegistrationError> {
    init_logger();
    let mut rng = StdRng::seed_from_u64(16);
    let (dst, normals) = cube_faces(&mut rng, 500);
    let src = move_points(&small_motion_3d().inverse(), &dst);
    let corr = identity_correspondences(dst.len());
    let points = PointSets::new(&dst, &normals, &src);

    let run = |execution: ExecutionStrategy| {
        estimate_rigid_combined_3d(
            &points,
            &MetricTerm::new(&corr),
            &MetricTerm::new(&corr),
            &SolverConfig::default()
                .with_max_iterations(3)
                .with_execution(execution),
        )
    };

    let reference = run(ExecutionStrategy::Serial)?;
    for execution in [
        ExecutionStrategy::ParallelElements,
        ExecutionStrategy::Chunked(32),
        ExecutionStrategy::Fixed(2),
    ] {
        let estimate = run(execution)?;
        assert_eq!(estimate.num_iterations, reference.num_iterations);
        assert_rigid_eq(&estimate.transform, &reference.transform, 1e-9);
    }
    Ok(())
}

#[test]
fn affine_combined_is_idempotent() -> Result<(), RegistrationError> {
    init_logger();
    let mut rng = StdRng::seed_from_u64(17);
    let (dst, normals) = cube_faces(&mut rng, 300);
    let motion = AffineTransform::new(
        [[0.95, -0.02, 0.03], [-0.01, 1.03, -0.04], [0.02, -0.03, 0.98]],
        [-0.1, 0.2, -0.05],
    );
    let src = move_points(&motion, &dst)
        .into_iter()
        .map(|p| p.map(|x| x + rng.random_range(-0.02..0.02)))
        .collect::<Vec<_>>();
    let corr = identity_correspondences(dst.len());
    let config = SolverConfig::default().with_weights(0.5, 1.0);

    let first = estimate_affine_combined(
        &PointSets::new(&dst, &normals, &src),
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &config,
    )?;
    assert!(first.is_success());

    let aligned = move_points(&first.transform, &src);
    let again = estimate_affine_combined(
        &PointSets::new(&dst, &normals, &aligned),
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &config,
    )?;
    assert!(again.is_success());
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_relative_eq!(again.transform.linear[i][j], expected, epsilon = 1e-9);
        }
        assert_relative_eq!(again.transform.translation[i], 0.0, epsilon = 1e-9);
    }
    Ok(())
}

fn max_alignment_error<const D: usize, T: PointTransform<D>>(
    t: &T,
    dst: &[[f64; D]],
    src: &[[f64; D]],
) -> f64 {
    move_points(t, src)
        .iter()
        .zip(dst)
        .flat_map(|(a, b)| a.iter().zip(b).map(|(x, y)| (x - y).abs()))
        .fold(0.0, f64::max)
}

#[test]
fn far_from_origin_affine_combined_recovery() -> Result<(), RegistrationError> {
    init_logger();
    let mut rng = StdRng::seed_from_u64(18);
    let (faces, normals) = cube_faces(&mut rng, 200);
    let src = faces
        .iter()
        .map(|p| p.map(|x| 5e3 + 10.0 * x))
        .collect::<Vec<_>>();
    let expected = AffineTransform::new(
        [[1.02, 0.01, -0.02], [0.03, 0.98, 0.01], [-0.01, 0.02, 1.01]],
        [2.0, -1.5, 0.75],
    );
    let dst = move_points(&expected, &src);
    let corr = identity_correspondences(dst.len());

    let estimate = estimate_affine_combined(
        &PointSets::new(&dst, &normals, &src),
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &SolverConfig::default().with_weights(1.0, 1.0),
    )?;
    assert!(matches!(
        estimate.status,
        EstimationStatus::Success | EstimationStatus::IllConditioned
    ));
    assert!(max_alignment_error(&estimate.transform, &dst, &src) < 1e-6);
    Ok(())
}

#[test]
fn far_from_origin_rigid_combined_recovery() -> Result<(), RegistrationError> {
    init_logger();
    let mut rng = StdRng::seed_from_u64(19);
    let (faces, normals) = cube_faces(&mut rng, 300);
    let dst = faces
        .iter()
        .map(|p| p.map(|x| 1e4 + 0.01 * x))
        .collect::<Vec<_>>();
    let axis = DVec3::new(0.2, 0.9, -0.4).normalize();
    let motion = RigidTransform::new(
        DMat3::from_axis_angle(axis, 1e-3)
            .transpose()
            .to_cols_array_2d(),
        [0.1, -0.05, 0.02],
    );
    let src = move_points(&motion.inverse(), &dst);
    let corr = identity_correspondences(dst.len());

    let estimate = estimate_rigid_combined_3d(
        &PointSets::new(&dst, &normals, &src),
        &MetricTerm::new(&corr),
        &MetricTerm::new(&corr),
        &SolverConfig::default()
            .with_max_iterations(20)
            .with_weights(0.5, 0.5),
    )?;
    assert!(matches!(
        estimate.status,
        EstimationStatus::Success | EstimationStatus::IllConditioned
    ));
    assert!(estimate.transform.is_proper_rotation(1e-9));
    for i in 0..3 {
        for j in 0..3 {
            assert_relative_eq!(
                estimate.transform.rotation[i][j],
                motion.rotation[i][j],
                epsilon = 1e-9
            );
        }
        assert_relative_eq!(
            estimate.transform.translation[i],
            motion.translation[i],
            epsilon = 1e-6
        );
    }
    Ok(())
}
