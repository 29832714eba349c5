use fisheye_calib3d::board::BoardGeometry;
use fisheye_calib3d::calibrate::{calibrate, default_criteria, CalibrationFlags, TerminationReason};
use fisheye_calib3d::camera::FisheyeIntrinsics;
use fisheye_calib3d::correspondences::CorrespondenceAccumulator;
use fisheye_calib3d::error::CalibrationError;
use fisheye_calib3d::extrinsics::ExtrinsicPose;
use fisheye_calib3d::linalg;
use fisheye_image::ImageSize;
use fisheye_imgproc::subpix::TermCriteria;
use rand::{Rng, SeedableRng};

const IMAGE_SIZE: ImageSize = ImageSize {
    width: 640,
    height: 480,
};

fn truth() -> FisheyeIntrinsics {
    FisheyeIntrinsics::new(295.0, 297.0, 319.5, 239.5, [0.04, -0.012, 0.003, 0.0])
}

/// Poses looking at the board center from several directions.
fn poses(board: &BoardGeometry) -> Vec<ExtrinsicPose> {
    let center = [
        (board.cols() - 1) as f64 * board.square_size() / 2.0,
        (board.rows() - 1) as f64 * board.square_size() / 2.0,
        0.0,
    ];
    [
        ([0.0, 0.0, 0.0], [0.0, 0.0, 350.0]),
        ([0.45, 0.0, 0.0], [120.0, -60.0, 330.0]),
        ([-0.4, 0.1, 0.0], [-130.0, 70.0, 320.0]),
        ([0.0, 0.5, 0.1], [100.0, 80.0, 380.0]),
        ([0.1, -0.45, -0.2], [-110.0, -70.0, 340.0]),
        ([0.3, 0.3, 0.3], [0.0, 90.0, 400.0]),
        ([-0.2, -0.3, 1.2], [60.0, -20.0, 300.0]),
    ]
    .iter()
    .map(|&(rvec, offset)| {
        let r = linalg::rotation_from_axis_angle(&rvec);
        let c = linalg::mat33_mul_vec3(&r, &center);
        ExtrinsicPose::new(
            rvec,
            [offset[0] - c[0], offset[1] - c[1], offset[2] - c[2]],
        )
    })
    .collect()
}

fn project_view(
    camera: &FisheyeIntrinsics,
    board: &BoardGeometry,
    pose: &ExtrinsicPose,
) -> Vec<[f64; 2]> {
    board
        .object_points()
        .iter()
        .map(|x| camera.project(&pose.transform_point(x)))
        .collect()
}

fn synthetic_views(
    camera: &FisheyeIntrinsics,
    board: &BoardGeometry,
    noise: f64,
) -> CorrespondenceAccumulator {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut acc = CorrespondenceAccumulator::new(*board);
    for (i, pose) in poses(board).iter().enumerate() {
        let points = board
            .object_points()
            .iter()
            .map(|x| {
                let [u, v] = camera.project(&pose.transform_point(x));
                assert!(u > 0.0 && v > 0.0 && u < 640.0 && v < 480.0);
                if noise > 0.0 {
                    [
                        u + rng.random_range(-noise..noise),
                        v + rng.random_range(-noise..noise),
                    ]
                } else {
                    [u, v]
                }
            })
            .collect();
        acc.push_points(i, points).expect("complete view");
    }
    acc
}

#[test]
fn recovers_exact_intrinsics() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let board = BoardGeometry::new(6, 9, 25.0)?;
    let camera = truth();
    let acc = synthetic_views(&camera, &board, 0.0);

    let result = calibrate(
        &acc,
        IMAGE_SIZE,
        &CalibrationFlags::default(),
        &default_criteria(),
        None,
    )?;

    assert!(result.rms < 1e-3, "rms {}", result.rms);
    approx::assert_relative_eq!(result.intrinsics.fx, camera.fx, max_relative = 1e-4);
    approx::assert_relative_eq!(result.intrinsics.fy, camera.fy, max_relative = 1e-4);
    approx::assert_relative_eq!(result.intrinsics.k[0], camera.k[0], epsilon = 1e-3);

    // fixed parameters keep their initial values
    assert_eq!(result.intrinsics.cx, 319.5);
    assert_eq!(result.intrinsics.cy, 239.5);
    assert_eq!(result.intrinsics.alpha, 0.0);
    assert_eq!(result.intrinsics.k[3], 0.0);

    assert_eq!(result.poses.len(), acc.len());
    assert_eq!(result.per_image_rms.len(), acc.len());
    for (estimated, expected) in result.poses.iter().zip(poses(&board).iter()) {
        for k in 0..3 {
            approx::assert_relative_eq!(estimated.rvec[k], expected.rvec[k], epsilon = 1e-4);
            approx::assert_relative_eq!(estimated.tvec[k], expected.tvec[k], epsilon = 1e-1);
        }
    }
    Ok(())
}

#[test]
fn noisy_corners() -> Result<(), Box<dyn std::error::Error>> {
    let board = BoardGeometry::new(6, 9, 25.0)?;
    let camera = truth();
    let acc = synthetic_views(&camera, &board, 0.3);

    let result = calibrate(
        &acc,
        IMAGE_SIZE,
        &CalibrationFlags::default(),
        &default_criteria(),
        None,
    )?;

    assert!(result.rms > 0.0 && result.rms < 0.5, "rms {}", result.rms);
    approx::assert_relative_eq!(result.intrinsics.fx, camera.fx, max_relative = 1e-2);
    approx::assert_relative_eq!(result.intrinsics.fy, camera.fy, max_relative = 1e-2);
    Ok(())
}

#[test]
fn three_views_of_a_nine_by_six_board() -> Result<(), Box<dyn std::error::Error>> {
    let board = BoardGeometry::new(6, 9, 25.0)?;
    let camera = truth();
    let all = synthetic_views(&camera, &board, 0.1);

    let mut acc = CorrespondenceAccumulator::new(board);
    for i in 0..3 {
        acc.push_points(i, all.image_points(i).ok_or("missing view")?.to_vec())?;
    }
    assert_eq!(acc.len(), 3);
    for (object, image) in acc.views() {
        assert_eq!(object.len(), 54);
        assert_eq!(image.len(), 54);
    }

    let result = calibrate(
        &acc,
        IMAGE_SIZE,
        &CalibrationFlags::default(),
        &default_criteria(),
        None,
    )?;
    assert!(result.rms >= 0.0);
    assert!(result.intrinsics.fx > 0.0 && result.intrinsics.fy > 0.0);
    Ok(())
}

#[test]
fn fixed_intrinsics_only_moves_poses() -> Result<(), Box<dyn std::error::Error>> {
    let board = BoardGeometry::new(6, 9, 25.0)?;
    let camera = truth();
    let acc = synthetic_views(&camera, &board, 0.0);

    let flags = CalibrationFlags::default()
        .with_use_intrinsic_guess(true)
        .with_fix_intrinsic(true);
    let result = calibrate(&acc, IMAGE_SIZE, &flags, &default_criteria(), Some(&camera))?;

    assert_eq!(result.intrinsics, camera);
    assert!(result.rms < 1e-6, "rms {}", result.rms);
    Ok(())
}

#[test]
fn view_reaching_the_image_corner() -> Result<(), Box<dyn std::error::Error>> {
    let board = BoardGeometry::new(6, 9, 25.0)?;
    let camera = truth();

    let mut acc = CorrespondenceAccumulator::new(board);
    for (i, pose) in poses(&board).iter().take(3).enumerate() {
        acc.push_points(i, project_view(&camera, &board, pose))?;
    }

    // the outer corners are further from the center than the default guess can undistort
    let corner = ExtrinsicPose::new([0.0, 0.0, 0.0], [-500.0, -390.0, 330.0]);
    let points = project_view(&camera, &board, &corner);
    assert!(points
        .iter()
        .all(|p| p[0] > 0.0 && p[1] > 0.0 && p[0] < 640.0 && p[1] < 480.0));
    assert!(points
        .iter()
        .any(|p| (p[0] - 319.5).hypot(p[1] - 239.5) > 330.0));
    acc.push_points(3, points)?;

    let result = calibrate(
        &acc,
        IMAGE_SIZE,
        &CalibrationFlags::default(),
        &default_criteria(),
        None,
    )?;

    assert!(result.rms < 1e-3, "rms {}", result.rms);
    approx::assert_relative_eq!(result.intrinsics.fx, camera.fx, max_relative = 1e-3);
    approx::assert_relative_eq!(result.intrinsics.fy, camera.fy, max_relative = 1e-3);
    for k in 0..3 {
        approx::assert_relative_eq!(result.poses[3].tvec[k], corner.tvec[k], epsilon = 1.0);
    }
    Ok(())
}

#[test]
fn converges_without_recomputing_extrinsics() -> Result<(), Box<dyn std::error::Error>> {
    let board = BoardGeometry::new(6, 9, 25.0)?;
    let camera = truth();
    let acc = synthetic_views(&camera, &board, 0.0);

    let flags = CalibrationFlags {
        recompute_extrinsic: false,
        ..Default::default()
    };
    let result = calibrate(&acc, IMAGE_SIZE, &flags, &default_criteria(), None)?;

    assert!(result.rms < 1e-3, "rms {}", result.rms);
    approx::assert_relative_eq!(result.intrinsics.fx, camera.fx, max_relative = 1e-4);
    approx::assert_relative_eq!(result.intrinsics.fy, camera.fy, max_relative = 1e-4);
    Ok(())
}

#[test]
fn distant_board_is_ill_conditioned() -> Result<(), Box<dyn std::error::Error>> {
    let board = BoardGeometry::new(6, 9, 25.0)?;
    let camera = truth();

    // at this range depth and tilt barely move the corners
    let far = ExtrinsicPose::new([0.0, 0.0, 0.0], [2e7, 1e7, 1e8]);
    let mut acc = CorrespondenceAccumulator::new(board);
    acc.push_points(4, project_view(&camera, &board, &far))?;

    let res = calibrate(
        &acc,
        IMAGE_SIZE,
        &CalibrationFlags::default(),
        &default_criteria(),
        None,
    );
    assert!(
        matches!(res, Err(CalibrationError::IllConditioned { image: 4, condition }) if condition > 1e6),
        "{res:?}"
    );

    // without the check the same view is accepted
    let flags = CalibrationFlags::default().with_check_conditioning(false);
    assert!(!matches!(
        calibrate(&acc, IMAGE_SIZE, &flags, &default_criteria(), None),
        Err(CalibrationError::IllConditioned { .. })
    ));
    Ok(())
}

#[test]
fn non_finite_residual_diverges() -> Result<(), Box<dyn std::error::Error>> {
    let board = BoardGeometry::new(6, 9, 25.0)?;
    let camera = truth();
    let all = synthetic_views(&camera, &board, 0.0);

    let mut acc = CorrespondenceAccumulator::new(board);
    for i in 0..all.len() {
        let mut points = all.image_points(i).ok_or("missing view")?.to_vec();
        if i == 2 {
            // squaring this residual overflows
            points[0] = [1e160, 1e160];
        }
        acc.push_points(i, points)?;
    }

    let res = calibrate(
        &acc,
        IMAGE_SIZE,
        &CalibrationFlags::default(),
        &default_criteria(),
        None,
    );
    assert!(
        matches!(
            res,
            Err(CalibrationError::SolverDivergence { iteration: 0, .. })
        ),
        "{res:?}"
    );
    Ok(())
}

#[test]
fn damping_cap_ends_the_solve() -> Result<(), Box<dyn std::error::Error>> {
    let board = BoardGeometry::new(6, 9, 25.0)?;
    let camera = truth();
    let acc = synthetic_views(&camera, &board, 0.0);

    // a zero tolerance never converges, so the solve runs until no step helps
    let flags = CalibrationFlags::default()
        .with_use_intrinsic_guess(true)
        .with_fix_intrinsic(true);
    let criteria = TermCriteria::new(10_000, 0.0);
    let result = calibrate(&acc, IMAGE_SIZE, &flags, &criteria, Some(&camera))?;

    assert_eq!(result.termination, TerminationReason::LambdaMaxExceeded);
    assert!(result.iterations < criteria.max_iterations);
    assert!(result.rms < 1e-6, "rms {}", result.rms);
    Ok(())
}
