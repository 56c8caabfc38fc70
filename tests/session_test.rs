use camera_pose_calibration::config::CalibrationConfig;
use camera_pose_calibration::correspondence::{CameraCorrespondences, CorrespondenceError};
use camera_pose_calibration::intrinsics::{CameraInfo, Intrinsics};
use camera_pose_calibration::session::{
    CalibrationError, CalibrationSession, CameraEntry, ClickOutcome, SolveStatus, Tool,
};
use camera_pose_calibration::types::{Point2D, Point3D};
use nalgebra as na;

const IMAGE_CORNERS: [(f64, f64); 4] = [(0.0, 0.0), (1919.0, 0.0), (1919.0, 1079.0), (0.0, 1079.0)];
const MODEL_CORNERS: [(f64, f64, f64); 4] = [
    (-0.5399, -0.3036, 0.0),
    (0.5398, -0.3035, 0.0),
    (0.5394, 0.3032, 0.0),
    (-0.5393, 0.3032, 0.0),
];

fn model_corner(i: usize) -> Point3D {
    let (x, y, z) = MODEL_CORNERS[i];
    Point3D::new(x, y, z)
}

fn captured_session() -> CalibrationSession {
    let mut session = CalibrationSession::default();
    session.add_camera("cam0", "Front");
    session.select_camera("cam0").unwrap();
    session.capture(1920, 1080).unwrap();
    session
}

fn square_pairs() -> CameraCorrespondences {
    let mut set = CameraCorrespondences::new();
    for (i, (x, y)) in IMAGE_CORNERS.iter().enumerate() {
        set.push_image_point(Point2D::new(*x, *y)).unwrap();
        set.push_model_point(model_corner(i)).unwrap();
    }
    set
}

#[test]
fn test_click_flow_solves_on_fourth_pair() {
    let mut session = captured_session();
    for i in 0..4 {
        let (x, y) = IMAGE_CORNERS[i];
        assert_eq!(session.handle_image_click(x, y).unwrap(), ClickOutcome::Started);
        assert_eq!(session.status_text(), "Waiting for model point");
        // a second image click is not accepted while the model point is missing
        assert_eq!(session.handle_image_click(5.0, 5.0).unwrap(), ClickOutcome::Ignored);

        assert_eq!(
            session.handle_model_click(model_corner(i)).unwrap(),
            ClickOutcome::Completed
        );
        assert_eq!(session.status_text(), "");
        if i < 3 {
            assert!(session.solution("cam0").is_none());
        }
    }

    let solution = session.solution("cam0").unwrap();
    assert_eq!(solution.label, "Front");
    assert!(solution.pose.error < 1.0);
    assert!((solution.pose.position.z - 1.5).abs() < 1e-2);

    let buffer = session.model_points();
    assert_eq!(buffer.len(), 4);
    assert!(buffer.scales().iter().all(|s| *s == 10.0));
}

#[test]
fn test_model_first_pair() {
    let mut session = captured_session();
    assert_eq!(
        session.handle_model_click(model_corner(0)).unwrap(),
        ClickOutcome::Started
    );
    assert_eq!(session.status_text(), "Waiting for image point");
    assert_eq!(
        session.handle_model_click(model_corner(1)).unwrap(),
        ClickOutcome::Ignored
    );
    assert_eq!(session.model_points().len(), 1);
    assert_eq!(session.handle_image_click(0.0, 0.0).unwrap(), ClickOutcome::Completed);
    assert!(session.current_pairs().unwrap().last_pair_complete());
}

#[test]
fn test_tool_change_cancels_pending_pair() {
    let mut session = captured_session();
    session.handle_image_click(10.0, 10.0).unwrap();
    session.select_tool(Tool::Delete);
    assert_eq!(session.tool(), Tool::Delete);
    assert!(session.current_pairs().unwrap().is_empty());
    assert_eq!(session.status_text(), "");
}

#[test]
fn test_delete_keeps_previous_pose() {
    let mut session = captured_session();
    for i in 0..4 {
        let (x, y) = IMAGE_CORNERS[i];
        session.handle_image_click(x, y).unwrap();
        session.handle_model_click(model_corner(i)).unwrap();
    }
    let solved = session.solution("cam0").cloned().unwrap();

    session.select_tool(Tool::Delete);
    assert_eq!(
        session.handle_image_click(500.0, 500.0).unwrap(),
        ClickOutcome::NothingInRange
    );
    assert_eq!(session.handle_image_click(3.0, 4.0).unwrap(), ClickOutcome::Deleted);
    assert_eq!(session.current_pairs().unwrap().len(), 3);
    assert_eq!(session.model_points().len(), 3);

    assert_eq!(
        session.update_solution().unwrap(),
        SolveStatus::NotEnoughPoints {
            have: 3,
            required: 4
        }
    );
    assert_eq!(session.solution("cam0"), Some(&solved));

    assert_eq!(
        session.handle_model_click(model_corner(1)).unwrap(),
        ClickOutcome::Deleted
    );
    assert_eq!(session.current_pairs().unwrap().len(), 2);
}

#[test]
fn test_capture_resets_pairs() {
    let mut session = captured_session();
    session.handle_image_click(1.0, 1.0).unwrap();
    session.handle_model_click(model_corner(0)).unwrap();
    session.capture(640, 480).unwrap();
    assert!(session.current_pairs().unwrap().is_empty());
    assert!(session.model_points().is_empty());
    assert_eq!(session.camera("cam0").unwrap().image_size, Some((640, 480)));
}

#[test]
fn test_no_active_camera() {
    let mut session = CalibrationSession::default();
    session.add_camera("cam0", "Front");
    let err = session.handle_image_click(0.0, 0.0).unwrap_err();
    assert!(matches!(
        err,
        CalibrationError::Correspondence(CorrespondenceError::NoActiveCamera)
    ));
    assert!(session.capture(640, 480).is_err());
}

#[test]
fn test_set_intrinsics_validates() {
    let mut session = captured_session();
    let mut info = CameraInfo::new(&na::Matrix3::identity(), &[0.0; 8], 1920, 1080);
    info.camera_matrix.data[0] = -1.0;
    assert!(session.set_intrinsics("cam0", Intrinsics::Calibrated(info)).is_err());
    assert!(session.camera("cam0").unwrap().intrinsics.is_none());

    let valid = CameraInfo::new(&na::Matrix3::identity(), &[0.0; 8], 1920, 1080);
    assert!(session.set_intrinsics("missing", valid.clone().into()).is_err());
    session.set_intrinsics("cam0", valid.into()).unwrap();
    assert!(session.camera("cam0").unwrap().intrinsics.is_some());
}

#[test]
fn test_solve_all_and_export() {
    let mut session = CalibrationSession::default();
    session.insert_camera(
        "cam0",
        CameraEntry {
            label: "Front".to_string(),
            intrinsics: None,
            image_size: Some((1920, 1080)),
        },
        square_pairs(),
    );
    let mut partial = CameraCorrespondences::new();
    partial.push_image_point(Point2D::new(1.0, 1.0)).unwrap();
    partial.push_model_point(Point3D::ZERO).unwrap();
    session.insert_camera(
        "cam1",
        CameraEntry {
            label: "Side".to_string(),
            image_size: Some((1920, 1080)),
            ..Default::default()
        },
        partial,
    );
    session.insert_camera(
        "cam2",
        CameraEntry {
            label: "Top".to_string(),
            ..Default::default()
        },
        square_pairs(),
    );

    let statuses = session.solve_all();
    assert!(matches!(statuses["cam0"], SolveStatus::Solved(_)));
    assert_eq!(
        statuses["cam1"],
        SolveStatus::NotEnoughPoints {
            have: 1,
            required: 4
        }
    );
    assert_eq!(statuses["cam2"], SolveStatus::NoIntrinsics);

    let json = serde_json::to_value(session.export_solutions()).unwrap();
    let obj = json.as_object().unwrap();
    assert_eq!(obj.len(), 1);
    assert_eq!(json["cam0"]["label"], "Front");
    let pose = &json["cam0"]["pose"];
    for key in ["x", "y", "z"] {
        assert!(pose["position"][key].is_number());
        assert!(pose["rotation"][key].is_number());
    }
    assert!(pose["error"].as_f64().unwrap() < 1.0);
}

#[test]
fn test_model_point_buffer_grows_with_pairs() {
    let mut config = CalibrationConfig::default();
    config.editor.model_point_capacity = 2;
    let mut session = CalibrationSession::new(config);
    session.add_camera("cam0", "Front");
    session.select_camera("cam0").unwrap();
    session.capture(1920, 1080).unwrap();

    for i in 0..3 {
        let (x, y) = IMAGE_CORNERS[i];
        session.handle_image_click(x, y).unwrap();
        assert_eq!(
            session.handle_model_click(model_corner(i)).unwrap(),
            ClickOutcome::Completed
        );
    }
    assert_eq!(session.current_pairs().unwrap().len(), 3);
    let buffer = session.model_points();
    assert_eq!(buffer.len(), 3);
    assert!(buffer.capacity() >= 3);
    let third = &buffer.positions()[6..];
    assert!((third[0] - 0.5394).abs() < 1e-6);
    assert!((third[1] - 0.3032).abs() < 1e-6);
    assert_eq!(third[2], 0.0);
}

#[test]
fn test_capture_rejects_empty_image() {
    let mut session = CalibrationSession::default();
    session.add_camera("cam0", "Front");
    session.select_camera("cam0").unwrap();
    assert!(matches!(
        session.capture(0, 0),
        Err(CalibrationError::InvalidCapture {
            width: 0,
            height: 0
        })
    ));
    assert!(session.capture(1920, 0).is_err());
    assert!(session.camera("cam0").unwrap().image_size.is_none());
}

#[test]
fn test_readding_camera_keeps_state() {
    let mut session = captured_session();
    for i in 0..4 {
        let (x, y) = IMAGE_CORNERS[i];
        session.handle_image_click(x, y).unwrap();
        session.handle_model_click(model_corner(i)).unwrap();
    }
    session.add_camera("cam0", "Front left");

    let entry = session.camera("cam0").unwrap();
    assert_eq!(entry.label, "Front left");
    assert_eq!(entry.image_size, Some((1920, 1080)));
    assert_eq!(session.current_pairs().unwrap().len(), 4);
    assert_eq!(session.solution("cam0").unwrap().label, "Front left");
}
