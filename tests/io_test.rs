use camera_pose_calibration::config::CalibrationConfig;
use camera_pose_calibration::intrinsics::{CameraInfo, Intrinsics};
use camera_pose_calibration::io::{
    IoError, load_camera_info, load_session, object_from_json, object_to_json, save_session,
    write_solutions,
};
use camera_pose_calibration::session::{CalibrationSession, SolveStatus};
use camera_pose_calibration::types::{Point2D, Point3D};
use nalgebra as na;
use std::collections::BTreeMap;

const SESSION_JSON: &str = r#"{
  "cameras": {
    "cam0": {
      "label": "Front",
      "intrinsics": {
        "focalLength": 0.05,
        "sensorWidth": 0.036,
        "sensorHeight": 0.02025,
        "imageWidth": 1920,
        "imageHeight": 1080
      },
      "pairs": [
        {"image": {"x": 0.0, "y": 0.0}, "model": {"x": -0.5399, "y": -0.3036, "z": 0.0}},
        {"image": {"x": 1919.0, "y": 0.0}, "model": {"x": 0.5398, "y": -0.3035, "z": 0.0}},
        {"image": {"x": 1919.0, "y": 1079.0}, "model": {"x": 0.5394, "y": 0.3032, "z": 0.0}},
        {"image": {"x": 0.0, "y": 1079.0}, "model": {"x": -0.5393, "y": 0.3032, "z": 0.0}}
      ]
    },
    "cam1": {
      "label": "Side",
      "image_width": 640,
      "image_height": 480,
      "pairs": [
        {"image": {"x": 10.0, "y": 20.0}, "model": null}
      ]
    }
  }
}"#;

#[test]
fn test_load_and_solve_session() {
    let dir = tempfile::tempdir().unwrap();
    let session_path = dir.path().join("session.json");
    std::fs::write(&session_path, SESSION_JSON).unwrap();

    let mut session = load_session(&session_path, CalibrationConfig::default()).unwrap();
    assert_eq!(session.camera_ids().count(), 2);
    assert!(matches!(
        session.camera("cam0").unwrap().intrinsics,
        Some(Intrinsics::Sensor(_))
    ));
    assert_eq!(session.camera("cam1").unwrap().image_size, Some((640, 480)));
    assert!(session.pairs_for("cam1").unwrap().waiting_for_model_point());

    let statuses = session.solve_all();
    assert!(matches!(statuses["cam0"], SolveStatus::Solved(_)));

    let output = dir.path().join("solutions.json");
    write_solutions(&output, session.export_solutions()).unwrap();
    let written: serde_json::Value = object_from_json(&output).unwrap();
    assert_eq!(written["cam0"]["label"], "Front");
    assert!(written["cam0"]["pose"]["error"].as_f64().unwrap() < 1.0);
    assert!(written.get("cam1").is_none());
}

#[test]
fn test_save_session_round_trip() {
    let mut session = CalibrationSession::default();
    session.add_camera("cam0", "Front");
    session.select_camera("cam0").unwrap();
    session.capture(800, 600).unwrap();
    session.handle_image_click(100.0, 200.0).unwrap();
    session.handle_model_click(Point3D::new(0.1, 0.2, 0.3)).unwrap();
    session.handle_image_click(300.0, 400.0).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    save_session(&path, &session).unwrap();

    let loaded = load_session(&path, CalibrationConfig::default()).unwrap();
    assert_eq!(loaded.camera("cam0").unwrap().label, "Front");
    assert_eq!(loaded.camera("cam0").unwrap().image_size, Some((800, 600)));
    let pairs = loaded.pairs_for("cam0").unwrap();
    assert_eq!(pairs, session.pairs_for("cam0").unwrap());
    assert_eq!(pairs.pairs()[1].image(), Some(Point2D::new(300.0, 400.0)));
    // a loaded session starts without an active camera
    assert!(loaded.active_camera().is_none());
}

#[test]
fn test_camera_info_file() {
    let dir = tempfile::tempdir().unwrap();
    let k = na::Matrix3::new(900.0, 0.0, 640.0, 0.0, 905.0, 360.0, 0.0, 0.0, 1.0);
    let info = CameraInfo::new(&k, &[-0.1, 0.01, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1280, 720);
    let path = dir.path().join("camera_info.json");
    object_to_json(&path, &info).unwrap();

    let loaded = load_camera_info(&path).unwrap();
    assert_eq!(loaded, info);
    assert_eq!(loaded.camera_matrix().unwrap(), k);

    // five coefficient plumb_bob layout is zero padded
    let plumb_bob = r#"{
        "camera_matrix": {"rows": 3, "cols": 3, "data": [900, 0, 640, 0, 905, 360, 0, 0, 1]},
        "distortion_coefficients": {"rows": 1, "cols": 5, "data": [-0.1, 0.01, 0.0, 0.0, 0.002]},
        "distortion_model": "plumb_bob",
        "image_width": 1280,
        "image_height": 720
    }"#;
    let path = dir.path().join("plumb_bob.json");
    std::fs::write(&path, plumb_bob).unwrap();
    let loaded = load_camera_info(&path).unwrap();
    assert_eq!(loaded.distortion().unwrap()[4], 0.002);
    assert_eq!(loaded.distortion().unwrap()[5], 0.0);
}

#[test]
fn test_camera_info_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(
        &path,
        r#"{
        "camera_matrix": {"rows": 3, "cols": 3, "data": [900, 0, 640, 0, 905, 360]},
        "distortion_coefficients": {"rows": 1, "cols": 0, "data": []},
        "distortion_model": "none",
        "image_width": 1280,
        "image_height": 720
    }"#,
    )
    .unwrap();
    assert!(matches!(
        load_camera_info(&path),
        Err(IoError::Calibration(_))
    ));

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(load_camera_info(&path), Err(IoError::Json { .. })));

    let missing = dir.path().join("missing.json");
    assert!(matches!(
        object_from_json::<BTreeMap<String, f64>, _>(&missing),
        Err(IoError::Io { .. })
    ));
}

#[test]
fn test_config_defaults_from_partial_json() {
    let config: CalibrationConfig =
        serde_json::from_str(r#"{"solver": {"refine": false}, "editor": {"select_radius": 4.0}}"#)
            .unwrap();
    assert!(!config.solver.refine);
    assert_eq!(config.solver.min_correspondences, 4);
    assert_eq!(config.editor.select_radius, 4.0);
    assert_eq!(config.editor.model_point_capacity, 1000);
}
