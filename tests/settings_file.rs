// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use yolov8_web::{ModelKind, Settings};

#[test]
fn missing_file_is_created_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");

    let settings = Settings::load(&path).unwrap();
    assert!(path.is_file());
    assert_eq!(settings.default_confidence, 0.4);
    assert_eq!(settings.video_names().len(), 5);
    assert_eq!(
        settings.model_path(ModelKind::Detection),
        dir.path().join("weights/yolov8n.onnx")
    );
}

#[test]
fn saved_file_loads_back_with_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{ "videos": { "street": "/data/street.mp4" }, "webcam": 1, "default_confidence": 0.55 }"#,
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.video_names(), vec!["street".to_string()]);
    assert_eq!(
        settings.video_path("street"),
        Some(std::path::Path::new("/data/street.mp4"))
    );
    assert_eq!(settings.webcam, 1);
    assert_eq!(settings.default_confidence, 0.55);
    assert_eq!(settings.default_image, dir.path().join("images/office_4.jpg"));
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(Settings::load(&path).is_err());
}
