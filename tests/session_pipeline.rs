// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use image::{ImageFormat, Rgb, RgbImage};
use yolov8_web::display::{
    AnnotatedFrame, DetectionSummary, DirectorySink, WebPlaceholder, IMAGE_CAPTION,
};
use yolov8_web::input::{Frame, ImageInput, Source};
use yolov8_web::processor::{Process, ProcessOptions};
use yolov8_web::session::{Session, SessionState, StopFlag};

/// 不加载模型的处理器: 原样输出, 每帧报告一个目标
struct EchoProcessor {
    calls: usize,
}

impl Process for EchoProcessor {
    fn process(&mut self, frame: &Frame, _options: &ProcessOptions) -> Result<AnnotatedFrame> {
        self.calls += 1;
        Ok(AnnotatedFrame {
            frame: frame.clone(),
            detections: vec![DetectionSummary {
                class_id: 0,
                class: "person".to_string(),
                score: 0.9,
                bbox: [1.0, 2.0, 3.0, 4.0],
                track_id: None,
            }],
        })
    }
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(32, 18, Rgb([200, 10, 10]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

#[test]
fn uploaded_image_is_shown_once_and_written() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = DirectorySink::new(dir.path().join("out"), 90).unwrap();
    let mut processor = EchoProcessor { calls: 0 };

    let outcome = Session::new(StopFlag::new())
        .run(
            &Source::Image(ImageInput::Bytes(png_bytes())),
            &mut processor,
            &mut sink,
            &ProcessOptions::detect(0.4),
        )
        .unwrap();

    assert_eq!(outcome.state, SessionState::Done);
    assert_eq!(outcome.frames, 1);
    assert_eq!(processor.calls, 1);
    assert_eq!(sink.count(), 1);
    assert!(sink.dir().join("frame_000001.jpg").is_file());
}

#[test]
fn corrupt_upload_fails_with_image_prefix() {
    let latest = Arc::new(Mutex::new(None));
    let mut sink = WebPlaceholder::new(latest.clone(), 80);
    let mut processor = EchoProcessor { calls: 0 };

    let outcome = Session::new(StopFlag::new())
        .run(
            &Source::Image(ImageInput::Bytes(b"not an image".to_vec())),
            &mut processor,
            &mut sink,
            &ProcessOptions::detect(0.4),
        )
        .unwrap();

    match outcome.state {
        SessionState::Failed(msg) => assert!(msg.starts_with("Error loading image"), "{msg}"),
        other => panic!("unexpected state: {other}"),
    }
    assert_eq!(processor.calls, 0);
    assert!(latest.lock().unwrap().is_none());
}

#[test]
fn placeholder_holds_latest_jpeg_with_caption() {
    let latest = Arc::new(Mutex::new(None));
    let mut sink = WebPlaceholder::new(latest.clone(), 80);
    let mut processor = EchoProcessor { calls: 0 };

    Session::new(StopFlag::new())
        .run(
            &Source::Image(ImageInput::Bytes(png_bytes())),
            &mut processor,
            &mut sink,
            &ProcessOptions::detect(0.4),
        )
        .unwrap();

    let guard = latest.lock().unwrap();
    let packet = guard.as_ref().unwrap();
    assert_eq!(packet.caption, IMAGE_CAPTION);
    assert_eq!(packet.frame_number, 1);
    assert_eq!(packet.detections.len(), 1);
    assert_eq!(&packet.jpeg[..2], &[0xFF, 0xD8]);
}

#[cfg(not(feature = "ffmpeg"))]
#[test]
fn video_without_decoder_fails_with_video_prefix() {
    let mut sink = WebPlaceholder::new(Arc::new(Mutex::new(None)), 80);
    let mut processor = EchoProcessor { calls: 0 };

    let outcome = Session::new(StopFlag::new())
        .run(
            &Source::Video("videos/video_1.mp4".into()),
            &mut processor,
            &mut sink,
            &ProcessOptions::detect(0.4),
        )
        .unwrap();

    assert!(matches!(outcome.state, SessionState::Failed(ref m) if m.starts_with("Error loading video")));
    assert_eq!(outcome.frames, 0);
}
