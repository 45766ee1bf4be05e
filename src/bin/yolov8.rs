// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 无界面检测: 结果逐帧写入 runs/detect/<时间>/
//
//   cargo run --release --bin yolov8 -- --source image --path images/office_4.jpg
//   cargo run --release --features ffmpeg --bin yolov8 -- --source video --video video_1 --tracker bytetrack.yaml

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use yolov8_web::display::DirectorySink;
use yolov8_web::input::{ImageInput, Source, SourceKind};
use yolov8_web::plot::Plotter;
use yolov8_web::processor::{FrameProcessor, ProcessOptions};
use yolov8_web::session::{Session, SessionState, StopFlag};
use yolov8_web::{gen_time_string, load_model, CliArgs, ModelKind, Settings};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn build_source(args: &CliArgs, settings: &Settings) -> Result<Source> {
    let source = match args.source {
        SourceKind::Image => Source::Image(ImageInput::Path(
            args.path.clone().unwrap_or_else(|| settings.default_image.clone()),
        )),
        SourceKind::Video => match (&args.path, &args.video) {
            (Some(path), _) => Source::Video(path.clone()),
            (None, Some(name)) => Source::Video(
                settings
                    .video_path(name)
                    .ok_or_else(|| anyhow!("未知的视频: {} (可选: {:?})", name, settings.video_names()))?
                    .to_path_buf(),
            ),
            (None, None) => {
                let name = settings
                    .video_names()
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("配置文件中没有视频"))?;
                Source::Video(settings.videos[&name].clone())
            }
        },
        SourceKind::Webcam => Source::Webcam(args.webcam.unwrap_or(settings.webcam)),
    };
    Ok(source)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CliArgs::parse();

    let mut settings = Settings::load(&args.settings)?;
    if let Some(model) = &args.model {
        match args.task {
            ModelKind::Detection => settings.detection_model = model.clone(),
            ModelKind::Segmentation => settings.segmentation_model = model.clone(),
        }
    }

    let source = build_source(&args, &settings)?;
    let confidence = args.confidence.unwrap_or(settings.default_confidence);
    let options = match args.tracker {
        Some(preset) if !source.is_single_shot() => ProcessOptions::track(confidence, preset),
        _ => ProcessOptions::detect(confidence),
    };

    let model = load_model(
        settings.model_path(args.task),
        args.task,
        &args.runtime.load_options(),
    )?;
    let mut processor = FrameProcessor::new(model, Plotter::new(settings.font.as_deref()));
    let mut sink = DirectorySink::new(args.out.join(gen_time_string("-")), settings.jpeg_quality)?;

    let stop = StopFlag::new();
    let mut session = Session::new(stop.clone());
    if let Some(max_frames) = args.max_frames {
        let stop = stop.clone();
        session = session.with_observer(move |_, frames| {
            if frames >= max_frames {
                stop.raise();
            }
        });
    }

    let outcome = session.run(&source, &mut processor, &mut sink, &options)?;

    for d in processor.last_detections() {
        let id = d.track_id.map(|id| format!("id:{} ", id)).unwrap_or_default();
        info!(
            "  {}{} {:.2} [{:.0}, {:.0}, {:.0}, {:.0}]",
            id, d.class, d.score, d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]
        );
    }
    info!(
        "🏁 {} | {} 帧 | {:.2?} | 输出 {}",
        outcome.state,
        outcome.frames,
        outcome.elapsed,
        sink.dir().display()
    );

    if let SessionState::Failed(message) = outcome.state {
        bail!(message);
    }
    Ok(())
}
