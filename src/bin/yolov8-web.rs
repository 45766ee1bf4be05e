// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 浏览器界面: 目标检测 / 跟踪演示
//
//   cargo run --release --features ffmpeg --bin yolov8-web -- --port 8501

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use yolov8_web::{server, Args, ModelKind, Settings};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut settings = Settings::load(&args.settings)?;
    if let Some(model) = &args.model {
        settings.detection_model = model.clone();
    }
    settings.print();
    info!("📦 检测模型: {}", settings.model_path(ModelKind::Detection).display());

    let web = server::serve(settings, args.runtime.load_options(), &args.host, args.port)?;
    web.wait();

    info!("👋 服务已退出");
    Ok(())
}
