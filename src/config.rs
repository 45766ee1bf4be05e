// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! 命令行参数与配置文件
//!
//! - `Args`:     网页版 (yolov8-web) 启动参数
//! - `CliArgs`:  命令行版 (yolov8) 一次性检测参数
//! - `Settings`: JSON 配置文件 (模型/图片/视频/摄像头路径)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::TrackerPreset;
use crate::input::SourceKind;
use crate::models::{LoadOptions, ModelKind};
use crate::OrtEP;

/// 推理运行时参数 (两个可执行文件共用)
#[derive(clap::Args, Debug, Clone)]
pub struct RuntimeArgs {
    /// 使用 CUDA 执行器
    #[arg(long)]
    pub cuda: bool,

    /// 使用 TensorRT 执行器
    #[arg(long)]
    pub trt: bool,

    /// GPU 设备号
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// NMS IOU 阈值
    #[arg(long, default_value_t = 0.45)]
    pub iou: f32,

    /// 打印各阶段耗时
    #[arg(long)]
    pub profile: bool,
}

impl RuntimeArgs {
    pub fn ep(&self) -> OrtEP {
        if self.trt {
            OrtEP::Trt(self.device_id)
        } else if self.cuda {
            OrtEP::CUDA(self.device_id)
        } else {
            OrtEP::CPU
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            ep: self.ep(),
            iou: self.iou,
            profile: self.profile,
        }
    }
}

/// 网页版启动参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLOv8 目标检测 / 跟踪 网页演示", long_about = None)]
pub struct Args {
    /// 配置文件路径 (不存在时自动创建)
    #[arg(short, long, default_value = "settings.json")]
    pub settings: PathBuf,

    /// 监听地址
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// 监听端口
    #[arg(short, long, default_value_t = 8501)]
    pub port: u16,

    /// 覆盖配置文件中的检测模型路径
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

/// 命令行版参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLOv8 目标检测 / 跟踪 (命令行)", long_about = None)]
pub struct CliArgs {
    /// 配置文件路径 (不存在时自动创建)
    #[arg(short, long, default_value = "settings.json")]
    pub settings: PathBuf,

    /// 输入源
    #[arg(long, value_enum, default_value_t = SourceKind::Image)]
    pub source: SourceKind,

    /// 图片或视频路径 (缺省时使用配置文件中的默认图片 / 视频)
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// 配置文件中的视频名称 (如 video_1)
    #[arg(long)]
    pub video: Option<String>,

    /// 摄像头编号 (缺省时使用配置文件中的编号)
    #[arg(long)]
    pub webcam: Option<usize>,

    /// 任务: detection / segmentation
    #[arg(long, value_enum, default_value_t = ModelKind::Detection)]
    pub task: ModelKind,

    /// 覆盖配置文件中的模型路径
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// 置信度阈值 (0.0 - 1.0)
    #[arg(short, long)]
    pub confidence: Option<f32>,

    /// 跟踪器预设: bytetrack.yaml / botsort.yaml (缺省为不跟踪)
    #[arg(long)]
    pub tracker: Option<TrackerPreset>,

    /// 输出目录
    #[arg(short, long, default_value = "runs/detect")]
    pub out: PathBuf,

    /// 最多处理的帧数 (摄像头必须指定或用 Ctrl-C 结束)
    #[arg(long)]
    pub max_frames: Option<u64>,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

/// 配置文件
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === 图片 ===
    pub default_image: PathBuf,
    pub default_detect_image: PathBuf,

    // === 视频 ===
    pub videos: BTreeMap<String, PathBuf>,

    // === 模型 ===
    pub detection_model: PathBuf,
    pub segmentation_model: PathBuf,

    // === 摄像头 ===
    pub webcam: usize,

    // === 界面 ===
    pub default_confidence: f32,
    pub jpeg_quality: u8,
    /// 标签字体 (缺省时搜索系统字体)
    pub font: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let videos = (1..=5)
            .map(|i| {
                (
                    format!("video_{}", i),
                    PathBuf::from(format!("videos/video_{}.mp4", i)),
                )
            })
            .collect();

        Self {
            default_image: PathBuf::from("images/office_4.jpg"),
            default_detect_image: PathBuf::from("images/office_4_detected.jpg"),
            videos,
            detection_model: PathBuf::from("weights/yolov8n.onnx"),
            segmentation_model: PathBuf::from("weights/yolov8n-seg.onnx"),
            webcam: 0,
            default_confidence: 0.4,
            jpeg_quality: 80,
            font: None,
        }
    }
}

impl Settings {
    /// 从JSON文件加载配置, 文件不存在时写入默认配置
    ///
    /// 返回的路径均已按配置文件所在目录解析
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = match fs::read_to_string(path) {
            Ok(json) => {
                let settings: Settings = serde_json::from_str(&json)
                    .with_context(|| format!("配置文件解析失败: {}", path.display()))?;
                info!("✅ 配置已从 {} 加载", path.display());
                settings
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("📝 配置文件不存在, 创建默认配置: {}", path.display());
                let settings = Self::default();
                if let Err(e) = settings.save(path) {
                    warn!("⚠️ 无法写入默认配置: {:#}", e);
                }
                settings
            }
            Err(e) => {
                return Err(e).with_context(|| format!("无法读取配置文件: {}", path.display()))
            }
        };

        let root = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(settings.resolved(root))
    }

    /// 保存到JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("保存配置失败: {}", path.display()))?;
        info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 相对路径按 root 解析
    pub fn resolved(mut self, root: &Path) -> Self {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        join(&mut self.default_image);
        join(&mut self.default_detect_image);
        join(&mut self.detection_model);
        join(&mut self.segmentation_model);
        self.videos.values_mut().for_each(join);
        if let Some(font) = self.font.as_mut() {
            join(font);
        }
        self
    }

    pub fn model_path(&self, kind: ModelKind) -> &Path {
        match kind {
            ModelKind::Detection => &self.detection_model,
            ModelKind::Segmentation => &self.segmentation_model,
        }
    }

    pub fn video_path(&self, name: &str) -> Option<&Path> {
        self.videos.get(name).map(PathBuf::as_path)
    }

    pub fn video_names(&self) -> Vec<String> {
        self.videos.keys().cloned().collect()
    }

    /// 打印当前配置
    pub fn print(&self) {
        info!("📋 当前配置:");
        info!("  检测模型: {}", self.detection_model.display());
        info!("  分割模型: {}", self.segmentation_model.display());
        info!("  默认图片: {}", self.default_image.display());
        info!("  视频: {:?}", self.video_names());
        info!("  摄像头: {}", self.webcam);
        info!("  默认置信度: {}", self.default_confidence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.videos.len(), 5);
        assert_eq!(s.video_path("video_3"), Some(Path::new("videos/video_3.mp4")));
        assert_eq!(s.default_confidence, 0.4);
        assert_eq!(s.model_path(ModelKind::Segmentation), Path::new("weights/yolov8n-seg.onnx"));
    }

    #[test]
    fn test_resolved_joins_relative_paths_only() {
        let mut s = Settings::default();
        s.detection_model = PathBuf::from("/abs/model.onnx");
        let s = s.resolved(Path::new("/srv/app"));
        assert_eq!(s.detection_model, PathBuf::from("/abs/model.onnx"));
        assert_eq!(s.default_image, PathBuf::from("/srv/app/images/office_4.jpg"));
        assert_eq!(
            s.video_path("video_1"),
            Some(Path::new("/srv/app/videos/video_1.mp4"))
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let s: Settings = serde_json::from_str(r#"{"webcam": 2}"#).unwrap();
        assert_eq!(s.webcam, 2);
        assert_eq!(s.jpeg_quality, 80);
    }

    #[test]
    fn test_cli_args_parse() {
        let args = CliArgs::parse_from([
            "yolov8",
            "--source",
            "video",
            "--video",
            "video_2",
            "--tracker",
            "botsort.yaml",
            "--confidence",
            "0.5",
        ]);
        assert_eq!(args.source, SourceKind::Video);
        assert_eq!(args.tracker, Some(TrackerPreset::BotSort));
        assert_eq!(args.confidence, Some(0.5));
        assert_eq!(args.runtime.ep(), OrtEP::CPU);
    }

    #[test]
    fn test_web_args_defaults() {
        let args = Args::parse_from(["yolov8-web", "--cuda", "--device-id", "1"]);
        assert_eq!(args.port, 8501);
        assert_eq!(args.runtime.ep(), OrtEP::CUDA(1));
    }
}
