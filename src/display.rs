// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! 结果显示 (Display Sink)
//!
//! - WebPlaceholder: 网页占位图, 每次 `show` 覆盖唯一的最新帧 (不排队, 无历史)
//! - DirectorySink:  命令行版, 逐帧写入 JPEG 文件

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::input::{swap_rb, Frame};

/// 视频 / 摄像头帧的标题
pub const VIDEO_CAPTION: &str = "Detected Video";
/// 图片的标题
pub const IMAGE_CAPTION: &str = "Detected Image";

/// 像素通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// 单个检测目标的摘要 (JSON 输出)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub class_id: usize,
    pub class: String,
    pub score: f32,
    /// [x1, y1, x2, y2], 720×405 坐标
    pub bbox: [f32; 4],
    pub track_id: Option<u32>,
}

/// 绘制完成的帧 (BGR) + 本帧检测摘要
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub detections: Vec<DetectionSummary>,
}

impl AnnotatedFrame {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    /// 按给定通道顺序解释数据, 转成 RGB 图
    pub fn to_rgb(&self, channels: ChannelOrder) -> Result<RgbImage> {
        let mut data = self.frame.data.clone();
        if channels == ChannelOrder::Bgr {
            swap_rb(&mut data);
        }
        RgbImage::from_raw(self.frame.width, self.frame.height, data)
            .ok_or_else(|| anyhow!("帧数据长度与尺寸不符"))
    }
}

/// 已编码的最新帧
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub jpeg: Vec<u8>,
    pub caption: String,
    pub detections: Vec<DetectionSummary>,
    pub frame_number: u64,
    pub timestamp_ms: i64,
}

pub type SharedFrame = Arc<Mutex<Option<FramePacket>>>;

/// 显示接口
pub trait DisplaySink: Send {
    fn show(&mut self, image: &AnnotatedFrame, caption: &str, channels: ChannelOrder)
        -> Result<()>;
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// 网页占位图
#[derive(Clone)]
pub struct WebPlaceholder {
    latest: SharedFrame,
    quality: u8,
    frame_number: u64,
}

impl WebPlaceholder {
    pub fn new(latest: SharedFrame, quality: u8) -> Self {
        Self {
            latest,
            quality,
            frame_number: 0,
        }
    }

    pub fn shared(&self) -> SharedFrame {
        self.latest.clone()
    }

    /// 清空占位图 (新会话开始时)
    pub fn clear(&self) {
        if let Ok(mut guard) = self.latest.lock() {
            *guard = None;
        }
    }
}

impl DisplaySink for WebPlaceholder {
    fn show(&mut self, image: &AnnotatedFrame, caption: &str, channels: ChannelOrder) -> Result<()> {
        let rgb = image.to_rgb(channels)?;
        let jpeg = encode_jpeg(&rgb, self.quality)?;
        self.frame_number += 1;
        let packet = FramePacket {
            jpeg,
            caption: caption.to_string(),
            detections: image.detections.clone(),
            frame_number: self.frame_number,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };
        let mut guard = self
            .latest
            .lock()
            .map_err(|_| anyhow!("占位图锁已损坏"))?;
        *guard = Some(packet);
        Ok(())
    }
}

/// 逐帧写文件: frame_000001.jpg, frame_000002.jpg ...
pub struct DirectorySink {
    dir: PathBuf,
    quality: u8,
    count: u64,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(dir: P, quality: u8) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("无法创建输出目录: {}", dir.display()))?;
        info!("💾 结果输出目录: {}", dir.display());
        Ok(Self {
            dir,
            quality,
            count: 0,
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DisplaySink for DirectorySink {
    fn show(&mut self, image: &AnnotatedFrame, caption: &str, channels: ChannelOrder) -> Result<()> {
        let rgb = image.to_rgb(channels)?;
        self.count += 1;
        let path = self.dir.join(format!("frame_{:06}.jpg", self.count));
        std::fs::write(&path, encode_jpeg(&rgb, self.quality)?)
            .with_context(|| format!("写入失败: {}", path.display()))?;
        debug!("[{}] {} ({} 个目标)", caption, path.display(), image.detections.len());
        Ok(())
    }
}
