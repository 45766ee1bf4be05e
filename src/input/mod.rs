// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 输入源系统 (Source Adapter)
///
/// 把 图片 / 视频文件 / 摄像头 统一成逐帧读取的 `CaptureHandle`
/// - ImageCapture:  单张图片, 读一帧后关闭
/// - FfmpegCapture: 视频文件 / 摄像头 (需要 `ffmpeg` 特性)
///
/// `read` 的返回值区分三种情况:
/// - `Ok(Some(frame))`: 新的一帧
/// - `Ok(None)`:        流正常结束
/// - `Err(e)`:          读取失败
use std::fmt;
use std::path::PathBuf;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod still;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{get_camera_devices, FfmpegCapture};
pub use still::ImageCapture;

/// 输入源错误
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("cannot open {source_desc}: {reason}")]
    Open { source_desc: String, reason: String },

    #[error("read failed: {0}")]
    Read(String),

    #[error("{0}")]
    Decode(#[from] image::ImageError),

    #[error("{0} support is not compiled in (enable the `ffmpeg` feature)")]
    BackendUnavailable(&'static str),
}

/// 已解码帧 (BGR8, 紧密排列)
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    /// BGR 数据构建帧, 长度不匹配时返回 None
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * 3).then_some(Self {
            data,
            width,
            height,
        })
    }

    /// 纯色帧 (测试与占位用)
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let data = bgr
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            data,
            width,
            height,
        }
    }

    pub fn from_rgb_image(image: &RgbImage) -> Self {
        let mut data = image.as_raw().clone();
        swap_rb(&mut data);
        Self {
            data,
            width: image.width(),
            height: image.height(),
        }
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        let mut data = self.data.clone();
        swap_rb(&mut data);
        RgbImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }
}

/// BGR ⇄ RGB 原地交换
pub fn swap_rb(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// 输入源种类 (界面上的 "Image" / "Video" / "Webcam")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum SourceKind {
    Image,
    Video,
    Webcam,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::Image, SourceKind::Video, SourceKind::Webcam];

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Image => "Image",
            SourceKind::Video => "Video",
            SourceKind::Webcam => "Webcam",
        }
    }
}

/// 图片输入: 文件路径 或 上传的编码数据
#[derive(Clone)]
pub enum ImageInput {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageInput::Path(p) => write!(f, "Path({})", p.display()),
            ImageInput::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
        }
    }
}

/// 输入源描述
#[derive(Debug, Clone)]
pub enum Source {
    Image(ImageInput),
    Video(PathBuf),
    Webcam(usize),
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Image(_) => SourceKind::Image,
            Source::Video(_) => SourceKind::Video,
            Source::Webcam(_) => SourceKind::Webcam,
        }
    }

    /// 是否只产生一帧
    pub fn is_single_shot(&self) -> bool {
        matches!(self, Source::Image(_))
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Image(ImageInput::Path(p)) => write!(f, "image {}", p.display()),
            Source::Image(ImageInput::Bytes(b)) => write!(f, "uploaded image ({} bytes)", b.len()),
            Source::Video(p) => write!(f, "video {}", p.display()),
            Source::Webcam(i) => write!(f, "webcam {}", i),
        }
    }
}

/// 逐帧读取的输入句柄
pub trait CaptureHandle: Send {
    fn is_open(&self) -> bool;

    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// 释放底层资源; 之后 `is_open` 返回 false
    fn release(&mut self);
}

/// 打开输入源
pub fn open_source(source: &Source) -> Result<Box<dyn CaptureHandle>, CaptureError> {
    match source {
        Source::Image(input) => Ok(Box::new(ImageCapture::open(input)?)),
        #[cfg(feature = "ffmpeg")]
        Source::Video(path) => Ok(Box::new(FfmpegCapture::open_video(path)?)),
        #[cfg(feature = "ffmpeg")]
        Source::Webcam(index) => Ok(Box::new(FfmpegCapture::open_webcam(*index)?)),
        #[cfg(not(feature = "ffmpeg"))]
        Source::Video(_) => Err(CaptureError::BackendUnavailable("video")),
        #[cfg(not(feature = "ffmpeg"))]
        Source::Webcam(_) => Err(CaptureError::BackendUnavailable("webcam")),
    }
}
