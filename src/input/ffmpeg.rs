// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! FFmpeg 输入 - 视频文件 / 本地摄像头
//!
//! 摄像头支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)
//!
//! 解码在 FFmpeg 调度线程中进行, 滤镜图统一转换为 bgr24,
//! `FrameSink` 把每帧拷贝出来, 通过容量为1的通道交给读取方

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, RecvError, Sender};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use tracing::{debug, info, warn};

use super::{CaptureError, CaptureHandle, Frame};

type FrameResult = Result<Frame, CaptureError>;

/// 帧提取过滤器: bgr24 帧 → `Frame`
struct FrameSink {
    tx: Option<Sender<FrameResult>>,
    stop: Arc<AtomicBool>,
    count: usize,
    dropped_frames: usize,
    last: Instant,
}

impl FrameSink {
    fn new(tx: Sender<FrameResult>, stop: Arc<AtomicBool>) -> Self {
        Self {
            tx: Some(tx),
            stop,
            count: 0,
            dropped_frames: 0,
            last: Instant::now(),
        }
    }

    /// 拷贝 bgr24 数据 (去掉行尾填充)
    fn copy_bgr(frame: &ez_ffmpeg::Frame) -> Option<Frame> {
        unsafe {
            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                return None;
            }
            let raw = &*frame.as_ptr();
            if raw.width <= 0 || raw.height <= 0 || raw.linesize[0] <= 0 || raw.data[0].is_null() {
                return None;
            }
            let (w, h, stride) = (raw.width as usize, raw.height as usize, raw.linesize[0] as usize);
            if stride < w * 3 {
                return None;
            }
            let plane = std::slice::from_raw_parts(raw.data[0], stride * (h - 1) + w * 3);
            let data = strip_stride(plane, w, h, stride)?;
            Frame::from_bgr(w as u32, h as u32, data)
        }
    }
}

/// 按行拷贝 w×h 的 bgr24 像素, 跳过每行 stride 之后的填充字节
fn strip_stride(plane: &[u8], width: usize, height: usize, stride: usize) -> Option<Vec<u8>> {
    let row_bytes = width * 3;
    if stride < row_bytes || height == 0 || plane.len() < stride * (height - 1) + row_bytes {
        return None;
    }
    let mut data = Vec::with_capacity(row_bytes * height);
    for row in plane.chunks(stride).take(height) {
        data.extend_from_slice(&row[..row_bytes]);
    }
    Some(data)
}

impl FrameFilter for FrameSink {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: ez_ffmpeg::Frame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<ez_ffmpeg::Frame>, String> {
        if self.stop.load(Ordering::Relaxed) {
            return Err("capture released".to_string());
        }

        let Some(decoded) = Self::copy_bgr(&frame) else {
            self.dropped_frames += 1;
            return Ok(None);
        };
        self.count += 1;

        if self.last.elapsed().as_secs_f64() >= 5.0 {
            debug!(
                "📺 解码统计: 已解码{}帧 | 丢弃{}",
                self.count, self.dropped_frames
            );
            self.last = Instant::now();
        }

        // 读取方已释放时通道断开, 结束解码
        let Some(tx) = self.tx.as_ref() else {
            return Err("capture released".to_string());
        };
        tx.send(Ok(decoded))
            .map_err(|_| "capture released".to_string())?;

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        self.tx = None;
        debug!("✅ 解码线程退出 (共{}帧)", self.count);
    }
}

/// FFmpeg 输入句柄
pub struct FfmpegCapture {
    rx: Option<Receiver<FrameResult>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    ended: bool,
    description: String,
}

impl FfmpegCapture {
    /// 打开视频文件
    pub fn open_video(path: &Path) -> Result<Self, CaptureError> {
        let description = path.display().to_string();
        if !path.is_file() {
            return Err(CaptureError::Open {
                source_desc: description,
                reason: "file not found".to_string(),
            });
        }
        Self::start(Input::new(description.as_str()), description)
    }

    /// 打开本地摄像头
    pub fn open_webcam(index: usize) -> Result<Self, CaptureError> {
        let url = Self::format_camera_url(index)?;
        info!("📷 摄像头 {} → {} ({})", index, url, Self::camera_format());
        let input = Input::new(url.as_str()).set_format(Self::camera_format());
        Self::start(input, format!("webcam {}", index))
    }

    /// 摄像头输入格式 - 根据平台选择
    fn camera_format() -> &'static str {
        #[cfg(target_os = "windows")]
        {
            "dshow"
        }
        #[cfg(target_os = "macos")]
        {
            "avfoundation"
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            "v4l2"
        }
    }

    /// 摄像头URL - Windows 需要设备名, 其余平台用编号
    fn format_camera_url(index: usize) -> Result<String, CaptureError> {
        #[cfg(target_os = "windows")]
        {
            let name = get_camera_devices()
                .into_iter()
                .find(|(i, _)| *i == index)
                .map(|(_, name)| name)
                .ok_or_else(|| CaptureError::Open {
                    source_desc: format!("webcam {}", index),
                    reason: "no such video device".to_string(),
                })?;
            Ok(format!("video={}", name))
        }
        #[cfg(target_os = "macos")]
        {
            Ok(format!("{}", index))
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            Ok(format!("/dev/video{}", index))
        }
    }

    fn start(input: Input, description: String) -> Result<Self, CaptureError> {
        let open_err = |reason: String| CaptureError::Open {
            source_desc: description.clone(),
            reason,
        };

        let (tx, rx) = bounded::<FrameResult>(1);
        let stop = Arc::new(AtomicBool::new(false));

        // 构建帧处理管线
        let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
        let pipe = pipe.filter("capture", Box::new(FrameSink::new(tx.clone(), stop.clone())));
        let out = create_null_output().add_frame_pipeline(pipe);

        let ctx = FfmpegContext::builder()
            .input(input)
            .filter_desc("format=bgr24")
            .output(out)
            .build()
            .map_err(|e| open_err(e.to_string()))?;
        let sch = ctx.start().map_err(|e| open_err(e.to_string()))?;
        info!("✅ 输入已打开: {}", description);

        // 等待解码结束; 出错时把错误交给读取方
        let worker = std::thread::Builder::new()
            .name("ffmpeg-wait".to_string())
            .spawn(move || {
                if let Err(e) = sch.wait() {
                    let _ = tx.send(Err(CaptureError::Read(e.to_string())));
                }
            })
            .map_err(|e| open_err(e.to_string()))?;

        Ok(Self {
            rx: Some(rx),
            stop,
            worker: Some(worker),
            ended: false,
            description,
        })
    }
}

impl CaptureHandle for FfmpegCapture {
    fn is_open(&self) -> bool {
        self.rx.is_some() && !self.ended
    }

    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(rx) = self.rx.as_ref() else {
            return Ok(None);
        };
        match rx.recv() {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(e)) => {
                self.ended = true;
                Err(e)
            }
            Err(RecvError) => {
                self.ended = true;
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // 断开通道, 解除解码线程的阻塞
        self.rx = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("⚠️ 解码线程异常退出: {}", self.description);
            }
        }
        debug!("🔌 输入已释放: {}", self.description);
    }
}

impl Drop for FfmpegCapture {
    fn drop(&mut self) {
        if self.rx.is_some() || self.worker.is_some() {
            self.release();
        }
    }
}

/// 获取可用的摄像头设备列表
pub fn get_camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ez_ffmpeg::{Input, Output};

    /// 用 lavfi testsrc 生成一段 5 帧的 64×36 视频
    fn generate_clip(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("clip.avi");
        let input = Input::new("testsrc=size=64x36:rate=5:duration=1").set_format("lavfi");
        FfmpegContext::builder()
            .input(input)
            .output(Output::from(path.to_str().unwrap()))
            .build()
            .unwrap()
            .start()
            .unwrap()
            .wait()
            .unwrap();
        path
    }

    #[test]
    fn test_strip_stride_drops_row_padding() {
        // 2×2 像素, 每行 8 字节 (6 字节像素 + 2 字节填充)
        let plane = [1, 2, 3, 4, 5, 6, 0, 0, 7, 8, 9, 10, 11, 12];
        let data = strip_stride(&plane, 2, 2, 8).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_strip_stride_rejects_short_plane() {
        assert!(strip_stride(&[0; 10], 2, 2, 8).is_none());
        assert!(strip_stride(&[0; 16], 2, 2, 4).is_none());
    }

    #[test]
    fn test_missing_video_is_open_error() {
        let err = FfmpegCapture::open_video(Path::new("videos/does_not_exist.mp4"))
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::Open { .. }));
        assert!(err.to_string().contains("does_not_exist.mp4"));
    }

    #[test]
    fn test_video_reads_every_frame_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        let clip = generate_clip(dir.path());

        let mut cap = FfmpegCapture::open_video(&clip).unwrap();
        let mut frames = 0;
        while cap.is_open() {
            match cap.read().unwrap() {
                Some(frame) => {
                    assert_eq!((frame.width, frame.height), (64, 36));
                    assert_eq!(frame.data.len(), 64 * 36 * 3);
                    frames += 1;
                }
                None => break,
            }
        }
        assert_eq!(frames, 5);
        assert!(!cap.is_open());

        cap.release();
        assert!(!cap.is_open());
        assert!(cap.read().unwrap().is_none());
    }

    #[test]
    fn test_release_mid_stream_stops_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let clip = generate_clip(dir.path());

        let mut cap = FfmpegCapture::open_video(&clip).unwrap();
        assert!(cap.read().unwrap().is_some());
        cap.release();
        assert!(!cap.is_open());
        assert!(cap.worker.is_none());
    }
}
