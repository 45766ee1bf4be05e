// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测会话 (Orchestration Loop)
///
/// ```text
/// Idle ──触发──▶ Capturing ──流结束/停止──▶ Done
///                    │
///                    └──打开失败/读取失败──▶ Failed(message)
/// ```
///
/// - 输入源打开失败或读取失败: 会话进入 Failed, 返回可显示的错误信息
/// - 模型推理或显示失败: 不在这里处理, 以 `ProcessError` 交给调用方
/// - 无论哪条退出路径, 输入句柄都只释放一次
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::display::{ChannelOrder, DisplaySink, IMAGE_CAPTION, VIDEO_CAPTION};
use crate::input::{open_source, CaptureError, CaptureHandle, Source};
use crate::processor::{Process, ProcessOptions};

/// 会话状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Capturing,
    Done,
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Capturing => "capturing",
            SessionState::Done => "done",
            SessionState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed(msg) => write!(f, "failed: {}", msg),
            other => f.write_str(other.name()),
        }
    }
}

/// 模型推理 / 显示失败 (不在会话内处理)
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("inference failed: {0:#}")]
    Model(anyhow::Error),

    #[error("display failed: {0:#}")]
    Display(anyhow::Error),
}

/// 外部停止信号, 每帧之间检查一次
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// 会话结果 (终态)
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub frames: u64,
    pub elapsed: Duration,
}

type Observer = Box<dyn FnMut(&SessionState, u64) + Send>;

/// 单次检测会话
pub struct Session {
    state: SessionState,
    stop: StopFlag,
    frames: u64,
    observer: Option<Observer>,
}

impl Session {
    pub fn new(stop: StopFlag) -> Self {
        Self {
            state: SessionState::Idle,
            stop,
            frames: 0,
            observer: None,
        }
    }

    /// 状态变化与每帧完成时回调 (状态, 已显示帧数)
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&SessionState, u64) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// 打开输入源并运行到终态
    pub fn run(
        self,
        source: &Source,
        processor: &mut dyn Process,
        sink: &mut dyn DisplaySink,
        options: &ProcessOptions,
    ) -> Result<SessionOutcome, ProcessError> {
        self.run_with(source, open_source, processor, sink, options)
    }

    /// 同 `run`, 输入源由 `open` 打开
    pub fn run_with<F>(
        mut self,
        source: &Source,
        open: F,
        processor: &mut dyn Process,
        sink: &mut dyn DisplaySink,
        options: &ProcessOptions,
    ) -> Result<SessionOutcome, ProcessError>
    where
        F: FnOnce(&Source) -> Result<Box<dyn CaptureHandle>, CaptureError>,
    {
        let started = Instant::now();
        let prefix = if source.is_single_shot() {
            "Error loading image"
        } else {
            "Error loading video"
        };

        self.transition(SessionState::Capturing);
        info!("▶️ 开始检测: {} ({:?})", source, options);

        let mut capture = match open(source) {
            Ok(capture) => capture,
            Err(e) => {
                let message = format!("{}: {}", prefix, e);
                error!("❌ {}", message);
                return Ok(self.finish(SessionState::Failed(message), started));
            }
        };

        let result = self.pump(capture.as_mut(), source, processor, sink, options);
        capture.release();

        match result {
            Ok(None) => Ok(self.finish(SessionState::Done, started)),
            Ok(Some(err)) => {
                let message = format!("{}: {}", prefix, err);
                error!("❌ {} (已显示 {} 帧)", message, self.frames);
                Ok(self.finish(SessionState::Failed(message), started))
            }
            Err(e) => {
                error!("❌ 会话中断: {} (已显示 {} 帧)", e, self.frames);
                Err(e)
            }
        }
    }

    /// 逐帧 读取 → 处理 → 显示; 返回读取错误 (若有)
    fn pump(
        &mut self,
        capture: &mut dyn CaptureHandle,
        source: &Source,
        processor: &mut dyn Process,
        sink: &mut dyn DisplaySink,
        options: &ProcessOptions,
    ) -> Result<Option<CaptureError>, ProcessError> {
        let caption = if source.is_single_shot() {
            IMAGE_CAPTION
        } else {
            VIDEO_CAPTION
        };

        while capture.is_open() {
            if self.stop.is_raised() {
                info!("⏹️ 收到停止信号");
                break;
            }

            let frame = match capture.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return Ok(Some(e)),
            };

            let annotated = processor
                .process(&frame, options)
                .map_err(ProcessError::Model)?;
            sink.show(&annotated, caption, ChannelOrder::Bgr)
                .map_err(ProcessError::Display)?;

            self.frames += 1;
            if let Some(observer) = self.observer.as_mut() {
                observer(&self.state, self.frames);
            }

            if source.is_single_shot() {
                break;
            }
        }
        Ok(None)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            warn!("⚠️ 会话已结束, 忽略状态 {}", next);
            return;
        }
        self.state = next;
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.state, self.frames);
        }
    }

    fn finish(mut self, state: SessionState, started: Instant) -> SessionOutcome {
        self.transition(state);
        let elapsed = started.elapsed();
        let fps = if elapsed.as_secs_f64() > 0.0 {
            self.frames as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        info!(
            "✅ 会话结束: {} | {} 帧 | {:.1?} | {:.1} fps",
            self.state, self.frames, elapsed, fps
        );
        SessionOutcome {
            state: self.state,
            frames: self.frames,
            elapsed,
        }
    }
}
