// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! 网页服务: 控制页面 + MJPEG 占位图 + JSON 接口
//!
//! - HTTP 服务运行在独立线程 (actix System), 只读取共享的最新帧和状态
//! - 检测会话运行在唯一的会话线程, 同一时间只有一个会话
//!
//! | 路由                        | 说明                               |
//! |-----------------------------|------------------------------------|
//! | `GET /`                     | 控制页面                           |
//! | `GET /stream.mjpg`          | MJPEG 实时结果                     |
//! | `GET /frame.jpg`            | 最新一帧                           |
//! | `GET /api/status`           | 会话状态                           |
//! | `GET /api/detections`       | 最新一帧的检测结果                 |
//! | `GET /api/settings`         | 可选的输入源 / 视频 / 跟踪器        |
//! | `POST /api/detect`          | 启动 视频 / 摄像头 / 默认图片 检测  |
//! | `POST /api/detect/image`    | 上传图片检测 (空请求体用默认图片)  |
//! | `POST /api/stop`            | 停止当前会话                       |
//! | `GET /videos/{name}`        | 原始视频 (浏览器播放)              |
//! | `GET /images/{which}`       | 默认图片 / 默认检测结果图          |

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use actix_web::{
    http::header,
    web::{self, Bytes},
    App, HttpResponse, HttpServer,
};
use anyhow::{anyhow, Context, Result};
use async_stream::stream;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::detection::TrackerPreset;
use crate::display::{DetectionSummary, FramePacket, SharedFrame, WebPlaceholder};
use crate::input::{ImageInput, Source, SourceKind};
use crate::models::{load_model, LoadOptions, ModelKind};
use crate::plot::Plotter;
use crate::processor::{FrameProcessor, ProcessOptions};
use crate::session::{Session, SessionState, StopFlag};

/// 会话状态快照 (`GET /api/status`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// idle / capturing / done / failed / errored
    pub state: String,
    pub message: Option<String>,
    pub frames: u64,
    pub caption: Option<String>,
    pub source: Option<String>,
    pub task: Option<ModelKind>,
    pub tracker: Option<TrackerPreset>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Idle.name().to_string(),
            message: None,
            frames: 0,
            caption: None,
            source: None,
            task: None,
            tracker: None,
        }
    }
}

pub type SharedStatus = Arc<Mutex<StatusSnapshot>>;

fn update_status(status: &SharedStatus, f: impl FnOnce(&mut StatusSnapshot)) {
    match status.lock() {
        Ok(mut guard) => f(&mut guard),
        Err(_) => warn!("⚠️ 状态锁已损坏"),
    }
}

/// 提交给会话线程的任务
#[derive(Debug, Clone)]
pub struct Job {
    pub source: Source,
    pub task: ModelKind,
    pub options: ProcessOptions,
}

/// `POST /api/detect` 请求体
#[derive(Debug, Clone, Deserialize)]
pub struct DetectRequest {
    pub source: SourceKind,
    pub video: Option<String>,
    pub task: Option<ModelKind>,
    /// 0.0 - 1.0
    pub confidence: Option<f32>,
    pub tracker: Option<TrackerPreset>,
}

#[derive(Debug, Deserialize)]
struct ImageQuery {
    task: Option<ModelKind>,
    confidence: Option<f32>,
}

#[derive(Serialize)]
struct SettingsResponse {
    sources: Vec<&'static str>,
    videos: Vec<String>,
    trackers: Vec<&'static str>,
    tasks: Vec<&'static str>,
    default_confidence: f32,
    webcam: usize,
}

#[derive(Serialize)]
struct DetectionsResponse<'a> {
    timestamp_ms: i64,
    frame_number: u64,
    caption: &'a str,
    detections: &'a [DetectionSummary],
}

/// HTTP 处理函数共享的状态
#[derive(Clone)]
pub struct ServerState {
    settings: Arc<Settings>,
    latest: SharedFrame,
    status: SharedStatus,
    stop: StopFlag,
    busy: Arc<AtomicBool>,
    jobs: Sender<Job>,
}

impl ServerState {
    pub fn new(
        settings: Arc<Settings>,
        latest: SharedFrame,
        status: SharedStatus,
        stop: StopFlag,
        busy: Arc<AtomicBool>,
        jobs: Sender<Job>,
    ) -> Self {
        Self {
            settings,
            latest,
            status,
            stop,
            busy,
            jobs,
        }
    }

    fn build_source(&self, req: &DetectRequest) -> Result<Source, String> {
        match req.source {
            SourceKind::Image => Ok(Source::Image(ImageInput::Path(
                self.settings.default_image.clone(),
            ))),
            SourceKind::Video => {
                let name = req
                    .video
                    .clone()
                    .or_else(|| self.settings.video_names().into_iter().next())
                    .ok_or_else(|| "no videos configured".to_string())?;
                self.settings
                    .video_path(&name)
                    .map(|p| Source::Video(p.to_path_buf()))
                    .ok_or_else(|| format!("unknown video: {}", name))
            }
            SourceKind::Webcam => Ok(Source::Webcam(self.settings.webcam)),
        }
    }

    /// 提交任务; 已有会话在运行时返回 409
    fn submit(&self, job: Job) -> HttpResponse {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return HttpResponse::Conflict().body("a detection session is already running");
        }
        // 入队前清除上一次的停止信号, 排队期间的停止请求作用于本任务
        self.stop.reset();

        let accepted = serde_json::json!({
            "source": job.source.to_string(),
            "task": job.task,
            "tracker": job.options.tracker,
        });
        match self.jobs.try_send(job) {
            Ok(()) => HttpResponse::Accepted().json(accepted),
            Err(TrySendError::Full(_)) => {
                self.busy.store(false, Ordering::SeqCst);
                HttpResponse::Conflict().body("a detection session is already queued")
            }
            Err(TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::SeqCst);
                HttpResponse::ServiceUnavailable().body("session worker is not running")
            }
        }
    }
}

/// 注册全部路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/frame.jpg", web::get().to(frame_handler))
        .route("/stream.mjpg", web::get().to(stream_handler))
        .route("/api/status", web::get().to(status_handler))
        .route("/api/detections", web::get().to(detections_handler))
        .route("/api/settings", web::get().to(settings_handler))
        .route("/api/detect", web::post().to(detect_handler))
        .route("/api/detect/image", web::post().to(detect_image_handler))
        .route("/api/stop", web::post().to(stop_handler))
        .route("/videos/{name}", web::get().to(video_handler))
        .route("/images/{which}", web::get().to(image_handler));
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(crate::html::INDEX_HTML)
}

fn latest_frame(shared: &SharedFrame) -> Option<FramePacket> {
    match shared.lock() {
        Ok(guard) => guard.clone(),
        Err(_) => None,
    }
}

async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    match latest_frame(&state.latest) {
        Some(packet) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .body(packet.jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// MJPEG 推流, 只在帧序号变化时发送
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(Duration::from_millis(33));
        let mut last_sent: Option<(u64, i64)> = None;
        loop {
            interval.tick().await;
            let packet = match latest_frame(&state.latest) {
                Some(packet) => packet,
                None => continue,
            };
            let key = (packet.frame_number, packet.timestamp_ms);
            if last_sent == Some(key) {
                continue;
            }
            last_sent = Some(key);

            let mut payload = Vec::with_capacity(packet.jpeg.len() + 64);
            payload.extend_from_slice(b"--frame\r\n");
            payload.extend_from_slice(format!("X-Sequence: {}\r\n", packet.frame_number).as_bytes());
            payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
            payload.extend_from_slice(&packet.jpeg);
            payload.extend_from_slice(b"\r\n");
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
        }
    };

    HttpResponse::Ok()
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .append_header((header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

async fn status_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.status.lock() {
        Ok(guard) => HttpResponse::Ok().json(&*guard),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

async fn detections_handler(state: web::Data<ServerState>) -> HttpResponse {
    match latest_frame(&state.latest) {
        Some(packet) => HttpResponse::Ok().json(DetectionsResponse {
            timestamp_ms: packet.timestamp_ms,
            frame_number: packet.frame_number,
            caption: &packet.caption,
            detections: &packet.detections,
        }),
        None => HttpResponse::NoContent().finish(),
    }
}

async fn settings_handler(state: web::Data<ServerState>) -> HttpResponse {
    let settings = &state.settings;
    HttpResponse::Ok().json(SettingsResponse {
        sources: SourceKind::ALL.iter().map(|s| s.label()).collect(),
        videos: settings.video_names(),
        trackers: TrackerPreset::ALL.iter().map(|t| t.name()).collect(),
        tasks: vec!["detection", "segmentation"],
        default_confidence: settings.default_confidence,
        webcam: settings.webcam,
    })
}

async fn detect_handler(
    state: web::Data<ServerState>,
    req: web::Json<DetectRequest>,
) -> HttpResponse {
    let req = req.into_inner();
    let source = match state.build_source(&req) {
        Ok(source) => source,
        Err(msg) => return HttpResponse::BadRequest().body(msg),
    };
    let confidence = req.confidence.unwrap_or(state.settings.default_confidence);
    // 图片没有跟踪选项
    let tracker = if source.is_single_shot() {
        None
    } else {
        req.tracker
    };
    let options = match tracker {
        Some(preset) => ProcessOptions::track(confidence, preset),
        None => ProcessOptions::detect(confidence),
    };

    state.submit(Job {
        source,
        task: req.task.unwrap_or(ModelKind::Detection),
        options,
    })
}

async fn detect_image_handler(
    state: web::Data<ServerState>,
    query: web::Query<ImageQuery>,
    body: Bytes,
) -> HttpResponse {
    let input = if body.is_empty() {
        ImageInput::Path(state.settings.default_image.clone())
    } else {
        ImageInput::Bytes(body.to_vec())
    };
    let confidence = query.confidence.unwrap_or(state.settings.default_confidence);
    state.submit(Job {
        source: Source::Image(input),
        task: query.task.unwrap_or(ModelKind::Detection),
        options: ProcessOptions::detect(confidence),
    })
}

async fn stop_handler(state: web::Data<ServerState>) -> HttpResponse {
    let running = state.busy.load(Ordering::SeqCst);
    if running {
        state.stop.raise();
        info!("⏹️ 请求停止当前会话");
    }
    HttpResponse::Ok().json(serde_json::json!({ "stopping": running }))
}

async fn send_file(path: PathBuf, content_type: String) -> HttpResponse {
    let shown = path.display().to_string();
    match web::block(move || std::fs::read(&path)).await {
        Ok(Ok(bytes)) => HttpResponse::Ok().content_type(content_type).body(bytes),
        Ok(Err(err)) => {
            warn!("⚠️ 无法读取 {}: {}", shown, err);
            HttpResponse::NotFound().body(format!("cannot read {}: {}", shown, err))
        }
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

fn image_mime(path: &Path) -> String {
    image::ImageFormat::from_path(path)
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|_| "application/octet-stream".to_string())
}

async fn video_handler(state: web::Data<ServerState>, name: web::Path<String>) -> HttpResponse {
    match state.settings.video_path(&name) {
        Some(path) => send_file(path.to_path_buf(), "video/mp4".to_string()).await,
        None => HttpResponse::NotFound().body(format!("unknown video: {}", name)),
    }
}

async fn image_handler(state: web::Data<ServerState>, which: web::Path<String>) -> HttpResponse {
    let path = match which.as_str() {
        "default" => state.settings.default_image.clone(),
        "default_detected" => state.settings.default_detect_image.clone(),
        other => return HttpResponse::NotFound().body(format!("unknown image: {}", other)),
    };
    let mime = image_mime(&path);
    send_file(path, mime).await
}

/// 离开作用域时清除忙碌标记 (包括 panic 展开)
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 会话线程: 串行执行任务, 按任务种类缓存已加载的模型
pub struct SessionWorker {
    settings: Arc<Settings>,
    load_options: LoadOptions,
    processors: HashMap<ModelKind, FrameProcessor>,
    sink: WebPlaceholder,
    status: SharedStatus,
    stop: StopFlag,
    busy: Arc<AtomicBool>,
}

impl SessionWorker {
    pub fn new(
        settings: Arc<Settings>,
        load_options: LoadOptions,
        sink: WebPlaceholder,
        status: SharedStatus,
        stop: StopFlag,
        busy: Arc<AtomicBool>,
    ) -> Self {
        Self {
            settings,
            load_options,
            processors: HashMap::new(),
            sink,
            status,
            stop,
            busy,
        }
    }

    /// 预先加载检测模型 (启动时加载失败直接报错)
    pub fn preload(&mut self, kind: ModelKind) -> Result<()> {
        Self::processor(&mut self.processors, &self.settings, &self.load_options, kind)?;
        Ok(())
    }

    fn processor<'a>(
        processors: &'a mut HashMap<ModelKind, FrameProcessor>,
        settings: &Settings,
        load_options: &LoadOptions,
        kind: ModelKind,
    ) -> Result<&'a mut FrameProcessor> {
        if !processors.contains_key(&kind) {
            let path = settings.model_path(kind);
            let model = load_model(path, kind, load_options).with_context(|| {
                format!("Unable to load model. Check the specified path: {}", path.display())
            })?;
            let plotter = Plotter::new(settings.font.as_deref());
            processors.insert(kind, FrameProcessor::new(model, plotter));
        }
        processors
            .get_mut(&kind)
            .ok_or_else(|| anyhow!("model cache is inconsistent"))
    }

    pub fn run(mut self, jobs: Receiver<Job>) {
        info!("🧵 会话线程启动");
        for job in jobs {
            let _busy = BusyGuard(self.busy.clone());
            self.handle(job);
        }
        info!("🧵 会话线程退出");
    }

    fn handle(&mut self, job: Job) {
        self.sink.clear();
        update_status(&self.status, |s| {
            *s = StatusSnapshot {
                state: SessionState::Capturing.name().to_string(),
                source: Some(job.source.to_string()),
                task: Some(job.task),
                tracker: job.options.tracker,
                ..Default::default()
            };
        });

        let processor =
            match Self::processor(&mut self.processors, &self.settings, &self.load_options, job.task) {
                Ok(processor) => processor,
                Err(err) => {
                    error!("❌ {:#}", err);
                    update_status(&self.status, |s| {
                        s.state = "errored".to_string();
                        s.message = Some(format!("{:#}", err));
                    });
                    return;
                }
            };

        let observed = self.status.clone();
        let session = Session::new(self.stop.clone()).with_observer(move |state, frames| {
            update_status(&observed, |s| {
                s.state = state.name().to_string();
                s.frames = frames;
            });
        });

        let result = session.run(&job.source, processor, &mut self.sink, &job.options);
        let caption = latest_frame(&self.sink.shared()).map(|p| p.caption);
        update_status(&self.status, |s| {
            s.caption = caption;
            match result {
                Ok(outcome) => {
                    s.state = outcome.state.name().to_string();
                    s.frames = outcome.frames;
                    if let SessionState::Failed(msg) = outcome.state {
                        s.message = Some(msg);
                    }
                }
                Err(err) => {
                    s.state = "errored".to_string();
                    s.message = Some(err.to_string());
                }
            }
        });
    }
}

/// 运行中的网页服务 (HTTP 线程 + 会话线程)
pub struct WebServer {
    shutdown: Option<oneshot::Sender<()>>,
    http: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
    stop: StopFlag,
}

impl WebServer {
    /// 阻塞直到 HTTP 服务退出
    pub fn wait(mut self) {
        if let Some(http) = self.http.take() {
            let _ = http.join();
        }
        self.stop.raise();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    /// 通知服务停止并等待线程退出
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.wait();
    }
}

/// 启动会话线程和 HTTP 线程
pub fn serve(settings: Settings, worker_options: LoadOptions, host: &str, port: u16) -> Result<WebServer> {
    let settings = Arc::new(settings);
    let latest: SharedFrame = Arc::new(Mutex::new(None));
    let status: SharedStatus = Arc::new(Mutex::new(StatusSnapshot::default()));
    let stop = StopFlag::new();
    let busy = Arc::new(AtomicBool::new(false));
    let (jobs_tx, jobs_rx) = bounded::<Job>(1);

    // 启动时先加载检测模型, 路径错误立即退出
    let mut worker = SessionWorker::new(
        settings.clone(),
        worker_options,
        WebPlaceholder::new(latest.clone(), settings.jpeg_quality),
        status.clone(),
        stop.clone(),
        busy.clone(),
    );
    worker.preload(ModelKind::Detection)?;

    let worker = std::thread::Builder::new()
        .name("yolov8-session".into())
        .spawn(move || worker.run(jobs_rx))
        .context("Failed to spawn session worker thread")?;

    let state = ServerState::new(settings, latest, status, stop.clone(), busy, jobs_tx);
    let host = host.to_string();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
    let addr = format!("{}:{}", host, port);

    let http = std::thread::Builder::new()
        .name("yolov8-http".into())
        .spawn(move || {
            if let Err(err) = actix_web::rt::System::new().block_on(async move {
                let bound = HttpServer::new(move || {
                    App::new()
                        .app_data(web::Data::new(state.clone()))
                        .app_data(web::PayloadConfig::new(32 * 1024 * 1024))
                        .configure(configure)
                })
                .bind((host.as_str(), port));

                let server = match bound {
                    Ok(server) => {
                        let _ = ready_tx.send(Ok(()));
                        server.run()
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return Ok(());
                    }
                };

                let srv_handle = server.handle();
                actix_web::rt::spawn(async move {
                    let _ = shutdown_rx.await;
                    srv_handle.stop(true).await;
                });

                server.await
            }) {
                error!("HTTP server error: {err}");
            }
        })
        .context("Failed to spawn HTTP server thread")?;

    match ready_rx.recv() {
        Ok(Ok(())) => info!("🌐 网页界面: http://{}", addr),
        Ok(Err(err)) => {
            let _ = http.join();
            return Err(anyhow!("无法监听 {}: {}", addr, err));
        }
        Err(_) => return Err(anyhow!("HTTP 线程意外退出")),
    }

    Ok(WebServer {
        shutdown: Some(shutdown_tx),
        http: Some(http),
        worker: Some(worker),
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test};

    struct Harness {
        state: ServerState,
        jobs: Receiver<Job>,
    }

    fn harness() -> Harness {
        let (tx, rx) = bounded::<Job>(1);
        let state = ServerState::new(
            Arc::new(Settings::default()),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(StatusSnapshot::default())),
            StopFlag::new(),
            Arc::new(AtomicBool::new(false)),
            tx,
        );
        Harness { state, jobs: rx }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(64, 36, image::Rgb([90, 90, 90]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    /// 使用假模型的会话线程, 与 harness 共享状态
    fn worker(state: &ServerState) -> SessionWorker {
        use crate::models::tests::FixedModel;
        use crate::models::{Bbox, ModelHandle};

        let mut worker = SessionWorker::new(
            state.settings.clone(),
            LoadOptions::default(),
            WebPlaceholder::new(state.latest.clone(), 80),
            state.status.clone(),
            state.stop.clone(),
            state.busy.clone(),
        );
        let model = FixedModel::new(vec![Bbox::new(5., 5., 20., 20., 0, 0.9)]);
        worker.processors.insert(
            ModelKind::Detection,
            FrameProcessor::new(ModelHandle::new(Box::new(model)), Plotter::without_font()),
        );
        worker
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_settings_lists_sources_and_presets() {
        let h = harness();
        let app = app!(h.state);
        let req = test::TestRequest::get().uri("/api/settings").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["sources"], serde_json::json!(["Image", "Video", "Webcam"]));
        assert_eq!(body["trackers"], serde_json::json!(["bytetrack.yaml", "botsort.yaml"]));
        assert_eq!(body["videos"].as_array().map(|v| v.len()), Some(5));
    }

    #[actix_web::test]
    async fn test_detect_video_queues_tracking_job() {
        let h = harness();
        let app = app!(h.state);
        let req = test::TestRequest::post()
            .uri("/api/detect")
            .set_json(serde_json::json!({
                "source": "Video",
                "video": "video_2",
                "task": "segmentation",
                "confidence": 0.5,
                "tracker": "botsort.yaml"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let job = h.jobs.try_recv().unwrap();
        assert!(matches!(&job.source, Source::Video(p) if p.ends_with("videos/video_2.mp4")));
        assert_eq!(job.task, ModelKind::Segmentation);
        assert_eq!(job.options, ProcessOptions::track(0.5, TrackerPreset::BotSort));
    }

    #[actix_web::test]
    async fn test_second_trigger_while_busy_is_rejected() {
        let h = harness();
        let app = app!(h.state);
        let body = serde_json::json!({ "source": "Webcam" });
        let first = test::TestRequest::post().uri("/api/detect").set_json(&body).to_request();
        assert_eq!(test::call_service(&app, first).await.status(), StatusCode::ACCEPTED);
        let second = test::TestRequest::post().uri("/api/detect").set_json(&body).to_request();
        assert_eq!(test::call_service(&app, second).await.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn test_unknown_video_is_bad_request() {
        let h = harness();
        let app = app!(h.state);
        let req = test::TestRequest::post()
            .uri("/api/detect")
            .set_json(serde_json::json!({ "source": "Video", "video": "video_99" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
        assert!(!h.state.busy.load(Ordering::SeqCst));
    }

    #[actix_web::test]
    async fn test_image_upload_uses_body_and_no_tracker() {
        let h = harness();
        let app = app!(h.state);
        let req = test::TestRequest::post()
            .uri("/api/detect/image?task=detection&confidence=0.3")
            .set_payload(vec![1u8, 2, 3])
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        let job = h.jobs.try_recv().unwrap();
        assert!(matches!(&job.source, Source::Image(ImageInput::Bytes(b)) if b.len() == 3));
        assert_eq!(job.options.tracker, None);
        assert_eq!(job.options.confidence, 0.3);
    }

    #[actix_web::test]
    async fn test_frame_is_empty_until_first_show() {
        let h = harness();
        let app = app!(h.state);
        let req = test::TestRequest::get().uri("/frame.jpg").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::get().uri("/api/status").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["state"], "idle");
    }

    #[actix_web::test]
    async fn test_stop_while_queued_cancels_the_queued_job() {
        let h = harness();
        let app = app!(h.state);
        let mut worker = worker(&h.state);

        let req = test::TestRequest::post()
            .uri("/api/detect/image")
            .set_payload(png_bytes())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        let req = test::TestRequest::post().uri("/api/stop").to_request();
        test::call_service(&app, req).await;

        worker.handle(h.jobs.try_recv().unwrap());
        let status = h.state.status.lock().unwrap().clone();
        assert_eq!(status.state, "done");
        assert_eq!(status.frames, 0);
        assert!(h.state.latest.lock().unwrap().is_none());
    }

    #[actix_web::test]
    async fn test_new_submission_clears_previous_stop() {
        let h = harness();
        let app = app!(h.state);
        let mut worker = worker(&h.state);
        h.state.stop.raise();

        let req = test::TestRequest::post()
            .uri("/api/detect/image")
            .set_payload(png_bytes())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);
        assert!(!h.state.stop.is_raised());

        worker.handle(h.jobs.try_recv().unwrap());
        let status = h.state.status.lock().unwrap().clone();
        assert_eq!(status.state, "done");
        assert_eq!(status.frames, 1);
        assert_eq!(status.caption.as_deref(), Some("Detected Image"));
    }

    #[::core::prelude::v1::test]
    fn test_busy_cleared_when_session_panics() {
        let busy = Arc::new(AtomicBool::new(true));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _busy = BusyGuard(busy.clone());
            panic!("inference crashed");
        }));
        assert!(result.is_err());
        assert!(!busy.load(Ordering::SeqCst));
    }

    #[actix_web::test]
    async fn test_dead_worker_is_service_unavailable() {
        let h = harness();
        let app = app!(h.state);
        drop(h.jobs);
        let req = test::TestRequest::post()
            .uri("/api/detect")
            .set_json(serde_json::json!({ "source": "Webcam" }))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert!(!h.state.busy.load(Ordering::SeqCst));
    }

    #[actix_web::test]
    async fn test_stop_raises_flag_only_when_busy() {
        let h = harness();
        let app = app!(h.state);
        let req = test::TestRequest::post().uri("/api/stop").to_request();
        test::call_service(&app, req).await;
        assert!(!h.state.stop.is_raised());

        h.state.busy.store(true, Ordering::SeqCst);
        let req = test::TestRequest::post().uri("/api/stop").to_request();
        test::call_service(&app, req).await;
        assert!(h.state.stop.is_raised());
    }
}
