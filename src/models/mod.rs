// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 模型统一接口与实现
///
/// # 架构说明
///
/// - **Model trait**: 统一的模型接口, 标准流程 preprocess → run → postprocess
/// - **YOLOv8**: 完整实现 (检测 + 实例分割), 文件 `yolov8.rs`
/// - **ModelHandle**: 加载后的模型句柄, 对外只暴露 `predict` / `track` 两个入口,
///   跟踪器状态由句柄持有, 调用方只需在每次调用时传入 `persist`
///
/// ## 使用示例
/// ```no_run
/// use yolov8_web::models::{load_model, ModelKind, LoadOptions};
///
/// let mut model = load_model("weights/yolov8n.onnx", ModelKind::Detection, &LoadOptions::default())?;
/// let image = image::open("images/office_4.jpg")?;
/// let prediction = model.predict(&image, 0.4)?;
/// # anyhow::Ok(())
/// ```
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use image::{DynamicImage, RgbImage};
use ndarray::{Array, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detection::{ByteTracker, TrackerPreset};
use crate::{OrtEP, YOLOTask};

pub mod yolov8;

pub use yolov8::YOLOv8;

/// 单张图片的推理结果
#[derive(Clone, PartialEq, Default)]
pub struct DetectionResult {
    pub bboxes: Option<Vec<Bbox>>,
    /// 与 bboxes 一一对应的掩码 (原图尺寸, 单通道)
    pub masks: Option<Vec<Vec<u8>>>,
}

impl std::fmt::Debug for DetectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YOLOResult")
            .field("Bboxes", &self.bboxes)
            .field(
                "Masks",
                &format_args!("{:?}", self.masks().map(|masks| masks.len())),
            )
            .finish()
    }
}

impl DetectionResult {
    pub fn new(bboxes: Option<Vec<Bbox>>, masks: Option<Vec<Vec<u8>>>) -> Self {
        Self { bboxes, masks }
    }

    pub fn masks(&self) -> Option<&Vec<Vec<u8>>> {
        self.masks.as_ref()
    }

    pub fn bboxes(&self) -> Option<&Vec<Bbox>> {
        self.bboxes.as_ref()
    }

    pub fn len(&self) -> usize {
        self.bboxes.as_ref().map_or(0, |b| b.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    // a bounding box around an object
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    id: usize,
    confidence: f32,
    track_id: Option<u32>,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            id,
            confidence,
            track_id: None,
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn track_id(&self) -> Option<u32> {
        self.track_id
    }

    pub fn set_track_id(&mut self, track_id: Option<u32>) {
        self.track_id = track_id;
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = (self.xmin + self.width).min(another.xmin + another.width);
        let t = self.ymin.max(another.ymin);
        let b = (self.ymin + self.height).min(another.ymin + another.height);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// 模型种类 (界面上的 "Detection" / "Segmentation")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Detection,
    Segmentation,
}

impl ModelKind {
    pub fn task(&self) -> YOLOTask {
        match self {
            ModelKind::Detection => YOLOTask::Detect,
            ModelKind::Segmentation => YOLOTask::Segment,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::Detection => "Detection",
            ModelKind::Segmentation => "Segmentation",
        }
    }
}

/// 统一的深度学习模型接口
///
/// ## 核心流程
/// ```text
/// 原始图片 → preprocess → ndarray张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → 检测结果
/// ```
pub trait Model: Send {
    /// 预处理: 图片 → NCHW 张量
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 推理: 执行模型前向传播, 返回未解码的原始输出
    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>>;

    /// 后处理: 原始输出 → 检测结果 (坐标还原到 xs0 的尺寸)
    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>>;

    /// 完整的推理流程: preprocess → run → postprocess
    fn forward(&mut self, images: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        let xs = self.preprocess(images)?;
        let ys = self.run(xs, false)?;
        self.postprocess(ys, images)
    }

    /// 类别名称表
    fn names(&self) -> &[String];

    /// 打印模型信息
    fn summary(&self);

    /// 设置置信度阈值 (每次推理前由句柄设置)
    fn set_conf(&mut self, val: f32);
}

/// 模型加载参数
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub ep: OrtEP,
    pub iou: f32,
    pub profile: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            ep: OrtEP::CPU,
            iou: 0.45,
            profile: false,
        }
    }
}

/// 从权重文件加载模型
///
/// 文件缺失或权重损坏时直接返回错误, 不做任何恢复
pub fn load_model<P: AsRef<Path>>(
    path: P,
    kind: ModelKind,
    options: &LoadOptions,
) -> Result<ModelHandle> {
    let path = path.as_ref();
    info!("📦 加载{}模型: {}", kind.label(), path.display());
    let model = YOLOv8::new(path, kind.task(), options)?;
    if options.profile {
        model.summary();
    }
    Ok(ModelHandle::new(Box::new(model)))
}

/// 正在运行的跟踪器 (预设 + 状态)
struct ActiveTracker {
    preset: TrackerPreset,
    tracker: ByteTracker,
}

/// 已加载的模型句柄
///
/// `predict` 为逐帧无状态推理; `track` 在 `persist == true` 且预设不变时
/// 沿用上一次调用的跟踪器状态, 否则重新开始跟踪
pub struct ModelHandle {
    model: Box<dyn Model>,
    names: Arc<Vec<String>>,
    tracker: Option<ActiveTracker>,
}

impl ModelHandle {
    pub fn new(model: Box<dyn Model>) -> Self {
        let names = Arc::new(model.names().to_vec());
        Self {
            model,
            names,
            tracker: None,
        }
    }

    pub fn names(&self) -> &Arc<Vec<String>> {
        &self.names
    }

    /// 逐帧检测
    pub fn predict(&mut self, image: &DynamicImage, conf: f32) -> Result<Prediction> {
        self.model.set_conf(conf);
        let images = std::slice::from_ref(image);
        let result = self.model.forward(images)?.into_iter().next().unwrap_or_default();
        Ok(Prediction {
            image: image.to_rgb8(),
            result,
            names: self.names.clone(),
        })
    }

    /// 逐帧检测 + 跟踪
    ///
    /// 只保留本帧与轨迹关联成功的目标, 并写入 track_id
    pub fn track(
        &mut self,
        image: &DynamicImage,
        conf: f32,
        persist: bool,
        preset: TrackerPreset,
    ) -> Result<Prediction> {
        let mut prediction = self.predict(image, conf)?;

        let reuse = persist
            && self
                .tracker
                .as_ref()
                .is_some_and(|active| active.preset == preset);
        if !reuse {
            debug!("🎯 新建跟踪器: {}", preset.name());
            self.tracker = Some(ActiveTracker {
                preset,
                tracker: ByteTracker::new(preset.config()),
            });
        }

        if let Some(active) = self.tracker.as_mut() {
            prediction.result = active.tracker.assign(prediction.result);
        }
        Ok(prediction)
    }

    /// 当前跟踪器的预设 (未在跟踪时为 None)
    pub fn tracker_preset(&self) -> Option<TrackerPreset> {
        self.tracker.as_ref().map(|active| active.preset)
    }
}

/// 一次 predict/track 的完整输出: 推理输入图 + 结果 + 类别表
#[derive(Clone)]
pub struct Prediction {
    pub image: RgbImage,
    pub result: DetectionResult,
    pub names: Arc<Vec<String>>,
}

impl Prediction {
    pub fn class_name(&self, id: usize) -> String {
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", id))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 固定输出的假模型, 记录每次输入的图片尺寸
    pub(crate) struct FixedModel {
        pub boxes: Vec<Bbox>,
        pub conf: f32,
        pub seen_sizes: Arc<std::sync::Mutex<Vec<(u32, u32)>>>,
        names: Vec<String>,
    }

    impl FixedModel {
        pub(crate) fn new(boxes: Vec<Bbox>) -> Self {
            Self {
                boxes,
                conf: 0.25,
                seen_sizes: Default::default(),
                names: vec!["person".to_string(), "car".to_string()],
            }
        }
    }

    impl Model for FixedModel {
        fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>> {
            let mut seen = self.seen_sizes.lock().unwrap();
            for image in images {
                seen.push((image.width(), image.height()));
            }
            Ok(vec![])
        }

        fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, _profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
            Ok(xs)
        }

        fn postprocess(
            &self,
            _xs: Vec<Array<f32, IxDyn>>,
            xs0: &[DynamicImage],
        ) -> Result<Vec<DetectionResult>> {
            let boxes: Vec<Bbox> = self
                .boxes
                .iter()
                .filter(|b| b.confidence() >= self.conf)
                .cloned()
                .collect();
            Ok(xs0
                .iter()
                .map(|_| DetectionResult::new(Some(boxes.clone()), None))
                .collect())
        }

        fn names(&self) -> &[String] {
            &self.names
        }

        fn summary(&self) {}

        fn set_conf(&mut self, val: f32) {
            self.conf = val;
        }
    }

    fn image() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(720, 405))
    }

    #[test]
    fn test_predict_applies_confidence() {
        let model = FixedModel::new(vec![
            Bbox::new(10., 10., 50., 80., 0, 0.9),
            Bbox::new(200., 10., 50., 80., 1, 0.3),
        ]);
        let mut handle = ModelHandle::new(Box::new(model));
        assert_eq!(handle.predict(&image(), 0.5).unwrap().result.len(), 1);
        assert_eq!(handle.predict(&image(), 0.1).unwrap().result.len(), 2);
    }

    #[test]
    fn test_track_keeps_ids_when_persisting() {
        let model = FixedModel::new(vec![Bbox::new(10., 10., 50., 80., 0, 0.9)]);
        let mut handle = ModelHandle::new(Box::new(model));
        let first = handle.track(&image(), 0.25, true, TrackerPreset::ByteTrack).unwrap();
        let second = handle.track(&image(), 0.25, true, TrackerPreset::ByteTrack).unwrap();
        let id1 = first.result.bboxes().unwrap()[0].track_id();
        let id2 = second.result.bboxes().unwrap()[0].track_id();
        assert!(id1.is_some());
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_track_resets_without_persist() {
        let model = FixedModel::new(vec![Bbox::new(10., 10., 50., 80., 0, 0.9)]);
        let mut handle = ModelHandle::new(Box::new(model));
        handle.track(&image(), 0.25, true, TrackerPreset::ByteTrack).unwrap();
        handle.track(&image(), 0.25, true, TrackerPreset::ByteTrack).unwrap();
        let fresh = handle.track(&image(), 0.25, false, TrackerPreset::ByteTrack).unwrap();
        assert_eq!(fresh.result.bboxes().unwrap()[0].track_id(), Some(1));
    }

    #[test]
    fn test_track_resets_on_preset_change() {
        let model = FixedModel::new(vec![Bbox::new(10., 10., 50., 80., 0, 0.9)]);
        let mut handle = ModelHandle::new(Box::new(model));
        handle.track(&image(), 0.25, true, TrackerPreset::ByteTrack).unwrap();
        handle.track(&image(), 0.25, true, TrackerPreset::BotSort).unwrap();
        assert_eq!(handle.tracker_preset(), Some(TrackerPreset::BotSort));
    }

    #[test]
    fn test_iou_identical_boxes() {
        let a = Bbox::new(0., 0., 10., 10., 0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }
}
