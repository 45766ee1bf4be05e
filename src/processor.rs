// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 单帧处理: 缩放到 720×405 → 检测/跟踪 → 绘制

use anyhow::{Context, Result};
use fast_image_resize as fr;
use image::DynamicImage;
use tracing::debug;

use crate::detection::TrackerPreset;
use crate::display::{AnnotatedFrame, DetectionSummary};
use crate::input::Frame;
use crate::models::{ModelHandle, Prediction};
use crate::plot::Plotter;
use crate::{INF_HEIGHT, INF_WIDTH};

/// 单帧处理参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessOptions {
    /// 置信度阈值, 原样传给模型 (不做范围检查)
    pub confidence: f32,
    /// 跟踪器预设, None 表示只做检测
    pub tracker: Option<TrackerPreset>,
    /// 跟踪时是否沿用上一帧的轨迹 (仅在 tracker 为 Some 时有意义)
    pub persist: bool,
}

impl ProcessOptions {
    pub fn detect(confidence: f32) -> Self {
        Self {
            confidence,
            tracker: None,
            persist: false,
        }
    }

    pub fn track(confidence: f32, preset: TrackerPreset) -> Self {
        Self {
            confidence,
            tracker: Some(preset),
            persist: true,
        }
    }
}

/// 帧处理接口
pub trait Process: Send {
    fn process(&mut self, frame: &Frame, options: &ProcessOptions) -> Result<AnnotatedFrame>;
}

pub struct FrameProcessor {
    model: ModelHandle,
    plotter: Plotter,
    resizer: fr::Resizer,
    last_detections: Vec<DetectionSummary>,
}

impl FrameProcessor {
    pub fn new(model: ModelHandle, plotter: Plotter) -> Self {
        Self {
            model,
            plotter,
            resizer: fr::Resizer::new(),
            last_detections: Vec::new(),
        }
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    /// 最近一帧的检测摘要
    pub fn last_detections(&self) -> &[DetectionSummary] {
        &self.last_detections
    }

    /// 最近邻缩放到固定的 720×405 (BGR 进, BGR 出)
    pub fn resize(&mut self, frame: &Frame) -> Result<Frame> {
        if frame.width == INF_WIDTH && frame.height == INF_HEIGHT {
            return Ok(frame.clone());
        }

        let src = fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
            .context("无法创建缩放源图像")?;
        let mut dst = fr::images::Image::new(INF_WIDTH, INF_HEIGHT, fr::PixelType::U8x3);
        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Nearest),
            )
            .context("缩放失败")?;

        Ok(Frame {
            data: dst.into_vec(),
            width: INF_WIDTH,
            height: INF_HEIGHT,
        })
    }

    fn summarize(prediction: &Prediction) -> Vec<DetectionSummary> {
        prediction
            .result
            .bboxes()
            .map(|bboxes| {
                bboxes
                    .iter()
                    .map(|b| DetectionSummary {
                        class_id: b.id(),
                        class: prediction.class_name(b.id()),
                        score: b.confidence(),
                        bbox: [b.xmin(), b.ymin(), b.xmax(), b.ymax()],
                        track_id: b.track_id(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Process for FrameProcessor {
    fn process(&mut self, frame: &Frame, options: &ProcessOptions) -> Result<AnnotatedFrame> {
        let resized = self.resize(frame)?;
        let image = DynamicImage::ImageRgb8(resized.to_rgb_image());

        let prediction = match options.tracker {
            Some(preset) => self
                .model
                .track(&image, options.confidence, options.persist, preset)?,
            None => self.model.predict(&image, options.confidence)?,
        };

        let plotted = self.plotter.plot(&prediction);
        let detections = Self::summarize(&prediction);
        debug!("🎯 本帧目标: {}", detections.len());
        self.last_detections = detections.clone();

        Ok(AnnotatedFrame {
            frame: Frame::from_rgb_image(&plotted),
            detections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::FixedModel;
    use crate::models::Bbox;

    fn processor(boxes: Vec<Bbox>) -> FrameProcessor {
        FrameProcessor::new(
            ModelHandle::new(Box::new(FixedModel::new(boxes))),
            Plotter::without_font(),
        )
    }

    #[test]
    fn test_resize_to_fixed_size() {
        let mut p = processor(vec![]);
        for (w, h) in [(1920, 1080), (64, 48), (720, 405), (405, 720)] {
            let out = p.resize(&Frame::filled(w, h, [1, 2, 3])).unwrap();
            assert_eq!((out.width, out.height), (720, 405));
            assert_eq!(out.data.len(), 720 * 405 * 3);
            assert_eq!(&out.data[..3], &[1, 2, 3]);
        }
    }

    #[test]
    fn test_process_outputs_720x405_with_summaries() {
        let model = FixedModel::new(vec![Bbox::new(10., 10., 50., 80., 0, 0.9)]);
        let seen = model.seen_sizes.clone();
        let mut p = FrameProcessor::new(ModelHandle::new(Box::new(model)), Plotter::without_font());
        let out = p
            .process(&Frame::filled(1280, 720, [0, 0, 0]), &ProcessOptions::detect(0.4))
            .unwrap();
        // 模型只看到缩放后的 720×405
        assert_eq!(*seen.lock().unwrap(), vec![(720, 405)]);
        assert_eq!((out.width(), out.height()), (720, 405));
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.detections[0].class, "person");
        assert_eq!(out.detections[0].track_id, None);
        assert_eq!(p.last_detections().len(), 1);
    }

    #[test]
    fn test_persist_only_set_for_tracking() {
        assert!(!ProcessOptions::detect(0.4).persist);
        let options = ProcessOptions::track(0.4, TrackerPreset::BotSort);
        assert!(options.persist);
        assert_eq!(options.tracker, Some(TrackerPreset::BotSort));
    }

    #[test]
    fn test_process_tracking_assigns_stable_ids() {
        let mut p = processor(vec![Bbox::new(10., 10., 50., 80., 1, 0.9)]);
        let options = ProcessOptions::track(0.25, TrackerPreset::ByteTrack);
        let frame = Frame::filled(640, 480, [0, 0, 0]);
        let a = p.process(&frame, &options).unwrap();
        let b = p.process(&frame, &options).unwrap();
        assert_eq!(a.detections[0].track_id, Some(1));
        assert_eq!(b.detections[0].track_id, Some(1));
        assert_eq!(b.detections[0].class, "car");
        assert_eq!(p.model().tracker_preset(), Some(TrackerPreset::ByteTrack));
    }
}
