// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 完整模型实现
// 包含: 模型加载、预处理、推理、后处理 (检测 / 实例分割)

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GenericImageView, ImageBuffer};
use ndarray::{s, Array, Axis, IxDyn};
use tracing::{debug, info};

use super::{Bbox, DetectionResult, LoadOptions, Model};
use crate::{non_max_suppression, OrtBackend, OrtConfig, OrtEP, YOLOTask};

/// YOLOv8 完整模型结构
pub struct YOLOv8 {
    engine: OrtBackend,
    nc: u32,
    nm: u32,
    height: u32,
    width: u32,
    task: YOLOTask,
    conf: f32,
    iou: f32,
    names: Vec<String>,
    profile: bool,
}

impl YOLOv8 {
    /// 从权重文件创建 YOLOv8 模型
    pub fn new(path: &Path, task: YOLOTask, options: &LoadOptions) -> Result<Self> {
        let engine = OrtBackend::build(OrtConfig {
            f: path.to_path_buf(),
            task,
            ep: options.ep,
            image_size: (None, None),
        })?;

        let (height, width) = (engine.height(), engine.width());
        let nc = engine
            .nc()
            .context("无法从模型获取类别数 (num_classes)")?;
        let nm = match task {
            YOLOTask::Segment => engine
                .nm()
                .context("分割模型缺少 protos 输出, 无法获取 num_masks")?,
            YOLOTask::Detect => 0,
        };

        // class names
        let names = engine
            .names()
            .unwrap_or_else(|| (0..nc).map(|i| format!("class{}", i)).collect());

        info!(
            "✅ YOLOv8 模型加载成功: {:?} {}x{} nc={} nm={}",
            task, width, height, nc, nm
        );

        Ok(Self {
            engine,
            names,
            conf: 0.25,
            iou: options.iou,
            profile: options.profile,
            nc,
            nm,
            height,
            width,
            task,
        })
    }

    fn scale_wh(&self, w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
        let r = (w1 / w0).min(h1 / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    /// letterbox 到模型输入尺寸 (左上对齐, 灰色填充)
    pub fn preprocess(&mut self, xs: &[DynamicImage]) -> Result<Array<f32, IxDyn>> {
        let mut ys =
            Array::ones((xs.len(), 3, self.height() as usize, self.width() as usize)).into_dyn();
        ys.fill(144.0 / 255.0);
        for (idx, x) in xs.iter().enumerate() {
            let (w0, h0) = x.dimensions();
            let (_, w_new, h_new) =
                self.scale_wh(w0 as f32, h0 as f32, self.width() as f32, self.height() as f32);
            let img = x.resize_exact(
                w_new as u32,
                h_new as u32,
                match self.task {
                    YOLOTask::Segment => image::imageops::FilterType::CatmullRom,
                    YOLOTask::Detect => image::imageops::FilterType::Triangle,
                },
            );

            for (x, y, rgb) in img.pixels() {
                let x = x as usize;
                let y = y as usize;
                let [r, g, b, _] = rgb.0;
                ys[[idx, 0, y, x]] = (r as f32) / 255.0;
                ys[[idx, 1, y, x]] = (g as f32) / 255.0;
                ys[[idx, 2, y, x]] = (b as f32) / 255.0;
            }
        }

        Ok(ys)
    }

    pub fn run(&mut self, xs: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        let t_pre = std::time::Instant::now();
        let xs_ = self.preprocess(xs)?;
        if self.profile {
            debug!("[Model Preprocess]: {:?}", t_pre.elapsed());
        }

        let t_run = std::time::Instant::now();
        let ys = self.engine.run(xs_, self.profile)?;
        if self.profile {
            debug!("[Model Inference]: {:?}", t_run.elapsed());
        }

        let t_post = std::time::Instant::now();
        let ys = self.postprocess(ys, xs)?;
        if self.profile {
            debug!("[Model Postprocess]: {:?}", t_post.elapsed());
        }

        Ok(ys)
    }

    pub fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>> {
        const CXYWH_OFFSET: usize = 4;
        let preds = xs.first().context("模型没有输出")?;
        let protos = xs.get(1);
        let nc = self.nc as usize;
        let nm = self.nm as usize;

        let mut ys = Vec::new();
        for (idx, anchor) in preds.axis_iter(Axis(0)).enumerate() {
            let x0 = xs0
                .get(idx)
                .ok_or_else(|| anyhow!("输出批次 {} 没有对应的输入图片", idx))?;
            let width_original = x0.width() as f32;
            let height_original = x0.height() as f32;
            let ratio =
                (self.width() as f32 / width_original).min(self.height() as f32 / height_original);

            let mut data: Vec<(Bbox, Option<Vec<f32>>)> = Vec::new();
            for pred in anchor.axis_iter(Axis(1)) {
                let bbox = pred.slice(s![0..CXYWH_OFFSET]);
                let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);
                let coefs = match self.task {
                    YOLOTask::Segment => Some(pred.slice(s![pred.len() - nm..]).to_vec()),
                    YOLOTask::Detect => None,
                };

                let Some((id, &confidence)) = clss
                    .into_iter()
                    .enumerate()
                    .reduce(|max, x| if x.1 > max.1 { x } else { max })
                else {
                    continue;
                };

                if confidence < self.conf {
                    continue;
                }

                let cx = bbox[0] / ratio;
                let cy = bbox[1] / ratio;
                let w = bbox[2] / ratio;
                let h = bbox[3] / ratio;
                let x = cx - w / 2.;
                let y = cy - h / 2.;
                let y_bbox = Bbox::new(
                    x.max(0.0f32).min(width_original),
                    y.max(0.0f32).min(height_original),
                    w,
                    h,
                    id,
                    confidence,
                );

                data.push((y_bbox, coefs));
            }

            non_max_suppression(&mut data, self.iou);

            let mut y_bboxes: Vec<Bbox> = Vec::new();
            let mut y_masks: Vec<Vec<u8>> = Vec::new();
            for (bbox, coefs) in data.into_iter() {
                if let (Some(coefs), Some(protos)) = (coefs, protos) {
                    y_masks.push(self.decode_mask(
                        protos,
                        idx,
                        coefs,
                        &bbox,
                        width_original,
                        height_original,
                    )?);
                }
                y_bboxes.push(bbox);
            }

            ys.push(DetectionResult {
                bboxes: if !y_bboxes.is_empty() {
                    Some(y_bboxes)
                } else {
                    None
                },
                masks: if !y_masks.is_empty() {
                    Some(y_masks)
                } else {
                    None
                },
            });
        }

        Ok(ys)
    }

    /// 掩码系数 × protos → 原图尺寸的单通道掩码 (框外清零)
    fn decode_mask(
        &self,
        protos: &Array<f32, IxDyn>,
        idx: usize,
        coefs: Vec<f32>,
        bbox: &Bbox,
        width_original: f32,
        height_original: f32,
    ) -> Result<Vec<u8>> {
        let proto = protos.slice(s![idx, .., .., ..]);
        let (nm, nh, nw) = proto.dim();

        let coefs = Array::from_shape_vec((1, nm), coefs)?;
        let proto = proto.to_owned();
        let proto = proto.to_shape((nm, nh * nw))?;
        let mask = coefs.dot(&proto);
        let mask = mask.to_shape((nh, nw, 1))?;

        let mask_im: ImageBuffer<image::Luma<_>, Vec<f32>> = ImageBuffer::from_raw(
            nw as u32,
            nh as u32,
            mask.to_owned().into_raw_vec_and_offset().0,
        )
        .context("can not create image from ndarray")?;
        let mut mask_im = image::DynamicImage::from(mask_im);

        let (_, w_mask, h_mask) =
            self.scale_wh(width_original, height_original, nw as f32, nh as f32);
        let mask_cropped = mask_im.crop(0, 0, w_mask as u32, h_mask as u32);
        let mask_original = mask_cropped.resize_exact(
            width_original as u32,
            height_original as u32,
            image::imageops::FilterType::CatmullRom,
        );

        let mut mask_original_cropped = mask_original.into_luma8();
        for y in 0..height_original as usize {
            for x in 0..width_original as usize {
                if x < bbox.xmin() as usize
                    || x > bbox.xmax() as usize
                    || y < bbox.ymin() as usize
                    || y > bbox.ymax() as usize
                {
                    mask_original_cropped.put_pixel(x as u32, y as u32, image::Luma([0u8]));
                }
            }
        }
        Ok(mask_original_cropped.into_raw())
    }

    pub fn summary(&self) {
        info!(
            "\nSummary:\n\
            > Task: {:?}{}\n\
            > EP: {:?} {}\n\
            > Height: {} ({}), Width: {} ({})\n\
            > nc: {}, nm: {}, conf: {}, iou: {}\n",
            self.task,
            match self.engine.author().zip(self.engine.version()) {
                Some((author, ver)) => format!(" ({} {})", author, ver),
                None => String::from(""),
            },
            self.engine.ep(),
            if let OrtEP::CPU = self.engine.ep() {
                ""
            } else {
                "(May still fall back to CPU)"
            },
            self.height(),
            if self.engine.is_height_dynamic() {
                "Dynamic"
            } else {
                "Const"
            },
            self.width(),
            if self.engine.is_width_dynamic() {
                "Dynamic"
            } else {
                "Const"
            },
            self.nc,
            self.nm,
            self.conf,
            self.iou,
        );
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

// 实现统一的 Model trait
impl Model for YOLOv8 {
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>> {
        let batch = YOLOv8::preprocess(self, images)?;
        Ok(vec![batch])
    }

    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let x = xs.into_iter().next().context("没有可推理的输入张量")?;
        self.engine.run(x, profile)
    }

    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>> {
        YOLOv8::postprocess(self, xs, xs0)
    }

    fn forward(&mut self, images: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        YOLOv8::run(self, images)
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn summary(&self) {
        YOLOv8::summary(self)
    }

    fn set_conf(&mut self, val: f32) {
        self.conf = val;
    }
}
