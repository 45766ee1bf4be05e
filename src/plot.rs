// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 结果绘制: 掩码 → 边界框 → 标签
// 跟踪目标按 track_id 着色, 其余按类别着色

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{debug, warn};

use crate::detection::id_to_color;
use crate::models::{Bbox, Prediction};

/// 预定义颜色表
const PALETTE: [(u8, u8, u8); 10] = [
    (255, 64, 64),   // 红色
    (64, 255, 64),   // 绿色
    (64, 64, 255),   // 蓝色
    (255, 255, 64),  // 黄色
    (255, 64, 255),  // 品红
    (64, 255, 255),  // 青色
    (255, 128, 0),   // 橙色
    (128, 0, 255),   // 紫色
    (255, 128, 192), // 粉色
    (128, 255, 128), // 浅绿
];

/// 系统字体候选
const FONT_CANDIDATES: [&str; 6] = [
    "C:\\Windows\\Fonts\\arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
];

pub struct Plotter {
    font: Option<FontVec>,
    line_width: u32,
    font_scale: f32,
    mask_alpha: f32,
}

impl Plotter {
    /// 加载字体; 找不到字体时只画框不写字
    pub fn new(font_path: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = font_path
            .map(Path::to_path_buf)
            .into_iter()
            .chain(FONT_CANDIDATES.iter().map(PathBuf::from))
            .collect();

        let font = candidates.iter().find_map(|path| {
            let bytes = std::fs::read(path).ok()?;
            match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    debug!("🔤 标签字体: {}", path.display());
                    Some(font)
                }
                Err(e) => {
                    warn!("⚠️ 字体无效 {}: {}", path.display(), e);
                    None
                }
            }
        });
        if font.is_none() {
            warn!("⚠️ 未找到可用字体, 结果图上不显示标签文字");
        }

        Self {
            font,
            ..Self::without_font()
        }
    }

    pub fn without_font() -> Self {
        Self {
            font: None,
            line_width: 2,
            font_scale: 16.0,
            mask_alpha: 0.5,
        }
    }

    /// 绘制到推理输入图的副本上
    pub fn plot(&self, prediction: &Prediction) -> RgbImage {
        let mut canvas = prediction.image.clone();
        let Some(bboxes) = prediction.result.bboxes() else {
            return canvas;
        };

        if let Some(masks) = prediction.result.masks() {
            for (bbox, mask) in bboxes.iter().zip(masks) {
                self.draw_mask(&mut canvas, mask, Self::color(bbox));
            }
        }

        for bbox in bboxes {
            let color = Self::color(bbox);
            self.draw_box(&mut canvas, bbox, color);
            let label = Self::label(prediction, bbox);
            self.draw_label(&mut canvas, bbox, &label, color);
        }
        canvas
    }

    /// 标签文字: "id:3 person 0.87"
    pub fn label(prediction: &Prediction, bbox: &Bbox) -> String {
        let name = prediction.class_name(bbox.id());
        match bbox.track_id() {
            Some(id) => format!("id:{} {} {:.2}", id, name, bbox.confidence()),
            None => format!("{} {:.2}", name, bbox.confidence()),
        }
    }

    fn color(bbox: &Bbox) -> Rgb<u8> {
        let (r, g, b) = match bbox.track_id() {
            Some(id) => id_to_color(id),
            None => PALETTE[bbox.id() % PALETTE.len()],
        };
        Rgb([r, g, b])
    }

    fn draw_mask(&self, canvas: &mut RgbImage, mask: &[u8], color: Rgb<u8>) {
        if mask.len() != (canvas.width() * canvas.height()) as usize {
            warn!("⚠️ 掩码尺寸与图像不符, 跳过");
            return;
        }
        let alpha = self.mask_alpha;
        for (px, &m) in canvas.pixels_mut().zip(mask) {
            if m == 0 {
                continue;
            }
            for c in 0..3 {
                px.0[c] = (px.0[c] as f32 * (1.0 - alpha) + color.0[c] as f32 * alpha) as u8;
            }
        }
    }

    fn draw_box(&self, canvas: &mut RgbImage, bbox: &Bbox, color: Rgb<u8>) {
        let (w, h) = (canvas.width() as f32, canvas.height() as f32);
        let x1 = bbox.xmin().clamp(0.0, w - 1.0);
        let y1 = bbox.ymin().clamp(0.0, h - 1.0);
        let x2 = bbox.xmax().clamp(0.0, w - 1.0);
        let y2 = bbox.ymax().clamp(0.0, h - 1.0);

        for i in 0..self.line_width {
            let bw = (x2 - x1) as i32 - 2 * i as i32;
            let bh = (y2 - y1) as i32 - 2 * i as i32;
            if bw <= 0 || bh <= 0 {
                break;
            }
            let rect = Rect::at(x1 as i32 + i as i32, y1 as i32 + i as i32)
                .of_size(bw as u32, bh as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, bbox: &Bbox, label: &str, color: Rgb<u8>) {
        let Some(font) = self.font.as_ref() else {
            return;
        };
        let scale = PxScale::from(self.font_scale);
        let (tw, th) = text_size(scale, font, label);
        let (tw, th) = (tw + 4, th + 4);

        // 框上方放不下时放到框内
        let x = bbox.xmin().max(0.0) as i32;
        let y = if bbox.ymin() >= th as f32 {
            bbox.ymin() as i32 - th as i32
        } else {
            bbox.ymin().max(0.0) as i32
        };

        draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(tw, th), color);
        draw_text_mut(canvas, Rgb([255, 255, 255]), x + 2, y + 2, scale, font, label);
    }
}
