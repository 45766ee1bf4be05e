#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 命令行参数与配置文件
pub mod detection; // 目标跟踪
pub mod display; // 结果显示
pub mod html; // 网页界面
pub mod input; // 输入源 (图片 / 视频 / 摄像头)
pub mod models; // 模型接口与具体实现
pub mod ort_backend;
pub mod plot; // 结果绘制
pub mod processor; // 单帧处理
pub mod server; // HTTP 服务
pub mod session; // 检测会话

pub use crate::config::{Args, CliArgs, Settings};
pub use crate::models::{load_model, Bbox, DetectionResult, Model, ModelHandle, ModelKind, YOLOv8};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP, YOLOTask};

/// 推理前统一缩放的宽度
pub const INF_WIDTH: u32 = 720;
/// 推理前统一缩放的高度 (720 * 9 / 16)
pub const INF_HEIGHT: u32 = 405;

/// 非极大值抑制, 每项附带可选的掩码系数
pub fn non_max_suppression(xs: &mut Vec<(Bbox, Option<Vec<f32>>)>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.0.confidence().total_cmp(&b1.0.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].0.iou(&xs[index].0);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}
