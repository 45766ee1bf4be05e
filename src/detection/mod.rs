// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 目标跟踪 (Tracking)
///
/// - preset:    界面可选的跟踪器预设 (bytetrack.yaml / botsort.yaml)
/// - tracker:   卡尔曼滤波与 IOU 等公共组件
/// - bytetrack: 轨迹关联 (ByteTrack, BoT-SORT 门限)
pub mod bytetrack;
pub mod preset;
pub mod tracker;

pub use bytetrack::{ByteTracker, STrack};
pub use preset::{TrackerConfig, TrackerPreset};
pub use tracker::{compute_iou, id_to_color, BBox, KalmanBoxFilter};
