// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! 跟踪器预设 - 界面上的 "bytetrack.yaml" / "botsort.yaml"

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 跟踪器预设
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackerPreset {
    #[serde(rename = "bytetrack.yaml")]
    ByteTrack,
    #[serde(rename = "botsort.yaml")]
    BotSort,
}

impl TrackerPreset {
    pub const ALL: [TrackerPreset; 2] = [TrackerPreset::ByteTrack, TrackerPreset::BotSort];

    pub fn name(&self) -> &'static str {
        match self {
            TrackerPreset::ByteTrack => "bytetrack.yaml",
            TrackerPreset::BotSort => "botsort.yaml",
        }
    }

    pub fn config(&self) -> TrackerConfig {
        match self {
            TrackerPreset::ByteTrack => TrackerConfig::bytetrack(),
            TrackerPreset::BotSort => TrackerConfig::botsort(),
        }
    }
}

impl fmt::Display for TrackerPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TrackerPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bytetrack.yaml" | "bytetrack" => Ok(TrackerPreset::ByteTrack),
            "botsort.yaml" | "botsort" => Ok(TrackerPreset::BotSort),
            other => Err(format!("未知的跟踪器预设: {}", other)),
        }
    }
}

/// 跟踪器参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    // === 检测分组 ===
    pub track_high_thresh: f32, // 第一轮匹配的高分阈值
    pub track_low_thresh: f32,  // 第二轮(救援)的低分阈值
    pub new_track_thresh: f32,  // 新建轨迹的最低分数

    // === 匹配 ===
    pub match_thresh: f32,           // 第一轮最大匹配代价 (1 - IOU)
    pub low_match_thresh: f32,       // 第二轮最大匹配代价
    pub unconfirmed_match_thresh: f32, // 未确认轨迹的最大匹配代价
    pub fuse_score: bool,            // 代价融合检测分数: 1 - IOU × score
    pub proximity_thresh: Option<f32>, // BoT-SORT 距离门限 (1 - IOU 超过即拒绝)

    // === 生命周期 ===
    pub track_buffer: u32, // 最大丢失帧数

    // === 卡尔曼滤波参数 ===
    pub kalman_process_noise: f32, // 过程噪声 q
    pub kalman_obs_noise: f32,     // 观测噪声 r
}

impl TrackerConfig {
    pub fn bytetrack() -> Self {
        Self {
            track_high_thresh: 0.25,
            track_low_thresh: 0.1,
            new_track_thresh: 0.25,
            match_thresh: 0.8,
            low_match_thresh: 0.5,
            unconfirmed_match_thresh: 0.7,
            fuse_score: true,
            proximity_thresh: None,
            track_buffer: 30,
            kalman_process_noise: 0.1,
            kalman_obs_noise: 0.5,
        }
    }

    pub fn botsort() -> Self {
        Self {
            proximity_thresh: Some(0.5),
            kalman_obs_noise: 1.0,
            ..Self::bytetrack()
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::bytetrack()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_names_roundtrip() {
        for preset in TrackerPreset::ALL {
            assert_eq!(preset.name().parse::<TrackerPreset>(), Ok(preset));
        }
        assert!("deepsort.yaml".parse::<TrackerPreset>().is_err());
    }

    #[test]
    fn test_preset_serde_uses_yaml_names() {
        let json = serde_json::to_string(&TrackerPreset::BotSort).unwrap();
        assert_eq!(json, "\"botsort.yaml\"");
        let back: TrackerPreset = serde_json::from_str("\"bytetrack.yaml\"").unwrap();
        assert_eq!(back, TrackerPreset::ByteTrack);
    }

    #[test]
    fn test_presets_differ() {
        assert_ne!(TrackerConfig::bytetrack(), TrackerConfig::botsort());
        assert_eq!(TrackerConfig::botsort().proximity_thresh, Some(0.5));
    }
}
