// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
//! ByteTrack 算法实现
//! ByteTrack: Simple and effective multi-object tracking
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先与 已确认+丢失 的轨迹匹配 (IOU)
//! 3. 低分框救援未匹配的活跃轨迹
//! 4. 新轨迹需要第二帧确认 (首帧除外)
//!
//! BoT-SORT 预设在此基础上增加距离门限, 并使用更大的观测噪声

use tracing::debug;

use super::preset::TrackerConfig;
use super::tracker::{compute_iou, BBox, KalmanBoxFilter};
use crate::models::{Bbox, DetectionResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrackState {
    Tracked,
    Lost,
}

/// 单条轨迹
#[derive(Clone, Debug)]
pub struct STrack {
    /// 唯一跟踪ID
    pub id: u32,

    /// 当前边界框 (卡尔曼滤波平滑后)
    pub bbox: BBox,

    kalman: KalmanBoxFilter,

    state: TrackState,

    /// 是否已确认 (未确认的轨迹不输出)
    activated: bool,

    /// 连续丢失帧数
    pub frames_lost: u32,

    /// 最近一次匹配的检测分数
    pub score: f32,
}

impl STrack {
    fn new(id: u32, det: &BBox, config: &TrackerConfig, activated: bool) -> Self {
        let kalman =
            KalmanBoxFilter::new(det, config.kalman_process_noise, config.kalman_obs_noise);
        Self {
            id,
            bbox: kalman.get_state_bbox(),
            kalman,
            state: TrackState::Tracked,
            activated,
            frames_lost: 0,
            score: det.confidence,
        }
    }

    fn predict(&mut self) {
        self.kalman.predict();
        self.bbox = self.kalman.get_state_bbox();
    }

    fn update(&mut self, det: &BBox) {
        self.kalman.update(det);
        self.bbox = self.kalman.get_state_bbox();
        self.state = TrackState::Tracked;
        self.activated = true;
        self.frames_lost = 0;
        self.score = det.confidence;
    }

    fn mark_lost(&mut self) {
        self.state = TrackState::Lost;
    }

    fn predicted_bbox(&self) -> BBox {
        self.kalman.get_predicted_bbox()
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    config: TrackerConfig,

    /// 已确认 + 丢失的轨迹
    tracks: Vec<STrack>,

    /// 只出现过一次, 等待确认的轨迹
    unconfirmed: Vec<STrack>,

    /// 下一个分配的ID
    next_id: u32,

    /// 已处理的帧数
    frame_id: u64,
}

impl ByteTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            unconfirmed: Vec::new(),
            next_id: 1,
            frame_id: 0,
        }
    }

    /// 关联一帧的检测结果
    ///
    /// 返回值只保留与已确认轨迹关联的检测框 (及对应掩码), 并写入 track_id
    pub fn assign(&mut self, result: DetectionResult) -> DetectionResult {
        let DetectionResult { bboxes, masks } = result;
        let bboxes = bboxes.unwrap_or_default();
        let dets: Vec<BBox> = bboxes.iter().map(BBox::from).collect();

        let ids = self.update(&dets);

        let mut out_boxes: Vec<Bbox> = Vec::new();
        let mut out_masks: Vec<Vec<u8>> = Vec::new();
        let mut masks = masks.map(|m| m.into_iter().map(Some).collect::<Vec<_>>());
        for (idx, (mut bbox, id)) in bboxes.into_iter().zip(ids).enumerate() {
            let Some(id) = id else {
                continue;
            };
            bbox.set_track_id(Some(id));
            out_boxes.push(bbox);
            if let Some(mask) = masks.as_mut().and_then(|m| m.get_mut(idx)).and_then(Option::take) {
                out_masks.push(mask);
            }
        }

        DetectionResult::new(
            (!out_boxes.is_empty()).then_some(out_boxes),
            (!out_masks.is_empty()).then_some(out_masks),
        )
    }

    /// 更新跟踪, 返回每个检测框对应的轨迹ID (未输出的为 None)
    pub fn update(&mut self, detections: &[BBox]) -> Vec<Option<u32>> {
        self.frame_id += 1;
        let mut det_ids: Vec<Option<u32>> = vec![None; detections.len()];

        // 1. 所有轨迹先预测
        for track in self.tracks.iter_mut().chain(self.unconfirmed.iter_mut()) {
            track.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets: Vec<usize> = Vec::new();
        let mut low_dets: Vec<usize> = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.config.track_high_thresh {
                high_dets.push(idx);
            } else if det.confidence > self.config.track_low_thresh {
                low_dets.push(idx);
            }
        }

        let mut matched_track = vec![false; self.tracks.len()];

        // 3. 第一轮: 高分检测 × (已确认 + 丢失) 轨迹
        let pool: Vec<usize> = (0..self.tracks.len()).collect();
        let assignments = self.match_detections(
            detections,
            &high_dets,
            &self.tracks,
            &pool,
            self.config.match_thresh,
            self.config.fuse_score,
        );
        for &(det_idx, track_idx) in &assignments {
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
            det_ids[det_idx] = Some(self.tracks[track_idx].id);
        }
        let mut remaining_high: Vec<usize> = high_dets
            .into_iter()
            .filter(|idx| !assignments.iter().any(|(d, _)| d == idx))
            .collect();

        // 4. 第二轮: 低分检测 × 未匹配的活跃轨迹 (救援)
        let r_tracked: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx] && self.tracks[idx].state == TrackState::Tracked)
            .collect();
        let low_assignments = self.match_detections(
            detections,
            &low_dets,
            &self.tracks,
            &r_tracked,
            self.config.low_match_thresh,
            false,
        );
        for &(det_idx, track_idx) in &low_assignments {
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx]);
            det_ids[det_idx] = Some(self.tracks[track_idx].id);
        }

        // 5. 未匹配的活跃轨迹 → 丢失
        for (track, &matched) in self.tracks.iter_mut().zip(&matched_track) {
            if !matched {
                if track.state == TrackState::Tracked {
                    track.mark_lost();
                }
                track.frames_lost += 1;
            }
        }

        // 6. 未确认轨迹 × 剩余高分检测; 未匹配的直接删除
        let unconfirmed_pool: Vec<usize> = (0..self.unconfirmed.len()).collect();
        let unconfirmed_assignments = self.match_detections(
            detections,
            &remaining_high,
            &self.unconfirmed,
            &unconfirmed_pool,
            self.config.unconfirmed_match_thresh,
            self.config.fuse_score,
        );
        let mut confirmed = Vec::new();
        for &(det_idx, track_idx) in &unconfirmed_assignments {
            let mut track = self.unconfirmed[track_idx].clone();
            track.update(&detections[det_idx]);
            det_ids[det_idx] = Some(track.id);
            confirmed.push(track);
        }
        remaining_high.retain(|idx| !unconfirmed_assignments.iter().any(|(d, _)| d == idx));
        self.unconfirmed.clear();
        self.tracks.extend(confirmed);

        // 7. 剩余高分检测 → 新建轨迹 (首帧直接确认)
        let first_frame = self.frame_id == 1;
        for det_idx in remaining_high {
            let det = &detections[det_idx];
            if det.confidence < self.config.new_track_thresh {
                continue;
            }
            let track = STrack::new(self.next_id, det, &self.config, first_frame);
            self.next_id += 1;
            if first_frame {
                det_ids[det_idx] = Some(track.id);
                self.tracks.push(track);
            } else {
                self.unconfirmed.push(track);
            }
        }

        // 8. 删除丢失太久的轨迹
        let buffer = self.config.track_buffer;
        self.tracks.retain(|t| t.frames_lost <= buffer);

        debug!("{}", self.get_stats());
        det_ids
    }

    /// IOU 贪心匹配, 返回 (检测下标, 轨迹下标)
    fn match_detections(
        &self,
        detections: &[BBox],
        det_indices: &[usize],
        tracks: &[STrack],
        track_indices: &[usize],
        max_cost: f32,
        fuse_score: bool,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for &det_idx in det_indices {
            let det = &detections[det_idx];
            for &track_idx in track_indices {
                let iou = compute_iou(det, &tracks[track_idx].predicted_bbox());
                if iou <= 0.0 {
                    continue;
                }
                // BoT-SORT 距离门限
                if let Some(proximity) = self.config.proximity_thresh {
                    if 1.0 - iou > proximity {
                        continue;
                    }
                }
                let cost = if fuse_score {
                    1.0 - iou * det.confidence
                } else {
                    1.0 - iou
                };
                if cost <= max_cost {
                    candidates.push((cost, det_idx, track_idx));
                }
            }
        }

        // 贪心匹配: 按代价排序
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut assignments: Vec<(usize, usize)> = Vec::new();
        for (_, det_idx, track_idx) in candidates {
            if assignments
                .iter()
                .all(|&(d, t)| d != det_idx && t != track_idx)
            {
                assignments.push((det_idx, track_idx));
            }
        }
        assignments
    }

    /// 当前已确认的轨迹
    pub fn tracks(&self) -> impl Iterator<Item = &STrack> {
        self.tracks.iter().filter(|t| t.state == TrackState::Tracked)
    }

    /// 获取跟踪统计信息
    pub fn get_stats(&self) -> String {
        format!(
            "跟踪: {} 条 | 待确认: {} | 总ID: {}",
            self.tracks().count(),
            self.unconfirmed.len(),
            self.next_id - 1
        )
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, conf: f32) -> Bbox {
        Bbox::new(x, y, 40., 80., 0, conf)
    }

    fn ids(result: &DetectionResult) -> Vec<Option<u32>> {
        result
            .bboxes()
            .map(|b| b.iter().map(|b| b.track_id()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_first_frame_tracks_are_activated() {
        let mut tracker = ByteTracker::default();
        let out = tracker.assign(DetectionResult::new(
            Some(vec![det(10., 10., 0.9), det(300., 10., 0.8)]),
            None,
        ));
        assert_eq!(ids(&out), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_ids_stable_across_small_motion() {
        let mut tracker = ByteTracker::default();
        tracker.assign(DetectionResult::new(Some(vec![det(10., 10., 0.9)]), None));
        for step in 1..10 {
            let out = tracker.assign(DetectionResult::new(
                Some(vec![det(10. + step as f32 * 2., 10., 0.9)]),
                None,
            ));
            assert_eq!(ids(&out), vec![Some(1)]);
        }
    }

    #[test]
    fn test_new_track_needs_confirmation_after_first_frame() {
        let mut tracker = ByteTracker::default();
        tracker.assign(DetectionResult::new(Some(vec![det(10., 10., 0.9)]), None));

        let second = DetectionResult::new(
            Some(vec![det(10., 10., 0.9), det(400., 200., 0.9)]),
            None,
        );
        let out = tracker.assign(second.clone());
        assert_eq!(ids(&out), vec![Some(1)]);

        let out = tracker.assign(second);
        assert_eq!(ids(&out), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_low_score_detection_rescues_track() {
        let mut tracker = ByteTracker::default();
        tracker.assign(DetectionResult::new(Some(vec![det(10., 10., 0.9)]), None));
        let out = tracker.assign(DetectionResult::new(Some(vec![det(11., 10., 0.2)]), None));
        assert_eq!(ids(&out), vec![Some(1)]);
    }

    #[test]
    fn test_lost_track_recovers_id() {
        let mut tracker = ByteTracker::default();
        tracker.assign(DetectionResult::new(Some(vec![det(10., 10., 0.9)]), None));
        for _ in 0..5 {
            let out = tracker.assign(DetectionResult::default());
            assert!(out.is_empty());
        }
        let out = tracker.assign(DetectionResult::new(Some(vec![det(10., 10., 0.9)]), None));
        assert_eq!(ids(&out), vec![Some(1)]);
    }

    #[test]
    fn test_masks_follow_kept_boxes() {
        let mut tracker = ByteTracker::default();
        tracker.assign(DetectionResult::new(Some(vec![det(10., 10., 0.9)]), None));
        let out = tracker.assign(DetectionResult::new(
            Some(vec![det(400., 200., 0.9), det(10., 10., 0.9)]),
            Some(vec![vec![1u8], vec![2u8]]),
        ));
        assert_eq!(ids(&out), vec![Some(1)]);
        assert_eq!(out.masks(), Some(&vec![vec![2u8]]));
    }

    #[test]
    fn test_botsort_rejects_distant_overlap() {
        let mut tracker = ByteTracker::new(TrackerConfig::botsort());
        tracker.assign(DetectionResult::new(Some(vec![det(10., 10., 0.9)]), None));
        // IOU ≈ 0.33, 1 - IOU 超过 0.5 的门限
        let out = tracker.assign(DetectionResult::new(Some(vec![det(30., 10., 0.9)]), None));
        assert!(out.is_empty());
    }
}
