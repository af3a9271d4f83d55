// 该文件是 Menshen （门神） 项目的一部分。
// src/tracker.rs - 帧间人脸跟踪
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! # 帧间跟踪
//!
//! 完整检测只在每 `detect_interval` 帧运行一次，中间帧由每条轨迹自己持有的
//! 轻量视觉跟踪器推进位置（惯性推进）。
//!
//! 轨迹状态：
//! - 新建：检测框没有匹配到任何轨迹
//! - 跟踪中：`frames_since_last_detection == 0`
//! - 过期候选：`1 <= frames_since_last_detection <= max_disappeared`
//! - 移除：`frames_since_last_detection > max_disappeared`
//!
//! 关联采用贪心策略：按检测顺序，每个检测框认领 IoU 最高且高于阈值的未认领轨迹，
//! 同一帧内已认领的轨迹不会再被改派。

mod template;

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{BoundingBox, IdentityMatch};

pub use self::template::{TemplateTracker, TemplateTrackerFactory};

#[derive(Error, Debug)]
pub enum TrackerError {
  #[error("退化的边界框: {0:?}")]
  DegenerateBox(BoundingBox),
  #[error("边界框在画面之外: {0:?}")]
  OutOfFrame(BoundingBox),
}

/// 单目标视觉跟踪器，由所属轨迹独占
pub trait VisualTracker: Send {
  /// 在新的一帧上更新位置，失败返回 `None`
  fn update(&mut self, frame: &RgbImage) -> Option<BoundingBox>;
}

/// 视觉跟踪器工厂，轨迹新建或重新播种时调用
pub trait VisualTrackerFactory: Send {
  fn create(
    &self,
    frame: &RgbImage,
    bbox: &BoundingBox,
  ) -> Result<Box<dyn VisualTracker>, TrackerError>;
}

/// 跟踪参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
  /// 是否启用跟踪；关闭时每帧都做完整检测
  pub enabled: bool,
  /// 每 N 帧做一次完整检测
  pub detect_interval: u32,
  /// 连续丢失超过 N 步后移除轨迹
  pub max_disappeared: u32,
  /// 关联所需的最小 IoU（严格大于）
  pub iou_threshold: f32,
  /// 模板跟踪的搜索半径（像素）
  pub search_radius: u32,
  /// 模板跟踪允许的最大平均灰度差
  pub max_mean_diff: f32,
}

impl Default for TrackingSettings {
  fn default() -> Self {
    Self {
      enabled: false,
      detect_interval: 5,
      max_disappeared: 10,
      iou_threshold: 0.3,
      search_radius: 16,
      max_mean_diff: 40.0,
    }
  }
}

/// 一条跨帧的人脸轨迹
pub struct Track {
  id: u64,
  bbox: BoundingBox,
  identity: IdentityMatch,
  frames_since_last_detection: u32,
  total_frames_tracked: u32,
  visual: Box<dyn VisualTracker>,
}

impl std::fmt::Debug for Track {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Track")
      .field("id", &self.id)
      .field("bbox", &self.bbox)
      .field("identity", &self.identity)
      .field("frames_since_last_detection", &self.frames_since_last_detection)
      .field("total_frames_tracked", &self.total_frames_tracked)
      .finish()
  }
}

impl Track {
  fn new(
    id: u64,
    bbox: BoundingBox,
    identity: IdentityMatch,
    visual: Box<dyn VisualTracker>,
  ) -> Self {
    Self {
      id,
      bbox,
      identity,
      frames_since_last_detection: 0,
      total_frames_tracked: 1,
      visual,
    }
  }

  pub fn id(&self) -> u64 {
    self.id
  }

  pub fn bbox(&self) -> &BoundingBox {
    &self.bbox
  }

  pub fn identity(&self) -> &IdentityMatch {
    &self.identity
  }

  /// 丢失步数：漏检的检测帧与惯性推进失败都会累加
  pub fn frames_since_last_detection(&self) -> u32 {
    self.frames_since_last_detection
  }

  pub fn total_frames_tracked(&self) -> u32 {
    self.total_frames_tracked
  }

  fn reseed(&mut self, bbox: BoundingBox, identity: IdentityMatch, visual: Box<dyn VisualTracker>) {
    self.bbox = bbox;
    self.identity = identity;
    self.frames_since_last_detection = 0;
    self.total_frames_tracked += 1;
    // 旧的视觉跟踪器在这里被释放
    self.visual = visual;
  }

  fn age(&mut self) {
    self.frames_since_last_detection += 1;
  }
}

/// 一次跟踪更新的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackUpdate {
  /// 按检测顺序，每个检测框最终所属的轨迹
  pub assigned: Vec<Option<u64>>,
  pub created: Vec<u64>,
  pub removed: Vec<u64>,
}

/// 基于 IoU 的多目标跟踪器
pub struct FrameTracker {
  settings: TrackingSettings,
  factory: Box<dyn VisualTrackerFactory>,
  tracks: Vec<Track>,
  next_id: u64,
  frame_count: u64,
}

impl FrameTracker {
  pub fn new(settings: TrackingSettings, factory: Box<dyn VisualTrackerFactory>) -> Self {
    Self {
      settings,
      factory,
      tracks: Vec::new(),
      next_id: 0,
      frame_count: 0,
    }
  }

  /// 使用内置模板跟踪器
  pub fn with_template_tracker(settings: TrackingSettings) -> Self {
    let factory = TemplateTrackerFactory::new(settings.search_radius, settings.max_mean_diff);
    Self::new(settings, Box::new(factory))
  }

  pub fn settings(&self) -> &TrackingSettings {
    &self.settings
  }

  pub fn tracks(&self) -> &[Track] {
    &self.tracks
  }

  /// 当前帧是否应运行完整检测，第一帧总是检测帧
  pub fn should_detect(&self) -> bool {
    self.frame_count % self.settings.detect_interval.max(1) as u64 == 0
  }

  /// 用检测结果更新轨迹
  pub fn update_with_detections(
    &mut self,
    frame: &RgbImage,
    detections: Vec<(BoundingBox, IdentityMatch)>,
  ) -> TrackUpdate {
    self.frame_count += 1;

    let mut update = TrackUpdate::default();
    let mut claimed = vec![false; self.tracks.len()];
    let mut spawned = Vec::new();

    for (bbox, identity) in detections {
      if bbox.is_degenerate() {
        debug!("忽略退化检测框: {:?}", bbox);
        update.assigned.push(None);
        continue;
      }

      let visual = match self.factory.create(frame, &bbox) {
        Ok(visual) => visual,
        Err(e) => {
          debug!("视觉跟踪器初始化失败，忽略该检测: {}", e);
          update.assigned.push(None);
          continue;
        }
      };

      match self.best_unclaimed(&bbox, &claimed) {
        Some(idx) => {
          claimed[idx] = true;
          let track = &mut self.tracks[idx];
          track.reseed(bbox, identity, visual);
          update.assigned.push(Some(track.id));
        }
        None => {
          let id = self.next_id;
          self.next_id += 1;
          spawned.push(Track::new(id, bbox, identity, visual));
          update.created.push(id);
          update.assigned.push(Some(id));
        }
      }
    }

    for (track, claimed) in self.tracks.iter_mut().zip(&claimed) {
      if !claimed {
        track.age();
      }
    }
    update.removed = self.expire();
    self.tracks.extend(spawned);

    update
  }

  /// 非检测帧：用各自的视觉跟踪器推进一次
  pub fn coast(&mut self, frame: &RgbImage) -> TrackUpdate {
    self.frame_count += 1;

    for track in self.tracks.iter_mut() {
      match track.visual.update(frame) {
        Some(bbox) if !bbox.is_degenerate() => {
          track.bbox = bbox;
          track.total_frames_tracked += 1;
        }
        Some(bbox) => {
          debug!("轨迹 {} 跟踪得到退化框: {:?}", track.id, bbox);
          track.age();
        }
        None => track.age(),
      }
    }

    TrackUpdate {
      removed: self.expire(),
      ..Default::default()
    }
  }

  /// 引擎失败时调用：所有轨迹当作零检测处理，各老化一步
  pub fn age_all(&mut self) -> TrackUpdate {
    self.frame_count += 1;
    self.tracks.iter_mut().for_each(Track::age);
    TrackUpdate {
      removed: self.expire(),
      ..Default::default()
    }
  }

  /// 只推进检测节奏，不触碰任何轨迹
  pub fn skip_frame(&mut self) {
    self.frame_count += 1;
  }

  pub fn reset(&mut self) {
    self.tracks.clear();
    self.next_id = 0;
    self.frame_count = 0;
  }

  fn best_unclaimed(&self, bbox: &BoundingBox, claimed: &[bool]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, track) in self.tracks.iter().enumerate() {
      if claimed[idx] {
        continue;
      }
      let iou = track.bbox.iou(bbox);
      if iou <= self.settings.iou_threshold {
        continue;
      }
      if best.map(|(_, b)| iou > b).unwrap_or(true) {
        best = Some((idx, iou));
      }
    }
    best.map(|(idx, _)| idx)
  }

  fn expire(&mut self) -> Vec<u64> {
    let max = self.settings.max_disappeared;
    let mut removed = Vec::new();
    self.tracks.retain(|track| {
      let keep = track.frames_since_last_detection <= max;
      if !keep {
        info!(
          "移除轨迹 {} ({})，共跟踪 {} 帧",
          track.id, track.identity.name, track.total_frames_tracked
        );
        removed.push(track.id);
      }
      keep
    });
    removed
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 原地不动的视觉跟踪器
  struct Hold(BoundingBox);

  impl VisualTracker for Hold {
    fn update(&mut self, _frame: &RgbImage) -> Option<BoundingBox> {
      Some(self.0)
    }
  }

  struct HoldFactory;

  impl VisualTrackerFactory for HoldFactory {
    fn create(
      &self,
      _frame: &RgbImage,
      bbox: &BoundingBox,
    ) -> Result<Box<dyn VisualTracker>, TrackerError> {
      Ok(Box::new(Hold(*bbox)))
    }
  }

  struct Lost;

  impl VisualTracker for Lost {
    fn update(&mut self, _frame: &RgbImage) -> Option<BoundingBox> {
      None
    }
  }

  struct LostFactory;

  impl VisualTrackerFactory for LostFactory {
    fn create(
      &self,
      _frame: &RgbImage,
      _bbox: &BoundingBox,
    ) -> Result<Box<dyn VisualTracker>, TrackerError> {
      Ok(Box::new(Lost))
    }
  }

  fn settings(detect_interval: u32, max_disappeared: u32) -> TrackingSettings {
    TrackingSettings {
      enabled: true,
      detect_interval,
      max_disappeared,
      iou_threshold: 0.3,
      ..Default::default()
    }
  }

  fn frame() -> RgbImage {
    RgbImage::new(64, 64)
  }

  fn alice() -> IdentityMatch {
    IdentityMatch::known("Alice", 0.2)
  }

  /// 按节奏驱动一帧：检测帧喂入给定检测，其余帧惯性推进
  fn step(tracker: &mut FrameTracker, detections: &[BoundingBox]) -> TrackUpdate {
    if tracker.should_detect() {
      let dets = detections.iter().map(|b| (*b, alice())).collect();
      tracker.update_with_detections(&frame(), dets)
    } else {
      tracker.coast(&frame())
    }
  }

  #[test]
  fn stationary_face_keeps_one_track() {
    let face = BoundingBox::from_xywh(10, 10, 20, 20);
    let mut tracker = FrameTracker::new(settings(5, 10), Box::new(HoldFactory));

    let n = 23;
    for _ in 0..n {
      let was_detect = tracker.should_detect();
      step(&mut tracker, &[face]);
      assert_eq!(tracker.tracks().len(), 1);
      let age = tracker.tracks()[0].frames_since_last_detection();
      if was_detect {
        assert_eq!(age, 0);
      }
      assert!(age <= 4);
    }

    let track = &tracker.tracks()[0];
    assert_eq!(track.id(), 0);
    assert_eq!(track.total_frames_tracked(), n);
  }

  #[test]
  fn unmatched_track_removed_exactly_once() {
    let face = BoundingBox::from_xywh(10, 10, 20, 20);
    let mut tracker = FrameTracker::new(settings(1, 3), Box::new(HoldFactory));

    let created = step(&mut tracker, &[face]);
    assert_eq!(created.created, vec![0]);

    let mut removals = Vec::new();
    for i in 0..10 {
      let update = step(&mut tracker, &[]);
      if !update.removed.is_empty() {
        removals.push((i, update.removed));
      }
    }
    // 第 4 次漏检 (age = 4 > 3) 时移除
    assert_eq!(removals, vec![(3, vec![0])]);
    assert!(tracker.tracks().is_empty());
  }

  #[test]
  fn failed_coast_ages_track() {
    let face = BoundingBox::from_xywh(10, 10, 20, 20);
    let mut tracker = FrameTracker::new(settings(5, 2), Box::new(LostFactory));

    step(&mut tracker, &[face]);
    step(&mut tracker, &[face]);
    step(&mut tracker, &[face]);
    assert_eq!(tracker.tracks()[0].frames_since_last_detection(), 2);
    let update = step(&mut tracker, &[face]);
    assert_eq!(update.removed, vec![0]);
  }

  #[test]
  fn claimed_track_is_not_reassigned() {
    let a = BoundingBox::from_xywh(0, 0, 20, 20);
    let mut tracker = FrameTracker::new(settings(1, 5), Box::new(HoldFactory));
    tracker.update_with_detections(&frame(), vec![(a, alice())]);

    // 两个检测都与轨迹 0 高度重叠，第二个只能新建
    let b = BoundingBox::from_xywh(1, 0, 20, 20);
    let c = BoundingBox::from_xywh(0, 1, 20, 20);
    let update = tracker.update_with_detections(&frame(), vec![(b, alice()), (c, alice())]);
    assert_eq!(update.assigned, vec![Some(0), Some(1)]);
    assert_eq!(update.created, vec![1]);
    assert_eq!(tracker.tracks().len(), 2);
  }

  #[test]
  fn picks_highest_iou_track() {
    let mut tracker = FrameTracker::new(settings(1, 5), Box::new(HoldFactory));
    let far = BoundingBox::from_xywh(0, 0, 20, 20);
    let near = BoundingBox::from_xywh(30, 0, 20, 20);
    tracker.update_with_detections(&frame(), vec![(far, alice()), (near, alice())]);

    let probe = BoundingBox::from_xywh(28, 0, 20, 20);
    let update = tracker.update_with_detections(&frame(), vec![(probe, alice())]);
    assert_eq!(update.assigned, vec![Some(1)]);
    assert_eq!(tracker.tracks()[1].bbox(), &probe);
    assert_eq!(tracker.tracks()[0].frames_since_last_detection(), 1);
  }

  #[test]
  fn degenerate_detection_is_dropped() {
    let mut tracker = FrameTracker::new(settings(1, 5), Box::new(HoldFactory));
    let bad = BoundingBox::new(10, 5, 10, 5);
    let update = tracker.update_with_detections(&frame(), vec![(bad, alice())]);
    assert_eq!(update.assigned, vec![None]);
    assert!(tracker.tracks().is_empty());
  }

  #[test]
  fn matched_track_takes_new_identity() {
    let face = BoundingBox::from_xywh(10, 10, 20, 20);
    let mut tracker = FrameTracker::new(settings(1, 5), Box::new(HoldFactory));
    tracker.update_with_detections(&frame(), vec![(face, IdentityMatch::stranger(0.8))]);
    tracker.update_with_detections(&frame(), vec![(face, alice())]);
    assert_eq!(tracker.tracks()[0].identity(), &alice());
  }

  #[test]
  fn age_all_and_skip_frame() {
    let face = BoundingBox::from_xywh(10, 10, 20, 20);
    let mut tracker = FrameTracker::new(settings(2, 0), Box::new(HoldFactory));
    tracker.update_with_detections(&frame(), vec![(face, alice())]);

    tracker.skip_frame();
    assert_eq!(tracker.tracks()[0].frames_since_last_detection(), 0);
    assert!(tracker.should_detect());

    let update = tracker.age_all();
    assert_eq!(update.removed, vec![0]);
  }

  #[test]
  fn ids_are_monotonic_and_reset_clears() {
    let mut tracker = FrameTracker::new(settings(1, 0), Box::new(HoldFactory));
    let a = BoundingBox::from_xywh(0, 0, 10, 10);
    let b = BoundingBox::from_xywh(40, 40, 10, 10);
    tracker.update_with_detections(&frame(), vec![(a, alice())]);
    let update = tracker.update_with_detections(&frame(), vec![(b, alice())]);
    assert_eq!(update.created, vec![1]);
    assert_eq!(update.removed, vec![0]);

    tracker.reset();
    assert!(tracker.tracks().is_empty());
    let update = tracker.update_with_detections(&frame(), vec![(a, alice())]);
    assert_eq!(update.created, vec![0]);
  }
}
