// 该文件是 Menshen （门神） 项目的一部分。
// src/tracker/template.rs - 灰度模板匹配跟踪器
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

use image::{GrayImage, RgbImage, imageops};

use super::{TrackerError, VisualTracker, VisualTrackerFactory};
use crate::model::BoundingBox;

/// 以初始化时的灰度块为模板，在上一位置附近按平均绝对差搜索
pub struct TemplateTracker {
  template: GrayImage,
  bbox: BoundingBox,
  search_radius: i32,
  max_mean_diff: f32,
}

impl TemplateTracker {
  /// 模板在 (left, top) 处的平均绝对差
  fn mean_diff(&self, gray: &GrayImage, left: i32, top: i32) -> f32 {
    let (tw, th) = self.template.dimensions();
    let mut total: u64 = 0;
    for y in 0..th {
      for x in 0..tw {
        let a = self.template.get_pixel(x, y).0[0] as i32;
        let b = gray.get_pixel(left as u32 + x, top as u32 + y).0[0] as i32;
        total += (a - b).unsigned_abs() as u64;
      }
    }
    total as f32 / (tw * th) as f32
  }

  fn fits(&self, gray: &GrayImage, left: i32, top: i32) -> bool {
    let (tw, th) = self.template.dimensions();
    left >= 0
      && top >= 0
      && left as i64 + tw as i64 <= gray.width() as i64
      && top as i64 + th as i64 <= gray.height() as i64
  }

  fn search(
    &self,
    gray: &GrayImage,
    center: (i32, i32),
    radius: i32,
    step: i32,
  ) -> Option<(f32, i32, i32)> {
    let mut best: Option<(f32, i32, i32)> = None;
    let mut dy = -radius;
    while dy <= radius {
      let mut dx = -radius;
      while dx <= radius {
        let (left, top) = (center.0 + dx, center.1 + dy);
        if self.fits(gray, left, top) {
          let diff = self.mean_diff(gray, left, top);
          if best.map(|(b, _, _)| diff < b).unwrap_or(true) {
            best = Some((diff, left, top));
          }
        }
        dx += step;
      }
      dy += step;
    }
    best
  }
}

impl VisualTracker for TemplateTracker {
  fn update(&mut self, frame: &RgbImage) -> Option<BoundingBox> {
    let gray = imageops::grayscale(frame);

    // 先粗后细
    let step = (self.search_radius / 4).max(1);
    let (_, left, top) = self.search(
      &gray,
      (self.bbox.left, self.bbox.top),
      self.search_radius,
      step,
    )?;
    let (diff, left, top) = self.search(&gray, (left, top), step, 1)?;

    if diff > self.max_mean_diff {
      return None;
    }

    let (width, height) = (self.bbox.width(), self.bbox.height());
    self.bbox = BoundingBox::from_xywh(left, top, width, height);
    Some(self.bbox)
  }
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateTrackerFactory {
  search_radius: u32,
  max_mean_diff: f32,
}

impl TemplateTrackerFactory {
  pub fn new(search_radius: u32, max_mean_diff: f32) -> Self {
    Self {
      search_radius,
      max_mean_diff,
    }
  }
}

impl VisualTrackerFactory for TemplateTrackerFactory {
  fn create(
    &self,
    frame: &RgbImage,
    bbox: &BoundingBox,
  ) -> Result<Box<dyn VisualTracker>, TrackerError> {
    if bbox.is_degenerate() {
      return Err(TrackerError::DegenerateBox(*bbox));
    }
    let clamped = bbox.clamp(frame.width(), frame.height());
    if clamped.is_degenerate() {
      return Err(TrackerError::OutOfFrame(*bbox));
    }

    let gray = imageops::grayscale(frame);
    let (x, y, w, h) = clamped.to_xywh();
    let template = imageops::crop_imm(&gray, x as u32, y as u32, w as u32, h as u32).to_image();

    Ok(Box::new(TemplateTracker {
      template,
      bbox: clamped,
      search_radius: self.search_radius as i32,
      max_mean_diff: self.max_mean_diff,
    }))
  }
}
