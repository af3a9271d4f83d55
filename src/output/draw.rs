// 该文件是 Menshen （门神） 项目的一部分。
// src/output/draw.rs - 识别结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::model::FaceResult;
use crate::output::FrameReport;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_HEIGHT: i32 = 22;
const LABEL_CHAR_WIDTH: f32 = 10.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const KNOWN_COLOR: [u8; 3] = [0, 200, 0]; // 绿色
const UNKNOWN_COLOR: [u8; 3] = [220, 0, 0]; // 红色
const STATUS_COLOR: [u8; 3] = [255, 255, 0];

/// 在帧上绘制人脸框、标签与监视器状态
///
/// 没有字体时只绘制边框。
pub struct Draw {
  font: Option<FontArc>,
  font_scale: PxScale,
  label_text_height: i32,
  label_char_width: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self::new(None)
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
    }
  }

  pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, std::io::Error> {
    let data = std::fs::read(path)?;
    FontArc::try_from_vec(data)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
  }

  pub fn draw_report(&self, image: &mut RgbImage, report: &FrameReport) {
    for face in report.result.faces.iter() {
      self.draw_face(image, face);
    }
    self.draw_status(image, report);
  }

  fn draw_face(&self, image: &mut RgbImage, face: &FaceResult) {
    let bbox = face.bbox.clamp(image.width(), image.height());
    if bbox.is_degenerate() {
      return;
    }
    let color = Rgb(if face.is_known { KNOWN_COLOR } else { UNKNOWN_COLOR });

    // 边框加粗为 2 像素
    let (x, y, w, h) = bbox.to_xywh();
    draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w as u32, h as u32), color);
    if w > 2 && h > 2 {
      let inner = Rect::at(x + 1, y + 1).of_size(w as u32 - 2, h as u32 - 2);
      draw_hollow_rect_mut(image, inner, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };
    let label = match face.track_id {
      Some(id) => format!("#{} {} {:.2}", id, face.label, face.distance),
      None => format!("{} {:.2}", face.label, face.distance),
    };

    // 标签放在框上方，空间不足时贴着图像顶部
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_y = (y - self.label_text_height).max(0);
    let label_width = text_width.min(image.width() as i32 - x).max(0) as u32;
    if label_width == 0 {
      return;
    }
    let rect = Rect::at(x, label_y).of_size(label_width, self.label_text_height as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      Rgb([255, 255, 255]),
      x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      self.font_scale,
      font,
      &label,
    );
  }

  fn draw_status(&self, image: &mut RgbImage, report: &FrameReport) {
    let Some(font) = self.font.as_ref() else {
      return;
    };
    let mut line = report
      .monitors
      .iter()
      .map(|m| format!("{} {}/{}", m.label, m.current_count, m.threshold))
      .collect::<Vec<_>>()
      .join("  ");
    if !report.active {
      line.push_str("  [inactive]");
    }
    if line.is_empty() {
      return;
    }
    let y = image.height() as i32 - self.label_text_height;
    draw_text_mut(
      image,
      Rgb(STATUS_COLOR),
      4,
      y.max(0),
      self.font_scale,
      font,
      &line,
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, RecognitionResult};

  fn report(faces: Vec<FaceResult>) -> FrameReport {
    FrameReport {
      result: RecognitionResult {
        faces,
        processed: true,
        detected: true,
      },
      monitors: Vec::new(),
      active: true,
    }
  }

  fn face(bbox: BoundingBox, is_known: bool) -> FaceResult {
    FaceResult {
      bbox,
      label: if is_known { "Alice" } else { "Stranger" }.to_string(),
      is_known,
      distance: 0.4,
      track_id: None,
    }
  }

  #[test]
  fn known_faces_are_green_strangers_red() {
    let mut image = RgbImage::new(64, 64);
    let draw = Draw::default();
    draw.draw_report(
      &mut image,
      &report(vec![
        face(BoundingBox::from_xywh(2, 2, 20, 20), true),
        face(BoundingBox::from_xywh(30, 30, 20, 20), false),
      ]),
    );
    assert_eq!(image.get_pixel(2, 2).0, KNOWN_COLOR);
    assert_eq!(image.get_pixel(3, 10).0, KNOWN_COLOR);
    assert_eq!(image.get_pixel(30, 40).0, UNKNOWN_COLOR);
    // 框内部不被填充
    assert_eq!(image.get_pixel(12, 12).0, [0, 0, 0]);
  }

  #[test]
  fn boxes_outside_frame_are_skipped() {
    let mut image = RgbImage::new(16, 16);
    Draw::default().draw_report(
      &mut image,
      &report(vec![face(BoundingBox::from_xywh(40, 40, 10, 10), true)]),
    );
    assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
  }
}
