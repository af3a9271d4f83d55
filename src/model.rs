// 该文件是 Menshen （门神） 项目的一部分。
// src/model.rs - 数据模型
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

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// 图库中没有任何人脸时使用的标签
pub const UNKNOWN_LABEL: &str = "Unknown";
/// 图库非空但距离超出容差时使用的标签
pub const STRANGER_LABEL: &str = "Stranger";

/// 人脸边界框，整数帧坐标
///
/// 合法的框满足 `top < bottom` 且 `left < right`，否则视为退化框。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
  pub top: i32,
  pub right: i32,
  pub bottom: i32,
  pub left: i32,
}

impl BoundingBox {
  pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
    Self {
      top,
      right,
      bottom,
      left,
    }
  }

  /// 由 (x, y, w, h) 构造
  pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      top: y,
      right: x + width,
      bottom: y + height,
      left: x,
    }
  }

  pub fn to_xywh(&self) -> (i32, i32, i32, i32) {
    (self.left, self.top, self.width(), self.height())
  }

  pub fn width(&self) -> i32 {
    self.right - self.left
  }

  pub fn height(&self) -> i32 {
    self.bottom - self.top
  }

  /// 面积，退化框返回 0
  pub fn area(&self) -> i64 {
    if self.is_degenerate() {
      0
    } else {
      self.width() as i64 * self.height() as i64
    }
  }

  pub fn is_degenerate(&self) -> bool {
    self.width() <= 0 || self.height() <= 0
  }

  /// 交并比 (IoU)，无交集或并集为零时返回 0
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x_left = self.left.max(other.left);
    let y_top = self.top.max(other.top);
    let x_right = self.right.min(other.right);
    let y_bottom = self.bottom.min(other.bottom);

    if x_right < x_left || y_bottom < y_top {
      return 0.0;
    }

    let intersection = (x_right - x_left) as i64 * (y_bottom - y_top) as i64;
    let union = self.area() + other.area() - intersection;
    if union <= 0 {
      return 0.0;
    }
    intersection as f32 / union as f32
  }

  /// 按比例缩放坐标，四舍五入到整数
  pub fn scale(&self, factor: f64) -> BoundingBox {
    let s = |v: i32| (v as f64 * factor).round() as i32;
    BoundingBox {
      top: s(self.top),
      right: s(self.right),
      bottom: s(self.bottom),
      left: s(self.left),
    }
  }

  /// 裁剪到 `[0, width) x [0, height)` 范围内
  pub fn clamp(&self, width: u32, height: u32) -> BoundingBox {
    let (w, h) = (width as i32, height as i32);
    BoundingBox {
      top: self.top.clamp(0, h),
      right: self.right.clamp(0, w),
      bottom: self.bottom.clamp(0, h),
      left: self.left.clamp(0, w),
    }
  }
}

/// 人脸特征向量，由外部引擎产生，产生后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Arc<[f32]>);

impl Embedding {
  pub fn new(values: Vec<f32>) -> Self {
    Self(values.into())
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl From<Vec<f32>> for Embedding {
  fn from(values: Vec<f32>) -> Self {
    Self::new(values)
  }
}

impl From<Embedding> for Vec<f32> {
  fn from(embedding: Embedding) -> Self {
    embedding.0.to_vec()
  }
}

/// 一次身份匹配的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMatch {
  pub name: String,
  pub is_known: bool,
  pub distance: f32,
}

impl IdentityMatch {
  pub fn known(name: impl Into<String>, distance: f32) -> Self {
    Self {
      name: name.into(),
      is_known: true,
      distance,
    }
  }

  pub fn stranger(distance: f32) -> Self {
    Self {
      name: STRANGER_LABEL.to_string(),
      is_known: false,
      distance,
    }
  }

  /// 图库为空时的结果，距离固定为 1.0
  pub fn unknown() -> Self {
    Self {
      name: UNKNOWN_LABEL.to_string(),
      is_known: false,
      distance: 1.0,
    }
  }
}

/// 单个人脸的展示记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceResult {
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
  pub label: String,
  pub is_known: bool,
  pub distance: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub track_id: Option<u64>,
}

/// 一帧的识别结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
  pub faces: Vec<FaceResult>,
  /// 引擎出错跳过该帧时为 false
  pub processed: bool,
  /// 本帧是否执行了完整检测（否则为跟踪器惯性推进）
  pub detected: bool,
}

impl RecognitionResult {
  pub fn empty() -> Self {
    Self {
      faces: Vec::new(),
      processed: true,
      detected: true,
    }
  }

  pub fn skipped() -> Self {
    Self {
      faces: Vec::new(),
      processed: false,
      detected: false,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.faces.is_empty()
  }
}
