// 该文件是 Menshen （门神） 项目的一部分。
// src/engine.rs - 人脸检测与特征引擎接口
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

mod replay;

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{BoundingBox, Embedding};

pub use self::replay::{ReplayEngine, ReplayFace, ReplayRecord};

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("未知的距离度量: {0}")]
  UnknownMetric(String),
  #[error("检测失败: {0}")]
  DetectFailed(String),
  #[error("特征提取失败: {0}")]
  EncodeFailed(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("回放记录解析错误 (第 {line} 行): {source}")]
  ParseError {
    line: usize,
    #[source]
    source: serde_json::Error,
  },
}

/// 引擎期望的输入通道顺序
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
  #[default]
  Rgb,
  Bgr,
}

/// 特征距离度量
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
  #[default]
  Euclidean,
  /// 1 - 余弦相似度
  Cosine,
}

impl Metric {
  pub fn parse(name: &str) -> Result<Self, EngineError> {
    match name {
      "euclidean" | "l2" => Ok(Metric::Euclidean),
      "cosine" => Ok(Metric::Cosine),
      other => Err(EngineError::UnknownMetric(other.to_string())),
    }
  }

  /// 两个特征之间的距离，维度不一致时返回正无穷
  pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
      return f32::INFINITY;
    }
    match self {
      Metric::Euclidean => a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt(),
      Metric::Cosine => {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
          return 1.0;
        }
        1.0 - dot / (na * nb)
      }
    }
  }

  pub fn distances(&self, gallery: &[Embedding], probe: &Embedding) -> Vec<f32> {
    gallery
      .iter()
      .map(|known| self.distance(known.as_slice(), probe.as_slice()))
      .collect()
  }
}

/// 外部人脸引擎
///
/// 检测框使用输入图像的坐标；`encode_faces` 返回的特征与输入框按下标对应，
/// 数量可以少于框数，末尾未编码的框会被丢弃。
pub trait FaceEngine: Send {
  fn color_order(&self) -> ColorOrder {
    ColorOrder::Rgb
  }

  fn metric(&self) -> Metric {
    Metric::Euclidean
  }

  fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError>;

  fn encode_faces(
    &mut self,
    image: &RgbImage,
    boxes: &[BoundingBox],
  ) -> Result<Vec<Embedding>, EngineError>;

  fn compute_distances(&self, gallery: &[Embedding], probe: &Embedding) -> Vec<f32> {
    self.metric().distances(gallery, probe)
  }
}

impl<E: FaceEngine + ?Sized> FaceEngine for Box<E> {
  fn color_order(&self) -> ColorOrder {
    (**self).color_order()
  }

  fn metric(&self) -> Metric {
    (**self).metric()
  }

  fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
    (**self).detect_faces(image)
  }

  fn encode_faces(
    &mut self,
    image: &RgbImage,
    boxes: &[BoundingBox],
  ) -> Result<Vec<Embedding>, EngineError> {
    (**self).encode_faces(image, boxes)
  }

  fn compute_distances(&self, gallery: &[Embedding], probe: &Embedding) -> Vec<f32> {
    (**self).compute_distances(gallery, probe)
  }
}
