// 该文件是 Menshen （门神） 项目的一部分。
// src/engine/replay.rs - 回放预计算检测结果的引擎
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

//! 回放引擎：每次 `detect_faces` 读取一条 JSON Lines 记录
//!
//! ```text
//! {"faces": [{"box": {"top": 10, "right": 60, "bottom": 70, "left": 5}, "embedding": [0.1, 0.2]}]}
//! {"error": "camera glare"}
//! ```
//!
//! URL 形如 `replay:///path/to/detections.jsonl?metric=cosine&loop&color=bgr`。

use std::collections::VecDeque;
use std::path::Path;

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::{ColorOrder, EngineError, FaceEngine, Metric};
use crate::model::{BoundingBox, Embedding};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayFace {
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
  #[serde(default)]
  pub embedding: Option<Embedding>,
}

/// 一次检测调用的回放内容
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayRecord {
  #[serde(default)]
  pub faces: Vec<ReplayFace>,
  /// 检测阶段失败
  #[serde(default)]
  pub error: Option<String>,
  /// 特征提取阶段失败
  #[serde(default)]
  pub encode_error: Option<String>,
}

#[derive(Debug)]
pub struct ReplayEngine {
  records: Vec<ReplayRecord>,
  cursor: usize,
  looping: bool,
  metric: Metric,
  color_order: ColorOrder,
  pending: Option<ReplayRecord>,
}

impl FromUrlWithScheme for ReplayEngine {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayEngine {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EngineError::SchemeMismatch);
    }

    let mut engine = Self::open(url.path())?;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "metric" => engine.metric = Metric::parse(&v)?,
        "loop" => engine.looping = true,
        "color" if v == "bgr" => engine.color_order = ColorOrder::Bgr,
        _ => {}
      }
    }
    Ok(engine)
  }
}

impl ReplayEngine {
  pub fn new(records: Vec<ReplayRecord>) -> Self {
    Self {
      records,
      cursor: 0,
      looping: false,
      metric: Metric::Euclidean,
      color_order: ColorOrder::Rgb,
      pending: None,
    }
  }

  pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let records = content
      .lines()
      .enumerate()
      .filter(|(_, line)| !line.trim().is_empty())
      .map(|(idx, line)| {
        serde_json::from_str(line).map_err(|source| EngineError::ParseError {
          line: idx + 1,
          source,
        })
      })
      .collect::<Result<Vec<ReplayRecord>, _>>()?;
    info!("加载回放记录 {} 条: {}", records.len(), path.display());
    Ok(Self::new(records))
  }

  pub fn with_metric(mut self, metric: Metric) -> Self {
    self.metric = metric;
    self
  }

  pub fn with_color_order(mut self, color_order: ColorOrder) -> Self {
    self.color_order = color_order;
    self
  }

  pub fn looping(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }

  fn next_record(&mut self) -> Option<ReplayRecord> {
    if self.cursor >= self.records.len() {
      if !self.looping || self.records.is_empty() {
        return None;
      }
      self.cursor = 0;
    }
    let record = self.records[self.cursor].clone();
    self.cursor += 1;
    Some(record)
  }
}

impl FaceEngine for ReplayEngine {
  fn color_order(&self) -> ColorOrder {
    self.color_order
  }

  fn metric(&self) -> Metric {
    self.metric
  }

  fn detect_faces(&mut self, _image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
    self.pending = None;
    let Some(record) = self.next_record() else {
      debug!("回放记录已耗尽");
      return Ok(Vec::new());
    };
    if let Some(error) = record.error.as_ref() {
      return Err(EngineError::DetectFailed(error.clone()));
    }
    let boxes = record.faces.iter().map(|f| f.bbox).collect();
    self.pending = Some(record);
    Ok(boxes)
  }

  fn encode_faces(
    &mut self,
    _image: &RgbImage,
    boxes: &[BoundingBox],
  ) -> Result<Vec<Embedding>, EngineError> {
    let Some(record) = self.pending.take() else {
      return Ok(Vec::new());
    };
    if let Some(error) = record.encode_error {
      return Err(EngineError::EncodeFailed(error));
    }

    // 按框查找对应的特征，遇到第一个缺失特征即停止
    let mut faces: VecDeque<ReplayFace> = record.faces.into();
    let mut embeddings = Vec::with_capacity(boxes.len());
    for bbox in boxes {
      let Some(pos) = faces.iter().position(|f| f.bbox == *bbox) else {
        break;
      };
      match faces.remove(pos).and_then(|f| f.embedding) {
        Some(embedding) => embeddings.push(embedding),
        None => break,
      }
    }
    Ok(embeddings)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn frame() -> RgbImage {
    RgbImage::new(8, 8)
  }

  #[test]
  fn replays_records_in_order() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      r#"{{"faces": [{{"box": {{"top": 1, "right": 5, "bottom": 6, "left": 0}}, "embedding": [0.1, 0.2]}}]}}"#
    )
    .unwrap();
    writeln!(file).unwrap();
    writeln!(file, r#"{{"error": "glare"}}"#).unwrap();
    writeln!(file, r#"{{"faces": []}}"#).unwrap();

    let url = Url::parse(&format!("replay://{}?metric=cosine", file.path().display())).unwrap();
    let mut engine = ReplayEngine::from_url(&url).unwrap();
    assert_eq!(engine.metric(), Metric::Cosine);

    let boxes = engine.detect_faces(&frame()).unwrap();
    assert_eq!(boxes, vec![BoundingBox::new(1, 5, 6, 0)]);
    let embeddings = engine.encode_faces(&frame(), &boxes).unwrap();
    assert_eq!(embeddings[0].as_slice(), &[0.1, 0.2]);

    assert!(matches!(
      engine.detect_faces(&frame()),
      Err(EngineError::DetectFailed(_))
    ));
    assert!(engine.detect_faces(&frame()).unwrap().is_empty());
    // 耗尽后返回空结果
    assert!(engine.detect_faces(&frame()).unwrap().is_empty());
  }

  #[test]
  fn trailing_faces_without_embedding_are_dropped() {
    let a = BoundingBox::new(0, 10, 10, 0);
    let b = BoundingBox::new(20, 30, 30, 20);
    let mut engine = ReplayEngine::new(vec![ReplayRecord {
      faces: vec![
        ReplayFace {
          bbox: a,
          embedding: Some(Embedding::new(vec![1.0])),
        },
        ReplayFace {
          bbox: b,
          embedding: None,
        },
      ],
      ..Default::default()
    }]);

    let boxes = engine.detect_faces(&frame()).unwrap();
    assert_eq!(boxes.len(), 2);
    let embeddings = engine.encode_faces(&frame(), &boxes).unwrap();
    assert_eq!(embeddings.len(), 1);
  }

  #[test]
  fn looping_restarts() {
    let mut engine = ReplayEngine::new(vec![ReplayRecord {
      faces: vec![ReplayFace {
        bbox: BoundingBox::new(0, 4, 4, 0),
        embedding: None,
      }],
      ..Default::default()
    }])
    .looping(true);
    for _ in 0..3 {
      assert_eq!(engine.detect_faces(&frame()).unwrap().len(), 1);
    }
  }

  #[test]
  fn bad_line_reports_position() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"{{"faces": []}}"#).unwrap();
    writeln!(file, "not json").unwrap();
    match ReplayEngine::open(file.path()) {
      Err(EngineError::ParseError { line, .. }) => assert_eq!(line, 2),
      other => panic!("unexpected: {:?}", other),
    }
  }
}
