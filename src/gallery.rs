// 该文件是 Menshen （门神） 项目的一部分。
// src/gallery.rs - 已知人脸图库
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

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::model::Embedding;
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum GalleryError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图库解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("特征数量 ({embeddings}) 与名字数量 ({names}) 不一致")]
  LengthMismatch { embeddings: usize, names: usize },
  #[error("图库锁已损坏")]
  Poisoned,
}

/// 图库条目，多个条目可以共享同一个名字
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GalleryEntry {
  pub name: String,
  pub embedding: Embedding,
}

/// 已知人脸来源
pub trait GallerySource: Send + Sync {
  /// 返回 (特征, 名字)，两者按下标一一对应
  fn load_known_faces(&self) -> Result<(Vec<Embedding>, Vec<String>), GalleryError>;
}

/// JSON 数组格式的图库文件：`[{"name": "Alice", "embedding": [...]}, ...]`
#[derive(Debug, Clone)]
pub struct JsonGalleryFile {
  path: PathBuf,
}

impl FromUrlWithScheme for JsonGalleryFile {
  const SCHEME: &'static str = "gallery";
}

impl FromUrl for JsonGalleryFile {
  type Error = GalleryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GalleryError::SchemeMismatch);
    }
    Ok(Self::new(url.path()))
  }
}

impl JsonGalleryFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl GallerySource for JsonGalleryFile {
  fn load_known_faces(&self) -> Result<(Vec<Embedding>, Vec<String>), GalleryError> {
    let content = std::fs::read_to_string(&self.path)?;
    let entries: Vec<GalleryEntry> = serde_json::from_str(&content)?;
    Ok(
      entries
        .into_iter()
        .map(|entry| (entry.embedding, entry.name))
        .unzip(),
    )
  }
}

/// 空图库
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyGallery;

impl GallerySource for EmptyGallery {
  fn load_known_faces(&self) -> Result<(Vec<Embedding>, Vec<String>), GalleryError> {
    Ok((Vec::new(), Vec::new()))
  }
}

/// 某一时刻的图库内容，加载后不可变
#[derive(Debug, Default, Clone)]
pub struct GallerySnapshot {
  embeddings: Vec<Embedding>,
  names: Vec<String>,
}

impl GallerySnapshot {
  pub fn new(embeddings: Vec<Embedding>, names: Vec<String>) -> Result<Self, GalleryError> {
    if embeddings.len() != names.len() {
      return Err(GalleryError::LengthMismatch {
        embeddings: embeddings.len(),
        names: names.len(),
      });
    }
    Ok(Self { embeddings, names })
  }

  pub fn embeddings(&self) -> &[Embedding] {
    &self.embeddings
  }

  pub fn names(&self) -> &[String] {
    &self.names
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 去重后的名字，按字典序
  pub fn labels(&self) -> Vec<String> {
    let unique: BTreeSet<&String> = self.names.iter().collect();
    unique.into_iter().cloned().collect()
  }
}

/// 可热更新的图库
///
/// 读者拿到的是 `Arc` 快照，重载时整体替换，不会看到半更新的状态。
pub struct Gallery {
  source: Box<dyn GallerySource>,
  current: RwLock<Arc<GallerySnapshot>>,
}

impl Gallery {
  pub fn new(source: Box<dyn GallerySource>) -> Self {
    Self {
      source,
      current: RwLock::new(Arc::new(GallerySnapshot::default())),
    }
  }

  /// 创建并立即加载
  pub fn load(source: Box<dyn GallerySource>) -> Result<Self, GalleryError> {
    let gallery = Self::new(source);
    gallery.reload()?;
    Ok(gallery)
  }

  pub fn snapshot(&self) -> Arc<GallerySnapshot> {
    match self.current.read() {
      Ok(current) => current.clone(),
      Err(poisoned) => poisoned.into_inner().clone(),
    }
  }

  /// 从来源重新加载；失败时保留旧快照
  pub fn reload(&self) -> Result<Arc<GallerySnapshot>, GalleryError> {
    let (embeddings, names) = self.source.load_known_faces()?;
    let snapshot = GallerySnapshot::new(embeddings, names)?;
    if snapshot.is_empty() {
      warn!("图库为空，所有人脸都将被标记为 Unknown");
    }
    info!(
      "图库已加载: {} 个特征, {} 个人",
      snapshot.len(),
      snapshot.labels().len()
    );
    Ok(self.replace(snapshot))
  }

  pub fn replace(&self, snapshot: GallerySnapshot) -> Arc<GallerySnapshot> {
    let snapshot = Arc::new(snapshot);
    match self.current.write() {
      Ok(mut current) => *current = snapshot.clone(),
      Err(poisoned) => *poisoned.into_inner() = snapshot.clone(),
    }
    snapshot
  }
}
