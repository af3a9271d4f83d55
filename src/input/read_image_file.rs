// 该文件是 Menshen （门神） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

//! 单张图片或一个目录下的图片序列，模拟摄像头输入
//!
//! `image:///path/to/frames?repeat=3&fps=15`
//! - `repeat`: 重复播放的轮数，`repeat=0` 表示无限循环，默认 1
//! - `fps`: 按给定帧率节流，默认不节流

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use super::{FrameSource, InputError};
use crate::{FromUrl, FromUrlWithScheme};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("目录中没有图片: {0}")]
  NoImages(PathBuf),
  #[error("无效的参数 {key}={value}")]
  InvalidQuery { key: String, value: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

pub struct ImageFileInput {
  files: Vec<PathBuf>,
  cursor: usize,
  /// 剩余轮数，`None` 表示无限
  rounds_left: Option<u32>,
  interval: Option<Duration>,
  last_read: Option<Instant>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut input = Self::open(url.path())?;
    for (k, v) in url.query_pairs() {
      let invalid = || ImageFileInputError::InvalidQuery {
        key: k.to_string(),
        value: v.to_string(),
      };
      match k.as_ref() {
        "repeat" => {
          let rounds: u32 = v.parse().map_err(|_| invalid())?;
          input.rounds_left = (rounds > 0).then_some(rounds);
        }
        "fps" => {
          let fps: f64 = v.parse().map_err(|_| invalid())?;
          input.interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        }
        _ => {}
      }
    }
    Ok(input)
  }
}

impl ImageFileInput {
  /// 打开单个文件或目录（按文件名排序）
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let files = if path.is_dir() {
      let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
          p.extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
        })
        .collect();
      files.sort();
      files
    } else {
      // 提前确认文件可读
      std::fs::metadata(path)?;
      vec![path.to_path_buf()]
    };

    if files.is_empty() {
      return Err(ImageFileInputError::NoImages(path.to_path_buf()));
    }
    info!("图像输入: {} 个文件, 来自 {}", files.len(), path.display());

    Ok(Self {
      files,
      cursor: 0,
      rounds_left: Some(1),
      interval: None,
      last_read: None,
    })
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  fn next_path(&mut self) -> Option<PathBuf> {
    if self.cursor >= self.files.len() {
      match self.rounds_left.as_mut() {
        Some(rounds) if *rounds <= 1 => return None,
        Some(rounds) => *rounds -= 1,
        None => {}
      }
      self.cursor = 0;
    }
    let path = self.files[self.cursor].clone();
    self.cursor += 1;
    Some(path)
  }

  fn pace(&mut self) {
    if let (Some(interval), Some(last)) = (self.interval, self.last_read) {
      let elapsed = last.elapsed();
      if elapsed < interval {
        std::thread::sleep(interval - elapsed);
      }
    }
    self.last_read = Some(Instant::now());
  }
}

impl FrameSource for ImageFileInput {
  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    let Some(path) = self.next_path() else {
      return Ok(None);
    };
    self.pace();
    debug!("读取图像 {}", path.display());
    let image = ImageReader::open(&path)
      .map_err(ImageFileInputError::from)?
      .decode()
      .map_err(ImageFileInputError::from)?;
    Ok(Some(image.into_rgb8()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn write_frames(dir: &Path, count: u8) {
    for i in 0..count {
      let image = RgbImage::from_pixel(4, 3, Rgb([i, i, i]));
      image.save(dir.join(format!("frame-{:02}.png", i))).unwrap();
    }
    std::fs::write(dir.join("notes.txt"), "not an image").unwrap();
  }

  #[test]
  fn reads_directory_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 3);
    let url = Url::parse(&format!("image://{}", dir.path().display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert_eq!(input.len(), 3);

    let values: Vec<u8> = std::iter::from_fn(|| input.read_frame().unwrap())
      .map(|img| img.get_pixel(0, 0).0[0])
      .collect();
    assert_eq!(values, vec![0, 1, 2]);
  }

  #[test]
  fn repeats_rounds() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 2);
    let url = Url::parse(&format!("image://{}?repeat=3", dir.path().display())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    let mut count = 0;
    while input.read_frame().unwrap().is_some() {
      count += 1;
    }
    assert_eq!(count, 6);
  }

  #[test]
  fn empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageFileInput::open(dir.path()),
      Err(ImageFileInputError::NoImages(_))
    ));
  }

  #[test]
  fn bad_query_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 1);
    let url = Url::parse(&format!("image://{}?fps=fast", dir.path().display())).unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::InvalidQuery { .. })
    ));
  }
}
