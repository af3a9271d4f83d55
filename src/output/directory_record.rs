// 该文件是 Menshen （门神） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! 把标注后的帧按日期目录保存
//!
//! `folder:///var/lib/menshen/frames?always&record&font=/usr/share/fonts/DejaVuSans.ttf`
//! - `always`: 没有人脸的帧也保存
//! - `record`: 同时写一份 JSON 识别记录
//! - `font`: 用于绘制标签的字体文件

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{DateTime, Datelike, Local};
use thiserror::Error;

use crate::input::Frame;
use crate::output::{FrameReport, Render, draw::Draw};
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counter: AtomicU16,
  always: bool,
  record: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let record = uri.query_pairs().any(|(k, _)| k == "record");
    let font = uri
      .query_pairs()
      .find(|(k, _)| k == "font")
      .map(|(_, v)| Draw::load_font(v.into_owned()))
      .transpose()?;

    Ok(DirectoryRecordOutput::new(uri.path(), Draw::new(font), always, record))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, draw: Draw, always: bool, record: bool) -> Self {
    Self {
      directory: directory.into(),
      draw,
      frame_counter: AtomicU16::new(0),
      always,
      record,
    }
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, at: &DateTime<Local>) -> Result<PathBuf, std::io::Error> {
    let directory = self
      .directory
      .join(at.year().to_string())
      .join(format!("{:02}", at.month()))
      .join(format!("{:02}", at.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      at.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn save(
    &self,
    path: &Path,
    frame: &Frame,
    report: &FrameReport,
  ) -> Result<(), DirectoryRecordOutputError> {
    let mut image = frame.image.clone();
    self.draw.draw_report(&mut image, report);
    image.save(path)?;
    if self.record {
      let json = serde_json::to_string_pretty(report)?;
      std::fs::write(path.with_extension("json"), json)?;
    }
    Ok(())
  }
}

impl Render<Frame, FrameReport> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, report: &FrameReport) -> Result<(), Self::Error> {
    if self.always || !report.result.is_empty() {
      let path = self.frame_path(&frame.captured_at)?;
      self.save(&path, frame, report)?;
    }
    Ok(())
  }
}
