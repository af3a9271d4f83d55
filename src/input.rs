// 该文件是 Menshen （门神） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use chrono::{DateTime, Local};
use image::RgbImage;
use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme};

mod capture;
mod read_image_file;

pub use self::capture::{CaptureRead, ThreadedCapture};
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 采集到的一帧
#[derive(Debug, Clone)]
pub struct Frame {
  pub image: RgbImage,
  /// 从 1 开始的采集序号，被丢弃的帧也占用序号
  pub index: u64,
  pub captured_at: DateTime<Local>,
}

/// 帧来源
pub trait FrameSource: Send {
  /// 读取下一帧；`Ok(None)` 表示输入已结束
  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError>;
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == ImageFileInput::SCHEME {
      let input = ImageFileInput::from_url(url)?;
      return Ok(InputWrapper::ReadImageFile(input));
    }
    Err(InputError::SchemeMismatch)
  }
}

impl FrameSource for InputWrapper {
  fn read_frame(&mut self) -> Result<Option<RgbImage>, InputError> {
    match self {
      InputWrapper::ReadImageFile(input) => input.read_frame(),
    }
  }
}
