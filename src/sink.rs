// 该文件是 Menshen （门神） 项目的一部分。
// src/sink.rs - 事件持久化与告警通知
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

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 事件时间格式
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_event_time(at: &DateTime<Local>) -> String {
  at.format(EVENT_TIME_FORMAT).to_string()
}

/// 识别事件持久化
///
/// 调用方不关心结果，失败由实现自行记录，不重试。
pub trait EventSink: Send + Sync {
  fn insert_event(&self, name: &str, time: &str);
}

/// 陌生人告警通知
pub trait AlertNotifier: Send + Sync {
  fn notify_alert(&self, label: &str, count: usize, at: DateTime<Local>);
}

#[derive(Error, Debug)]
pub enum SinkError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少文件路径")]
  MissingPath,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 只写日志的事件汇
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl FromUrlWithScheme for LogSink {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogSink {
  type Error = SinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SinkError::SchemeMismatch);
    }
    Ok(LogSink)
  }
}

impl EventSink for LogSink {
  fn insert_event(&self, name: &str, time: &str) {
    info!("记录事件: {} @ {}", name, time);
  }
}

impl AlertNotifier for LogSink {
  fn notify_alert(&self, label: &str, count: usize, at: DateTime<Local>) {
    warn!("告警通知: {} 累计 {} 次 @ {}", label, count, format_event_time(&at));
  }
}

#[derive(Serialize)]
struct EventRecord<'a> {
  name: &'a str,
  time: &'a str,
}

/// 以 JSON Lines 追加写入文件的事件汇
#[derive(Debug)]
pub struct JsonLinesSink {
  path: PathBuf,
  file: Mutex<File>,
}

impl FromUrlWithScheme for JsonLinesSink {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesSink {
  type Error = SinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SinkError::SchemeMismatch);
    }
    if url.path().is_empty() {
      return Err(SinkError::MissingPath);
    }
    Self::open(url.path())
  }
}

impl JsonLinesSink {
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
    let path = path.into();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    info!("事件写入 {}", path.display());
    Ok(Self {
      path,
      file: Mutex::new(file),
    })
  }

  pub fn path(&self) -> &std::path::Path {
    &self.path
  }

  fn append(&self, name: &str, time: &str) -> Result<(), std::io::Error> {
    let mut line = serde_json::to_string(&EventRecord { name, time })?;
    line.push('\n');
    let mut file = self
      .file
      .lock()
      .map_err(|_| std::io::Error::other("事件文件锁已损坏"))?;
    file.write_all(line.as_bytes())?;
    file.flush()
  }
}

impl EventSink for JsonLinesSink {
  fn insert_event(&self, name: &str, time: &str) {
    if let Err(e) = self.append(name, time) {
      error!("写入事件失败 ({}): {}", self.path.display(), e);
    }
  }
}

pub enum SinkWrapper {
  Log(LogSink),
  JsonLines(JsonLinesSink),
}

impl FromUrl for SinkWrapper {
  type Error = SinkError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogSink::SCHEME => Ok(SinkWrapper::Log(LogSink::from_url(url)?)),
      JsonLinesSink::SCHEME => Ok(SinkWrapper::JsonLines(JsonLinesSink::from_url(url)?)),
      _ => Err(SinkError::SchemeMismatch),
    }
  }
}

impl EventSink for SinkWrapper {
  fn insert_event(&self, name: &str, time: &str) {
    match self {
      SinkWrapper::Log(sink) => sink.insert_event(name, time),
      SinkWrapper::JsonLines(sink) => sink.insert_event(name, time),
    }
  }
}
