// 该文件是 Menshen （门神） 项目的一部分。
// src/config.rs - 运行参数
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
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::engine::ColorOrder;
use crate::matcher::DEFAULT_TOLERANCE;
use crate::monitor::MonitorSettings;
use crate::tracker::TrackingSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("配置项 {field} 无效: {reason}")]
  Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
  ConfigError::Invalid {
    field,
    reason: reason.into(),
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
  /// 匹配容差，距离严格小于该值判定为已知
  pub tolerance: f32,
  /// 检测前缩放到的工作宽度
  pub frame_width: u32,
  /// 覆盖引擎声明的通道顺序
  pub color_order: Option<ColorOrder>,
  /// 未绑定监视器的标签两次记录之间的最小间隔
  pub fallback_cooldown_secs: u64,
}

impl Default for RecognitionSettings {
  fn default() -> Self {
    Self {
      tolerance: DEFAULT_TOLERANCE,
      frame_width: 640,
      color_order: None,
      fallback_cooldown_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
  /// 采集队列深度，取值 1 或 2
  pub queue_depth: usize,
  pub read_timeout_ms: u64,
}

impl Default for CaptureSettings {
  fn default() -> Self {
    Self {
      queue_depth: 2,
      read_timeout_ms: 1000,
    }
  }
}

impl CaptureSettings {
  pub fn read_timeout(&self) -> Duration {
    Duration::from_millis(self.read_timeout_ms)
  }
}

/// 监视器配置的部分覆盖，未给出的字段沿用所在档位的默认值
#[derive(Debug, Default, Deserialize)]
struct MonitorOverrides {
  enabled: Option<bool>,
  time_window_secs: Option<u64>,
  threshold: Option<usize>,
  cooldown_secs: Option<u64>,
}

impl MonitorOverrides {
  fn apply(self, base: MonitorSettings) -> MonitorSettings {
    MonitorSettings {
      enabled: self.enabled.unwrap_or(base.enabled),
      time_window_secs: self.time_window_secs.unwrap_or(base.time_window_secs),
      threshold: self.threshold.unwrap_or(base.threshold),
      cooldown_secs: self.cooldown_secs.unwrap_or(base.cooldown_secs),
    }
  }
}

fn stranger_monitor<'de, D: serde::Deserializer<'de>>(
  deserializer: D,
) -> Result<MonitorSettings, D::Error> {
  Ok(MonitorOverrides::deserialize(deserializer)?.apply(MonitorSettings::stranger()))
}

fn known_person_monitor<'de, D: serde::Deserializer<'de>>(
  deserializer: D,
) -> Result<MonitorSettings, D::Error> {
  Ok(MonitorOverrides::deserialize(deserializer)?.apply(MonitorSettings::known_person()))
}

/// 全部运行参数，每一项都有默认值
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub recognition: RecognitionSettings,
  pub tracking: TrackingSettings,
  #[serde(deserialize_with = "stranger_monitor")]
  pub stranger: MonitorSettings,
  #[serde(deserialize_with = "known_person_monitor")]
  pub known_person: MonitorSettings,
  pub capture: CaptureSettings,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      recognition: RecognitionSettings::default(),
      tracking: TrackingSettings::default(),
      stranger: MonitorSettings::stranger(),
      known_person: MonitorSettings::known_person(),
      capture: CaptureSettings::default(),
    }
  }
}

impl Settings {
  pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;
    settings.validate()?;
    Ok(settings)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let settings = Self::from_json_str(&content)?;
    info!("加载配置文件: {}", path.display());
    Ok(settings)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let recognition = &self.recognition;
    if !(recognition.tolerance.is_finite() && recognition.tolerance > 0.0) {
      return Err(invalid("recognition.tolerance", "必须是正数"));
    }
    if recognition.frame_width == 0 {
      return Err(invalid("recognition.frame_width", "不能为 0"));
    }

    let tracking = &self.tracking;
    if tracking.detect_interval == 0 {
      return Err(invalid("tracking.detect_interval", "不能为 0"));
    }
    if !(0.0..=1.0).contains(&tracking.iou_threshold) {
      return Err(invalid("tracking.iou_threshold", "必须在 [0, 1] 之间"));
    }

    for (field, monitor) in [
      ("stranger.threshold", &self.stranger),
      ("known_person.threshold", &self.known_person),
    ] {
      if monitor.enabled && monitor.threshold == 0 {
        return Err(invalid(field, "不能为 0"));
      }
    }

    if !(1..=2).contains(&self.capture.queue_depth) {
      return Err(invalid(
        "capture.queue_depth",
        format!("只能是 1 或 2，当前为 {}", self.capture.queue_depth),
      ));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_object_gives_defaults() {
    let settings = Settings::from_json_str("{}").unwrap();
    assert_eq!(settings.recognition.tolerance, 0.5);
    assert_eq!(settings.recognition.frame_width, 640);
    assert_eq!(settings.recognition.fallback_cooldown_secs, 10);
    assert!(!settings.tracking.enabled);
    assert_eq!(settings.tracking.detect_interval, 5);
    assert_eq!(settings.tracking.max_disappeared, 10);
    assert_eq!(settings.stranger.cooldown_secs, 60);
    assert_eq!(settings.known_person.cooldown_secs, 0);
    assert_eq!(settings.known_person.threshold, 10);
    assert_eq!(settings.capture.queue_depth, 2);
    assert_eq!(settings.capture.read_timeout(), Duration::from_secs(1));
  }

  #[test]
  fn partial_override() {
    let settings = Settings::from_json_str(
      r#"{
        "recognition": {"tolerance": 0.4, "color_order": "bgr"},
        "tracking": {"enabled": true, "detect_interval": 3},
        "known_person": {"threshold": 5}
      }"#,
    )
    .unwrap();
    assert_eq!(settings.recognition.tolerance, 0.4);
    assert_eq!(settings.recognition.color_order, Some(ColorOrder::Bgr));
    assert_eq!(settings.recognition.frame_width, 640);
    assert!(settings.tracking.enabled);
    assert_eq!(settings.tracking.detect_interval, 3);
    assert_eq!(settings.tracking.iou_threshold, 0.3);
    assert_eq!(settings.known_person.threshold, 5);
    assert_eq!(settings.known_person.cooldown_secs, 0);
    assert_eq!(settings.stranger.cooldown_secs, 60);
  }

  #[test]
  fn rejects_invalid_values() {
    assert!(Settings::from_json_str(r#"{"capture": {"queue_depth": 5}}"#).is_err());
    assert!(Settings::from_json_str(r#"{"tracking": {"detect_interval": 0}}"#).is_err());
    assert!(Settings::from_json_str(r#"{"recognition": {"tolerance": -1.0}}"#).is_err());
    assert!(Settings::from_json_str(r#"{"stranger": {"threshold": 0}}"#).is_err());
  }

  #[test]
  fn reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("menshen.json");
    std::fs::write(&path, r#"{"recognition": {"frame_width": 320}}"#).unwrap();
    let settings = Settings::from_json_file(&path).unwrap();
    assert_eq!(settings.recognition.frame_width, 320);
  }
}
