// 该文件是 Menshen （门神） 项目的一部分。
// src/monitor.rs - 滑动窗口告警去抖
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

//! # 告警监视器
//!
//! 每个身份标签对应一个 [`DetectionWindowMonitor`]：时间窗口内的检测次数达到阈值
//! 且不在冷却期内时触发一次回调，随后清空计数。

mod registry;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, TimeDelta};
use serde::Serialize;
use tracing::{debug, warn};

pub use self::registry::{FallbackCooldown, FeedOutcome, MonitorRegistry};

/// 时间来源
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Local>;
}

/// 系统本地时间
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Local> {
    Local::now()
  }
}

/// 手动推进的时钟，克隆后共享同一时间
#[derive(Debug, Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Local>>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Local>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  pub fn advance(&self, delta: TimeDelta) {
    if let Ok(mut now) = self.now.lock() {
      *now += delta;
    }
  }

  pub fn set(&self, at: DateTime<Local>) {
    if let Ok(mut now) = self.now.lock() {
      *now = at;
    }
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Local> {
    match self.now.lock() {
      Ok(now) => *now,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }
}

/// 单个监视器的窗口参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
  pub enabled: bool,
  pub time_window_secs: u64,
  pub threshold: usize,
  pub cooldown_secs: u64,
}

impl MonitorSettings {
  /// 陌生人监视器默认值：60 秒内 10 次，冷却 60 秒
  pub fn stranger() -> Self {
    Self {
      enabled: true,
      time_window_secs: 60,
      threshold: 10,
      cooldown_secs: 60,
    }
  }

  /// 已知人员监视器默认值：60 秒内 10 次，无冷却
  pub fn known_person() -> Self {
    Self {
      enabled: true,
      time_window_secs: 60,
      threshold: 10,
      cooldown_secs: 0,
    }
  }
}

/// 告警回调：(标签, 窗口内次数, 触发时间)
pub type AlertCallback = Box<dyn FnMut(&str, usize, DateTime<Local>) + Send>;

/// 监视器状态快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
  pub label: String,
  pub current_count: usize,
  pub threshold: usize,
  pub time_window_seconds: u64,
  pub percentage: f64,
  pub alert_ready: bool,
}

/// 绑定到单个标签的滑动窗口监视器
pub struct DetectionWindowMonitor {
  label: String,
  time_window: TimeDelta,
  threshold: usize,
  cooldown: TimeDelta,
  detections: Vec<DateTime<Local>>,
  last_alert: Option<DateTime<Local>>,
  callback: Option<AlertCallback>,
}

impl std::fmt::Debug for DetectionWindowMonitor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DetectionWindowMonitor")
      .field("label", &self.label)
      .field("time_window", &self.time_window)
      .field("threshold", &self.threshold)
      .field("cooldown", &self.cooldown)
      .field("detections", &self.detections.len())
      .field("last_alert", &self.last_alert)
      .finish()
  }
}

impl DetectionWindowMonitor {
  pub fn new(label: impl Into<String>, settings: &MonitorSettings) -> Self {
    Self {
      label: label.into(),
      time_window: TimeDelta::seconds(settings.time_window_secs as i64),
      threshold: settings.threshold,
      cooldown: TimeDelta::seconds(settings.cooldown_secs as i64),
      detections: Vec::new(),
      last_alert: None,
      callback: None,
    }
  }

  pub fn with_callback(mut self, callback: AlertCallback) -> Self {
    self.callback = Some(callback);
    self
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn last_alert(&self) -> Option<DateTime<Local>> {
    self.last_alert
  }

  /// 以系统时间记录一次检测
  pub fn record_detection(&mut self, label: &str) -> bool {
    self.record_detection_at(label, Local::now())
  }

  /// 记录一次检测，返回是否触发了告警
  ///
  /// 标签与绑定标签不一致时不做任何修改。
  pub fn record_detection_at(&mut self, label: &str, now: DateTime<Local>) -> bool {
    if label != self.label {
      return false;
    }

    self.detections.push(now);
    self.prune(now);

    let count = self.detections.len();
    if count < self.threshold {
      return false;
    }

    if let Some(last) = self.last_alert
      && now - last < self.cooldown
    {
      debug!("{} 仍在冷却期内，当前计数 {}", self.label, count);
      return false;
    }

    warn!(
      "告警: {} 在 {} 秒内被检测到 {} 次",
      self.label,
      self.time_window.num_seconds(),
      count
    );
    if let Some(callback) = self.callback.as_mut() {
      callback(&self.label, count, now);
    }
    self.last_alert = Some(now);
    self.detections.clear();
    true
  }

  /// 在给定时刻的状态，不修改内部记录
  pub fn snapshot(&self, now: DateTime<Local>) -> MonitorSnapshot {
    let cutoff = now - self.time_window;
    let count = self.detections.iter().filter(|t| **t > cutoff).count();
    let percentage = if self.threshold > 0 {
      count as f64 / self.threshold as f64 * 100.0
    } else {
      0.0
    };
    MonitorSnapshot {
      label: self.label.clone(),
      current_count: count,
      threshold: self.threshold,
      time_window_seconds: self.time_window.num_seconds() as u64,
      percentage,
      alert_ready: count >= self.threshold,
    }
  }

  /// 清空检测记录与上次告警时间
  pub fn reset(&mut self) {
    self.detections.clear();
    self.last_alert = None;
  }

  fn prune(&mut self, now: DateTime<Local>) {
    let cutoff = now - self.time_window;
    self.detections.retain(|t| *t > cutoff);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn start() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
  }

  fn settings(window: u64, threshold: usize, cooldown: u64) -> MonitorSettings {
    MonitorSettings {
      enabled: true,
      time_window_secs: window,
      threshold,
      cooldown_secs: cooldown,
    }
  }

  fn counting(label: &str, settings: &MonitorSettings) -> (DetectionWindowMonitor, Arc<AtomicUsize>) {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let monitor = DetectionWindowMonitor::new(label, settings).with_callback(Box::new(
      move |_label, _count, _at| {
        counter.fetch_add(1, Ordering::SeqCst);
      },
    ));
    (monitor, fired)
  }

  #[test]
  fn fires_once_then_cools_down() {
    let (mut monitor, fired) = counting("Stranger", &settings(60, 10, 60));
    let t0 = start();

    // 5 秒内 10 次检测，第 10 次触发
    let results: Vec<bool> = (0..10)
      .map(|i| monitor.record_detection_at("Stranger", t0 + TimeDelta::milliseconds(i * 500)))
      .collect();
    assert_eq!(results.iter().filter(|r| **r).count(), 1);
    assert!(results[9]);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // 冷却期内第 11 次不会再触发
    assert!(!monitor.record_detection_at("Stranger", t0 + TimeDelta::seconds(6)));

    // 冷却结束后再攒满 10 次可以再次触发
    let t1 = t0 + TimeDelta::seconds(70);
    let refired: Vec<bool> = (0..10)
      .map(|i| monitor.record_detection_at("Stranger", t1 + TimeDelta::seconds(i)))
      .collect();
    assert!(refired.iter().any(|r| *r));
    assert_eq!(fired.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn cooldown_keeps_detections() {
    let mut monitor = DetectionWindowMonitor::new("Alice", &settings(60, 2, 30));
    let t0 = start();
    monitor.record_detection_at("Alice", t0);
    assert!(monitor.record_detection_at("Alice", t0 + TimeDelta::seconds(1)));
    assert!(!monitor.record_detection_at("Alice", t0 + TimeDelta::seconds(2)));
    assert!(!monitor.record_detection_at("Alice", t0 + TimeDelta::seconds(3)));
    assert_eq!(monitor.snapshot(t0 + TimeDelta::seconds(3)).current_count, 2);
    // 冷却刚好结束
    assert!(monitor.record_detection_at("Alice", t0 + TimeDelta::seconds(31)));
    assert_eq!(monitor.snapshot(t0 + TimeDelta::seconds(31)).current_count, 0);
  }

  #[test]
  fn foreign_label_does_not_mutate() {
    let mut monitor = DetectionWindowMonitor::new("Alice", &settings(60, 1, 0));
    let t0 = start();
    assert!(!monitor.record_detection_at("Bob", t0));
    assert_eq!(monitor.snapshot(t0).current_count, 0);
    assert!(monitor.last_alert().is_none());
  }

  #[test]
  fn spread_detections_never_fire() {
    let (mut monitor, fired) = counting("Stranger", &settings(60, 10, 60));
    let t0 = start();
    for i in 0..10 {
      assert!(!monitor.record_detection_at("Stranger", t0 + TimeDelta::seconds(i * 7)));
    }
    assert_eq!(fired.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn window_boundary_is_pruned() {
    let mut monitor = DetectionWindowMonitor::new("Alice", &settings(10, 3, 0));
    let t0 = start();
    monitor.record_detection_at("Alice", t0);
    monitor.record_detection_at("Alice", t0 + TimeDelta::seconds(5));
    // 恰好 window 秒前的记录被剪除
    assert!(!monitor.record_detection_at("Alice", t0 + TimeDelta::seconds(10)));
    assert_eq!(monitor.snapshot(t0 + TimeDelta::seconds(10)).current_count, 2);
  }

  #[test]
  fn snapshot_reports_progress() {
    let mut monitor = DetectionWindowMonitor::new("Stranger", &settings(60, 4, 60));
    let t0 = start();
    monitor.record_detection_at("Stranger", t0);
    monitor.record_detection_at("Stranger", t0 + TimeDelta::seconds(1));
    let snap = monitor.snapshot(t0 + TimeDelta::seconds(2));
    assert_eq!(snap.current_count, 2);
    assert_eq!(snap.threshold, 4);
    assert_eq!(snap.time_window_seconds, 60);
    assert!((snap.percentage - 50.0).abs() < 1e-9);
    assert!(!snap.alert_ready);
    assert_eq!(monitor.snapshot(t0 + TimeDelta::seconds(120)).current_count, 0);
  }

  #[test]
  fn reset_clears_cooldown() {
    let mut monitor = DetectionWindowMonitor::new("Alice", &settings(60, 1, 600));
    let t0 = start();
    assert!(monitor.record_detection_at("Alice", t0));
    assert!(!monitor.record_detection_at("Alice", t0 + TimeDelta::seconds(1)));
    monitor.reset();
    assert!(monitor.record_detection_at("Alice", t0 + TimeDelta::seconds(2)));
  }

  #[test]
  fn manual_clock_is_shared() {
    let clock = ManualClock::new(start());
    let other = clock.clone();
    clock.advance(TimeDelta::seconds(5));
    assert_eq!(other.now(), start() + TimeDelta::seconds(5));
  }
}
