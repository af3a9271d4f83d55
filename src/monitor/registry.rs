// 该文件是 Menshen （门神） 项目的一部分。
// src/monitor/registry.rs - 标签到监视器的映射
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

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Local, TimeDelta};
use tracing::{debug, info};

use super::{DetectionWindowMonitor, MonitorSettings, MonitorSnapshot};
use crate::model::STRANGER_LABEL;
use crate::sink::{AlertNotifier, EventSink, format_event_time};

/// 一次喂入的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
  /// 由绑定的监视器处理
  Monitored { fired: bool },
  /// 没有绑定监视器，走兜底冷却
  Fallback { persisted: bool },
}

/// 兜底冷却：记录每个标签上次持久化的时间
#[derive(Debug)]
pub struct FallbackCooldown {
  cooldown: TimeDelta,
  last_seen: HashMap<String, DateTime<Local>>,
}

impl FallbackCooldown {
  pub fn new(cooldown_secs: u64) -> Self {
    Self {
      cooldown: TimeDelta::seconds(cooldown_secs as i64),
      last_seen: HashMap::new(),
    }
  }

  /// 距上次持久化不少于冷却时间时返回 true 并刷新记录
  pub fn should_persist(&mut self, label: &str, now: DateTime<Local>) -> bool {
    if let Some(last) = self.last_seen.get(label)
      && now - *last < self.cooldown
    {
      return false;
    }
    self.last_seen.insert(label.to_string(), now);
    true
  }
}

/// 每个受监视标签一个监视器，其余标签走兜底冷却
pub struct MonitorRegistry {
  monitors: HashMap<String, DetectionWindowMonitor>,
  fallback: FallbackCooldown,
  sink: Arc<dyn EventSink>,
}

impl MonitorRegistry {
  /// 为图库中每个不同的名字建立已知人员监视器，并为陌生人建立一个监视器
  pub fn new(
    labels: &[String],
    known_person: &MonitorSettings,
    stranger: &MonitorSettings,
    fallback_cooldown_secs: u64,
    sink: Arc<dyn EventSink>,
    notifier: Option<Arc<dyn AlertNotifier>>,
  ) -> Self {
    let mut monitors = HashMap::new();

    if known_person.enabled {
      let unique: BTreeSet<&String> = labels.iter().collect();
      for label in unique {
        if label == STRANGER_LABEL {
          continue;
        }
        let sink = sink.clone();
        let monitor = DetectionWindowMonitor::new(label.clone(), known_person).with_callback(
          Box::new(move |label, count, at| {
            info!("确认 {} 出现 {} 次", label, count);
            sink.insert_event(label, &format_event_time(&at));
          }),
        );
        info!(
          "监视 {}: {} 次 / {} 秒",
          label, known_person.threshold, known_person.time_window_secs
        );
        monitors.insert(label.clone(), monitor);
      }
    }

    if stranger.enabled {
      let sink = sink.clone();
      let monitor = DetectionWindowMonitor::new(STRANGER_LABEL, stranger).with_callback(Box::new(
        move |label, count, at| {
          if let Some(notifier) = notifier.as_ref() {
            notifier.notify_alert(label, count, at);
          }
          sink.insert_event(label, &format_event_time(&at));
        },
      ));
      info!(
        "监视陌生人: {} 次 / {} 秒",
        stranger.threshold, stranger.time_window_secs
      );
      monitors.insert(STRANGER_LABEL.to_string(), monitor);
    }

    Self {
      monitors,
      fallback: FallbackCooldown::new(fallback_cooldown_secs),
      sink,
    }
  }

  pub fn is_monitored(&self, label: &str) -> bool {
    self.monitors.contains_key(label)
  }

  /// 将一次识别结果送入对应的监视器
  pub fn feed(&mut self, label: &str, now: DateTime<Local>) -> FeedOutcome {
    if let Some(monitor) = self.monitors.get_mut(label) {
      let fired = monitor.record_detection_at(label, now);
      return FeedOutcome::Monitored { fired };
    }

    let persisted = self.fallback.should_persist(label, now);
    if persisted {
      debug!("兜底记录 {}", label);
      self.sink.insert_event(label, &format_event_time(&now));
    }
    FeedOutcome::Fallback { persisted }
  }

  /// 按标签排序的全部监视器状态
  pub fn snapshots(&self, now: DateTime<Local>) -> Vec<MonitorSnapshot> {
    let mut snapshots: Vec<MonitorSnapshot> =
      self.monitors.values().map(|m| m.snapshot(now)).collect();
    snapshots.sort_by(|a, b| a.label.cmp(&b.label));
    snapshots
  }

  pub fn snapshot(&self, label: &str, now: DateTime<Local>) -> Option<MonitorSnapshot> {
    self.monitors.get(label).map(|m| m.snapshot(now))
  }

  pub fn reset(&mut self) {
    self.monitors.values_mut().for_each(DetectionWindowMonitor::reset);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::UNKNOWN_LABEL;
  use chrono::TimeZone;
  use std::sync::Mutex;

  #[derive(Default)]
  struct MemorySink(Mutex<Vec<(String, String)>>);

  impl EventSink for MemorySink {
    fn insert_event(&self, name: &str, time: &str) {
      self.0.lock().unwrap().push((name.to_string(), time.to_string()));
    }
  }

  #[derive(Default)]
  struct MemoryNotifier(Mutex<Vec<(String, usize)>>);

  impl AlertNotifier for MemoryNotifier {
    fn notify_alert(&self, label: &str, count: usize, _at: DateTime<Local>) {
      self.0.lock().unwrap().push((label.to_string(), count));
    }
  }

  fn start() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
  }

  fn tight(cooldown: u64) -> MonitorSettings {
    MonitorSettings {
      enabled: true,
      time_window_secs: 60,
      threshold: 2,
      cooldown_secs: cooldown,
    }
  }

  fn registry(
    labels: &[&str],
  ) -> (MonitorRegistry, Arc<MemorySink>, Arc<MemoryNotifier>) {
    let sink = Arc::new(MemorySink::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let labels: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
    let registry = MonitorRegistry::new(
      &labels,
      &tight(0),
      &tight(60),
      10,
      sink.clone(),
      Some(notifier.clone()),
    );
    (registry, sink, notifier)
  }

  #[test]
  fn one_monitor_per_unique_label() {
    let (registry, _, _) = registry(&["Alice", "Bob", "Alice"]);
    assert!(registry.is_monitored("Alice"));
    assert!(registry.is_monitored("Bob"));
    assert!(registry.is_monitored(STRANGER_LABEL));
    assert_eq!(registry.snapshots(start()).len(), 3);
  }

  #[test]
  fn known_alert_persists_event() {
    let (mut registry, sink, notifier) = registry(&["Alice"]);
    let t0 = start();
    assert_eq!(registry.feed("Alice", t0), FeedOutcome::Monitored { fired: false });
    assert_eq!(
      registry.feed("Alice", t0 + TimeDelta::seconds(1)),
      FeedOutcome::Monitored { fired: true }
    );
    let events = sink.0.lock().unwrap();
    assert_eq!(events.as_slice(), &[("Alice".to_string(), "2026-03-01 08:00:01".to_string())]);
    assert!(notifier.0.lock().unwrap().is_empty());
  }

  #[test]
  fn stranger_alert_notifies() {
    let (mut registry, sink, notifier) = registry(&["Alice"]);
    let t0 = start();
    registry.feed(STRANGER_LABEL, t0);
    registry.feed(STRANGER_LABEL, t0);
    assert_eq!(notifier.0.lock().unwrap().as_slice(), &[(STRANGER_LABEL.to_string(), 2)]);
    assert_eq!(sink.0.lock().unwrap().len(), 1);
  }

  #[test]
  fn unbound_label_uses_fallback_cooldown() {
    let (mut registry, sink, _) = registry(&[]);
    let t0 = start();
    assert_eq!(registry.feed(UNKNOWN_LABEL, t0), FeedOutcome::Fallback { persisted: true });
    assert_eq!(
      registry.feed(UNKNOWN_LABEL, t0 + TimeDelta::seconds(9)),
      FeedOutcome::Fallback { persisted: false }
    );
    assert_eq!(
      registry.feed(UNKNOWN_LABEL, t0 + TimeDelta::seconds(10)),
      FeedOutcome::Fallback { persisted: true }
    );
    assert_eq!(sink.0.lock().unwrap().len(), 2);
  }

  #[test]
  fn disabled_settings_skip_monitors() {
    let sink = Arc::new(MemorySink::default());
    let disabled = MonitorSettings {
      enabled: false,
      ..MonitorSettings::known_person()
    };
    let registry = MonitorRegistry::new(
      &["Alice".to_string()],
      &disabled,
      &disabled,
      10,
      sink,
      None,
    );
    assert!(!registry.is_monitored("Alice"));
    assert!(!registry.is_monitored(STRANGER_LABEL));
  }
}
