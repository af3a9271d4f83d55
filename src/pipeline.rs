// 该文件是 Menshen （门神） 项目的一部分。
// src/pipeline.rs - 单帧识别流水线
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

//! # 识别流水线
//!
//! 缩放 → 通道转换 → 检测/跟踪 → 编码 → 匹配 → 喂入监视器 → 组装结果。
//!
//! `active` 只控制持久化与告警副作用，界面结果总是完整返回。

use std::borrow::Cow;
use std::sync::Arc;

use image::{RgbImage, imageops};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::engine::{ColorOrder, FaceEngine};
use crate::gallery::Gallery;
use crate::matcher::IdentityMatcher;
use crate::model::{BoundingBox, FaceResult, IdentityMatch, RecognitionResult};
use crate::monitor::{Clock, MonitorRegistry, MonitorSnapshot, SystemClock};
use crate::sink::{AlertNotifier, EventSink};
use crate::tracker::FrameTracker;

pub struct RecognitionPipeline<E: FaceEngine> {
  engine: E,
  gallery: Arc<Gallery>,
  matcher: IdentityMatcher,
  monitors: MonitorRegistry,
  tracker: Option<FrameTracker>,
  frame_width: u32,
  color_order: ColorOrder,
  clock: Arc<dyn Clock>,
}

impl<E: FaceEngine> RecognitionPipeline<E> {
  /// 按当前图库中的名字建立监视器；跟踪开启时使用内置模板跟踪器
  pub fn new(
    engine: E,
    gallery: Arc<Gallery>,
    settings: &Settings,
    sink: Arc<dyn EventSink>,
    notifier: Option<Arc<dyn AlertNotifier>>,
  ) -> Self {
    let labels = gallery.snapshot().labels();
    let monitors = MonitorRegistry::new(
      &labels,
      &settings.known_person,
      &settings.stranger,
      settings.recognition.fallback_cooldown_secs,
      sink,
      notifier,
    );
    let tracker = settings
      .tracking
      .enabled
      .then(|| FrameTracker::with_template_tracker(settings.tracking.clone()));
    let color_order = settings
      .recognition
      .color_order
      .unwrap_or_else(|| engine.color_order());

    Self {
      engine,
      gallery,
      matcher: IdentityMatcher::new(settings.recognition.tolerance),
      monitors,
      tracker,
      frame_width: settings.recognition.frame_width,
      color_order,
      clock: Arc::new(SystemClock),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_tracker(mut self, tracker: Option<FrameTracker>) -> Self {
    self.tracker = tracker;
    self
  }

  pub fn gallery(&self) -> &Arc<Gallery> {
    &self.gallery
  }

  pub fn tracker(&self) -> Option<&FrameTracker> {
    self.tracker.as_ref()
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  pub fn monitor_snapshots(&self) -> Vec<MonitorSnapshot> {
    self.monitors.snapshots(self.clock.now())
  }

  pub fn monitor_snapshot(&self, label: &str) -> Option<MonitorSnapshot> {
    self.monitors.snapshot(label, self.clock.now())
  }

  /// 清空轨迹与监视器状态
  pub fn reset(&mut self) {
    if let Some(tracker) = self.tracker.as_mut() {
      tracker.reset();
    }
    self.monitors.reset();
  }

  /// 处理一帧
  pub fn process(&mut self, frame: &RgbImage, active: bool) -> RecognitionResult {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
      debug!("空帧，跳过");
      return RecognitionResult::empty();
    }

    let scale = self.frame_width as f64 / width as f64;
    let working = self.prepare(frame, scale);
    let inverse = 1.0 / scale;

    if let Some(tracker) = self.tracker.as_mut()
      && !tracker.should_detect()
    {
      tracker.coast(&working);
      let faces = tracker
        .tracks()
        .iter()
        .map(|track| face_result(track.bbox(), track.identity(), inverse, Some(track.id())))
        .collect();
      return RecognitionResult {
        faces,
        processed: true,
        detected: false,
      };
    }

    let boxes = match self.engine.detect_faces(&working) {
      Ok(boxes) => boxes,
      Err(e) => {
        warn!("人脸检测失败，跳过该帧: {}", e);
        return self.skip_frame();
      }
    };
    let boxes: Vec<BoundingBox> = boxes
      .into_iter()
      .filter(|bbox| {
        if bbox.is_degenerate() {
          debug!("丢弃退化检测框: {:?}", bbox);
        }
        !bbox.is_degenerate()
      })
      .collect();

    if boxes.is_empty() {
      if let Some(tracker) = self.tracker.as_mut() {
        tracker.skip_frame();
      }
      return RecognitionResult::empty();
    }

    let embeddings = match self.engine.encode_faces(&working, &boxes) {
      Ok(embeddings) => embeddings,
      Err(e) => {
        warn!("特征提取失败，跳过该帧: {}", e);
        return self.skip_frame();
      }
    };
    if embeddings.len() < boxes.len() {
      debug!("{} 个检测框中只有 {} 个完成编码", boxes.len(), embeddings.len());
    }

    let gallery = self.gallery.snapshot();
    let now = self.clock.now();
    let matches: Vec<(BoundingBox, IdentityMatch)> = boxes
      .into_iter()
      .zip(&embeddings)
      .map(|(bbox, embedding)| {
        let distances = self.engine.compute_distances(gallery.embeddings(), embedding);
        let identity = self.matcher.identify(gallery.names(), &distances);
        if active {
          self.monitors.feed(&identity.name, now);
        }
        (bbox, identity)
      })
      .collect();

    let assigned = match self.tracker.as_mut() {
      Some(tracker) => tracker.update_with_detections(&working, matches.clone()).assigned,
      None => vec![None; matches.len()],
    };

    let faces = matches
      .iter()
      .zip(assigned)
      .map(|((bbox, identity), track_id)| face_result(bbox, identity, inverse, track_id))
      .collect();

    RecognitionResult {
      faces,
      processed: true,
      detected: true,
    }
  }

  fn skip_frame(&mut self) -> RecognitionResult {
    if let Some(tracker) = self.tracker.as_mut() {
      tracker.age_all();
    }
    RecognitionResult::skipped()
  }

  fn prepare<'a>(&self, frame: &'a RgbImage, scale: f64) -> Cow<'a, RgbImage> {
    let (width, height) = frame.dimensions();
    let resized = if width == self.frame_width {
      Cow::Borrowed(frame)
    } else {
      let new_height = ((height as f64 * scale).round() as u32).max(1);
      Cow::Owned(imageops::resize(
        frame,
        self.frame_width,
        new_height,
        imageops::FilterType::Triangle,
      ))
    };

    match self.color_order {
      ColorOrder::Rgb => resized,
      ColorOrder::Bgr => {
        let mut image = resized.into_owned();
        for pixel in image.pixels_mut() {
          pixel.0.swap(0, 2);
        }
        Cow::Owned(image)
      }
    }
  }
}

fn face_result(
  bbox: &BoundingBox,
  identity: &IdentityMatch,
  inverse: f64,
  track_id: Option<u64>,
) -> FaceResult {
  FaceResult {
    bbox: bbox.scale(inverse),
    label: identity.name.clone(),
    is_known: identity.is_known,
    distance: identity.distance,
    track_id,
  }
}
