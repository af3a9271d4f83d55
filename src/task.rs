// 该文件是 Menshen （门神） 项目的一部分。
// src/task.rs - 持续运行的识别任务
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::engine::FaceEngine;
use crate::input::{CaptureRead, Frame, ThreadedCapture};
use crate::output::{FrameReport, Render};
use crate::pipeline::RecognitionPipeline;

pub trait Task<I, M, O>: Sized {
  type Error;
  type Output;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 任务结束时的统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskSummary {
  /// 处理过的帧数
  pub frames: usize,
  /// 因引擎失败被跳过的帧数
  pub skipped: usize,
  /// 输出的人脸总数
  pub faces: usize,
  /// 等待超时的次数
  pub timeouts: usize,
}

/// 逐帧处理直到输入结束、达到帧数上限或收到停止信号
///
/// 停止标志每帧检查一次。
#[derive(Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  stop: Arc<AtomicBool>,
  active: Arc<AtomicBool>,
  gallery_reload: Option<Duration>,
  handle_signals: bool,
}

impl Default for ContinuousTask {
  fn default() -> Self {
    Self {
      frame_number: None,
      stop: Arc::new(AtomicBool::new(false)),
      active: Arc::new(AtomicBool::new(true)),
      gallery_reload: None,
      handle_signals: false,
    }
  }
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 收到 Ctrl-C 时设置停止标志
  pub fn with_signal_handler(mut self, handle_signals: bool) -> Self {
    self.handle_signals = handle_signals;
    self
  }

  pub fn with_active(self, active: bool) -> Self {
    self.active.store(active, Ordering::SeqCst);
    self
  }

  /// 按给定间隔重新加载图库
  pub fn with_gallery_reload(mut self, interval: Option<Duration>) -> Self {
    self.gallery_reload = interval;
    self
  }

  pub fn stop_handle(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  /// 运行中切换是否持久化与告警
  pub fn active_handle(&self) -> Arc<AtomicBool> {
    self.active.clone()
  }

  fn install_signal_handler(&self) -> anyhow::Result<()> {
    let stop = self.stop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      stop.store(true, Ordering::SeqCst);
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(())
  }
}

impl<'a, E, O> Task<ThreadedCapture, &'a mut RecognitionPipeline<E>, O> for ContinuousTask
where
  E: FaceEngine,
  O: Render<Frame, FrameReport>,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;
  type Output = TaskSummary;

  fn run_task(
    self,
    mut input: ThreadedCapture,
    pipeline: &'a mut RecognitionPipeline<E>,
    output: O,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    if self.handle_signals {
      self.install_signal_handler()?;
    }

    let mut summary = TaskSummary::default();
    let mut last_reload = Instant::now();

    while !self.stop.load(Ordering::SeqCst) {
      let frame = match input.read() {
        CaptureRead::Frame(frame) => frame,
        CaptureRead::NoFrame => {
          debug!("等待帧超时");
          summary.timeouts += 1;
          continue;
        }
        CaptureRead::Closed => {
          info!("输入已结束");
          break;
        }
      };

      if let Some(interval) = self.gallery_reload
        && last_reload.elapsed() >= interval
      {
        if let Err(e) = pipeline.gallery().reload() {
          warn!("图库重新加载失败，继续使用旧图库: {}", e);
        }
        last_reload = Instant::now();
      }

      summary.frames += 1;
      debug!("处理第 {} 帧图像 (采集序号 {})", summary.frames, frame.index);

      let active = self.active.load(Ordering::SeqCst);
      let now = Instant::now();
      let result = pipeline.process(&frame.image, active);
      let elapsed_a = now.elapsed();

      if !result.processed {
        summary.skipped += 1;
      }
      summary.faces += result.faces.len();

      let report = FrameReport {
        result,
        monitors: pipeline.monitor_snapshots(),
        active,
      };
      if let Err(e) = output.render_result(&frame, &report) {
        warn!("渲染失败: {}", e);
      }
      let elapsed_b = now.elapsed();
      debug!("识别耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);

      if self.frame_number.map(|n| summary.frames >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
    }

    if self.stop.load(Ordering::SeqCst) {
      warn!("收到停止信号，退出任务循环");
    }
    input.stop();
    info!(
      "任务完成: {} 帧, 跳过 {} 帧, {} 张人脸",
      summary.frames, summary.skipped, summary.faces
    );
    Ok(summary)
  }
}
