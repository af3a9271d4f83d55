// 该文件是 Menshen （门神） 项目的一部分。
// src/input/capture.rs - 独立线程采集与有界帧队列
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

//! 采集线程只负责读帧，队列满时丢弃最旧的帧；消费者总是拿到最新的一帧。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::{debug, info, warn};

use super::{Frame, FrameSource, InputError};
use crate::config::CaptureSettings;

/// 读取失败后的退避时间
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// 一次读取的结果
#[derive(Debug)]
pub enum CaptureRead {
  Frame(Frame),
  /// 等待超时，没有新帧
  NoFrame,
  /// 采集线程已结束且队列已空
  Closed,
}

pub struct ThreadedCapture {
  rx: Receiver<Frame>,
  stop: Arc<AtomicBool>,
  handle: Option<JoinHandle<()>>,
  read_timeout: Duration,
}

impl ThreadedCapture {
  pub fn start<S: FrameSource + 'static>(
    source: S,
    settings: &CaptureSettings,
  ) -> Result<Self, InputError> {
    let depth = settings.queue_depth.clamp(1, 2);
    let (tx, rx) = bounded::<Frame>(depth);
    let stop = Arc::new(AtomicBool::new(false));

    let handle = {
      let stop = stop.clone();
      let drain = rx.clone();
      thread::Builder::new()
        .name("menshen-capture".to_string())
        .spawn(move || produce(source, tx, drain, stop))?
    };
    info!("采集线程已启动，队列深度 {}", depth);

    Ok(Self {
      rx,
      stop,
      handle: Some(handle),
      read_timeout: settings.read_timeout(),
    })
  }

  /// 在超时时间内等待一帧，并丢弃积压的旧帧
  pub fn read(&self) -> CaptureRead {
    match self.rx.recv_timeout(self.read_timeout) {
      Ok(mut frame) => {
        while let Ok(newer) = self.rx.try_recv() {
          debug!("丢弃积压帧 {}", frame.index);
          frame = newer;
        }
        CaptureRead::Frame(frame)
      }
      Err(RecvTimeoutError::Timeout) => CaptureRead::NoFrame,
      Err(RecvTimeoutError::Disconnected) => CaptureRead::Closed,
    }
  }

  pub fn stop_handle(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  /// 通知采集线程退出并等待其结束
  pub fn stop(&mut self) {
    self.stop.store(true, Ordering::SeqCst);
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        warn!("采集线程异常退出");
      } else {
        info!("采集线程已停止");
      }
    }
  }
}

impl Drop for ThreadedCapture {
  fn drop(&mut self) {
    self.stop();
  }
}

fn produce<S: FrameSource>(
  mut source: S,
  tx: Sender<Frame>,
  drain: Receiver<Frame>,
  stop: Arc<AtomicBool>,
) {
  let mut index = 0u64;
  while !stop.load(Ordering::SeqCst) {
    let image = match source.read_frame() {
      Ok(Some(image)) => image,
      Ok(None) => {
        info!("输入结束，共采集 {} 帧", index);
        break;
      }
      Err(e) => {
        warn!("读取帧失败: {}", e);
        thread::sleep(ERROR_BACKOFF);
        continue;
      }
    };

    index += 1;
    let mut frame = Frame {
      image,
      index,
      captured_at: Local::now(),
    };

    loop {
      match tx.try_send(frame) {
        Ok(()) => break,
        Err(TrySendError::Full(rejected)) => {
          if let Ok(old) = drain.try_recv() {
            debug!("队列已满，丢弃帧 {}", old.index);
          }
          frame = rejected;
        }
        Err(TrySendError::Disconnected(_)) => return,
      }
    }
  }
  // source 在此处释放
}
