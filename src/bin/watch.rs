// 该文件是 Menshen （门神） 项目的一部分。
// src/bin/watch.rs - 持续识别摄像头画面并告警
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

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use menshen::{
  FromUrl,
  config::Settings,
  engine::ReplayEngine,
  gallery::{EmptyGallery, Gallery, GallerySource, JsonGalleryFile},
  input::{InputWrapper, ThreadedCapture},
  output::OutputWrapper,
  pipeline::RecognitionPipeline,
  sink::{AlertNotifier, LogSink, SinkWrapper},
  task::{ContinuousTask, Task},
};

/// Menshen 运行参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源，例如 image:///data/frames?fps=10
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 人脸引擎，例如 replay:///data/faces.jsonl?metric=cosine
  #[arg(long, value_name = "ENGINE")]
  pub engine: Url,
  /// 已知人脸图库，例如 gallery:///data/known.json
  #[arg(long, value_name = "GALLERY")]
  pub gallery: Option<Url>,
  /// 事件汇
  #[arg(long, value_name = "SINK", default_value = "log://")]
  pub sink: Url,
  /// 输出，例如 folder:///var/lib/menshen?record
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// JSON 配置文件
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// 只识别，不记录事件也不告警
  #[arg(long, default_value_t = false)]
  pub inactive: bool,
  /// 图库重新加载间隔（秒）
  #[arg(long, value_name = "SECONDS")]
  pub gallery_reload_secs: Option<u64>,
  /// 陌生人告警时写一条告警日志
  #[arg(long, default_value_t = false)]
  pub notify: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("人脸引擎: {}", args.engine);
  info!("事件汇: {}", args.sink);
  info!("输出: {}", args.output);

  let settings = match args.config.as_ref() {
    Some(path) => Settings::from_json_file(path)?,
    None => Settings::default(),
  };

  let source: Box<dyn GallerySource> = match args.gallery.as_ref() {
    Some(url) => Box::new(JsonGalleryFile::from_url(url)?),
    None => Box::new(EmptyGallery),
  };
  let gallery = Arc::new(Gallery::load(source)?);

  let sink = Arc::new(SinkWrapper::from_url(&args.sink)?);
  let notifier: Option<Arc<dyn AlertNotifier>> = if args.notify {
    Some(Arc::new(LogSink))
  } else {
    None
  };

  let engine = ReplayEngine::from_url(&args.engine)?;
  let mut pipeline = RecognitionPipeline::new(engine, gallery, &settings, sink, notifier);

  let input = InputWrapper::from_url(&args.input)?;
  let capture = ThreadedCapture::start(input, &settings.capture)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let summary = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_active(!args.inactive)
    .with_gallery_reload(args.gallery_reload_secs.map(Duration::from_secs))
    .with_signal_handler(true)
    .run_task(capture, &mut pipeline, output)?;

  info!(
    "共处理 {} 帧，识别 {} 张人脸，跳过 {} 帧",
    summary.frames, summary.faces, summary.skipped
  );
  Ok(())
}
