// 该文件是 Huoyan （火眼） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use url::Url;

use huoyan::{
  FromUrl, load_model,
  input::ImageFileInput,
  output::{OutputWrapper, draw::Draw},
  task::{ContinuousTask, OneShotTask, Task},
};

use crate::args::{Args, Command};

fn build_outputs(urls: &[Url]) -> Result<Vec<OutputWrapper>> {
  let mut outputs = Vec::with_capacity(urls.len() + 1);
  if !urls.iter().any(|url| url.scheme() == "console") {
    outputs.push(OutputWrapper::Console(Default::default()));
  }
  for url in urls {
    let output = OutputWrapper::from_url(url).with_context(|| format!("无法创建输出: {}", url))?;
    outputs.push(output);
  }
  Ok(outputs)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.to_config()?;

  info!("模型文件路径: {}", config.model_path.display());
  info!("置信度阈值: {}", config.confidence_threshold);

  let model = load_model(&config)
    .with_context(|| format!("加载模型失败: {}", config.model_path.display()))?;
  info!("模型加载完成");

  let draw = Draw::from_config(&config)?;
  let outputs = build_outputs(&args.output)?;

  match args.command {
    Command::Image { input } => {
      info!("输入图像: {}", input.display());
      let input =
        ImageFileInput::open(&input).with_context(|| format!("无法读取图像: {}", input.display()))?;
      OneShotTask::new(config, draw).run_task(input, &model, outputs)
    }
    Command::Camera { max_frames, .. } => run_camera(config, draw, &model, outputs, max_frames),
  }
}

#[cfg(feature = "v4l_input")]
fn run_camera(
  config: huoyan::Config,
  draw: Draw,
  model: &huoyan::ModelHandle,
  outputs: Vec<OutputWrapper>,
  max_frames: usize,
) -> Result<()> {
  use huoyan::input::{CaptureDevice, V4lCamera};

  info!("打开摄像头: /dev/video{}", config.device_index);
  let source = V4lCamera::new(config.capture_timeout())
    .open(config.device_index)
    .with_context(|| format!("无法打开摄像头 {}", config.device_index))?;

  ContinuousTask::new(config, draw)
    .with_frame_number(Some(max_frames))
    .with_ctrlc()
    .run_task(source, model, outputs)
}

#[cfg(not(feature = "v4l_input"))]
fn run_camera(
  _config: huoyan::Config,
  _draw: Draw,
  _model: &huoyan::ModelHandle,
  _outputs: Vec<OutputWrapper>,
  _max_frames: usize,
) -> Result<()> {
  anyhow::bail!("未启用 v4l_input 特性，无法使用摄像头")
}
