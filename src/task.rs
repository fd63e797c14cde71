// 该文件是 Huoyan （火眼） 项目的一部分。
// src/task.rs - 推理任务
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

use std::{thread, time::Duration};

use image::RgbImage;
use tracing::{info, warn};

use crate::{
  config::Config,
  frame::BgrFrame,
  input::{CaptureSource, Upload},
  model::{DetectResult, Model, WithLabel},
  output::{Render, draw::Draw},
  predict::predict_upload,
  stream::{StopHandle, stream},
};

const FORCE_EXIT_GRACE: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 对每个上传的图像做一次推理
pub struct OneShotTask {
  config: Config,
  draw: Draw,
}

impl OneShotTask {
  pub fn new(config: Config, draw: Draw) -> Self {
    Self { config, draw }
  }
}

impl<I, M, O, T, ME, RE> Task<I, M, O> for OneShotTask
where
  I: Iterator<Item = Upload>,
  M: Model<Input = BgrFrame, Output = DetectResult<T>, Error = ME>,
  O: Render<RgbImage, DetectResult<T>, Error = RE>,
  T: WithLabel,
  ME: std::error::Error + Send + Sync + 'static,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut count = 0usize;
    for upload in input {
      let (result, frame) = predict_upload(&model, &upload, &self.config)?;
      let annotated = self.draw.annotate(&frame, &result);
      output.render_result(&annotated, &result)?;
      count += 1;
    }

    if count == 0 {
      anyhow::bail!("没有输入图像");
    }
    info!("任务完成，共处理 {} 张图像", count);
    Ok(())
  }
}

/// 在摄像头流上持续推理，直到采集结束、达到帧数或收到中断信号
#[derive(Debug)]
pub struct ContinuousTask {
  config: Config,
  draw: Draw,
  frame_number: Option<usize>,
  stop: StopHandle,
  handle_ctrlc: bool,
}

impl ContinuousTask {
  pub fn new(config: Config, draw: Draw) -> Self {
    Self {
      config,
      draw,
      frame_number: None,
      stop: StopHandle::new(),
      handle_ctrlc: false,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number.filter(|n| *n > 0);
    self
  }

  /// 安装 Ctrl-C 处理函数，收到信号后在下一次采集前停止
  pub fn with_ctrlc(mut self) -> Self {
    self.handle_ctrlc = true;
    self
  }

  fn install_ctrlc(&self) -> anyhow::Result<()> {
    let stop = self.stop.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      stop.stop();
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_GRACE);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(())
  }
}

impl<S, M, O, T, ME, RE> Task<S, M, O> for ContinuousTask
where
  S: CaptureSource,
  M: Model<Input = BgrFrame, Output = DetectResult<T>, Error = ME>,
  O: Render<RgbImage, DetectResult<T>, Error = RE>,
  T: WithLabel,
  ME: std::error::Error + Send + Sync + 'static,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: S, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    if self.handle_ctrlc {
      self.install_ctrlc()?;
    }

    let mut frames = stream(model, input, self.config.confidence_threshold)
      .configure(&self.config)
      .with_draw(self.draw)
      .with_stop_handle(self.stop);

    let mut frame_index = 0usize;
    let mut total_detections = 0usize;
    for item in frames.by_ref() {
      let (annotated, result) = item?;
      frame_index += 1;
      total_detections += result.len();
      output.render_result(&annotated, &result)?;

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
    }
    frames.release();

    info!(
      "任务完成，共处理 {} 帧, 检测到 {} 个目标",
      frame_index, total_detections
    );
    Ok(())
  }
}
