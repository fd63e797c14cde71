// 该文件是 Huoyan （火眼） 项目的一部分。
// src/stream.rs - 摄像头流式推理
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

//! 拉取式的采集-推理循环。
//!
//! 每次 `next()` 依次执行：检查停止信号、采集一帧、推理、绘制标注并转为
//! RGB，然后把 `(标注帧, 结果集)` 交给调用方。循环本身不缓存任何帧，
//! 消费方慢只会推迟下一次采集。
//!
//! 采集失败视为流正常结束；推理失败会作为一个 `Err` 交出，随后流结束。
//! 无论以哪种方式退出（采集结束、停止信号、推理失败、迭代器被丢弃），
//! 采集源都只会被释放一次。

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{debug, error, info, trace, warn};

use crate::{
  config::{ConfidenceThreshold, Config, DEFAULT_SLOW_INFERENCE_MS},
  frame::BgrFrame,
  input::CaptureSource,
  model::{DetectResult, Model, WithLabel},
  output::draw::Draw,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
  Idle,
  Capturing,
  Captured,
  Inferring,
  Emitting,
  Released,
}

/// 停止信号，可跨线程克隆（例如交给 Ctrl-C 处理函数）
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

pub struct DetectionStream<M, S: CaptureSource> {
  model: M,
  source: Option<S>,
  confidence: ConfidenceThreshold,
  draw: Draw,
  stop: StopHandle,
  slow_inference: Duration,
  state: StreamState,
  frames_emitted: u64,
}

/// 在采集源上建立推理流
///
/// 流只能向前消费，想重新开始需要重新创建。
pub fn stream<M, S>(model: M, source: S, confidence: ConfidenceThreshold) -> DetectionStream<M, S>
where
  S: CaptureSource,
{
  DetectionStream {
    model,
    source: Some(source),
    confidence,
    draw: Draw::default(),
    stop: StopHandle::new(),
    slow_inference: Duration::from_millis(DEFAULT_SLOW_INFERENCE_MS),
    state: StreamState::Idle,
    frames_emitted: 0,
  }
}

impl<M, S: CaptureSource> DetectionStream<M, S> {
  /// 按配置设置阈值与耗时告警线
  pub fn configure(mut self, config: &Config) -> Self {
    self.confidence = config.confidence_threshold;
    self.slow_inference = config.slow_inference();
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
    self.stop = stop;
    self
  }

  pub fn state(&self) -> StreamState {
    self.state
  }

  pub fn frames_emitted(&self) -> u64 {
    self.frames_emitted
  }

  /// 释放采集源，重复调用无副作用
  pub fn release(&mut self) {
    if let Some(mut source) = self.source.take() {
      source.release();
      info!("采集源已释放, 共输出 {} 帧", self.frames_emitted);
    }
    self.transition(StreamState::Released);
  }

  fn transition(&mut self, state: StreamState) {
    trace!("{:?} -> {:?}", self.state, state);
    self.state = state;
  }
}

impl<M, S, T> Iterator for DetectionStream<M, S>
where
  M: Model<Input = BgrFrame, Output = DetectResult<T>>,
  M::Error: std::fmt::Display,
  S: CaptureSource,
  T: WithLabel,
{
  type Item = Result<(RgbImage, DetectResult<T>), M::Error>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.state == StreamState::Released {
      return None;
    }

    // 停止信号在每次采集之前检查
    if self.stop.is_stopped() {
      info!("收到停止信号，结束推理流");
      self.release();
      return None;
    }

    self.transition(StreamState::Capturing);
    let read = self.source.as_mut()?.read_frame();
    let frame = match read {
      Ok(frame) => frame,
      Err(e) => {
        info!("采集结束: {}", e);
        self.release();
        return None;
      }
    };
    self.transition(StreamState::Captured);

    self.transition(StreamState::Inferring);
    let now = Instant::now();
    let result = match self.model.infer(&frame, self.confidence) {
      Ok(result) => result,
      Err(e) => {
        error!("第 {} 帧推理失败: {}", self.frames_emitted + 1, e);
        self.release();
        return Some(Err(e));
      }
    };
    let elapsed = now.elapsed();
    if elapsed > self.slow_inference {
      warn!("推理耗时过长: {:.2?}", elapsed);
    }

    let annotated = self.draw.annotate(&frame, &result);

    self.frames_emitted += 1;
    debug!(
      "第 {} 帧: {} 个目标, 推理耗时 {:.2?}",
      self.frames_emitted,
      result.len(),
      elapsed
    );
    self.transition(StreamState::Emitting);
    Some(Ok((annotated, result)))
  }
}

impl<M, S: CaptureSource> Drop for DetectionStream<M, S> {
  fn drop(&mut self) {
    self.release();
  }
}
