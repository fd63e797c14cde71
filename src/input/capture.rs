// 该文件是 Huoyan （火眼） 项目的一部分。
// src/input/capture.rs - 采集设备接口
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

use thiserror::Error;

use crate::frame::BgrFrame;

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("无法打开设备: {0}")]
  OpenFailed(String),
  #[error("采集源已释放")]
  Released,
  #[error("采集超时")]
  Timeout,
  #[error("采集流结束")]
  EndOfStream,
  #[error("采集失败: {0}")]
  ReadFailed(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 可按编号打开的采集设备
pub trait CaptureDevice {
  type Source: CaptureSource;

  fn open(&self, index: u32) -> Result<Self::Source, CaptureError>;
}

/// 已打开的采集源
///
/// `read_frame` 失败即视为流结束。`release` 可以重复调用，
/// 但只有第一次会真正释放设备。
pub trait CaptureSource {
  fn read_frame(&mut self) -> Result<BgrFrame, CaptureError>;
  fn release(&mut self);
}

impl<S: CaptureSource + ?Sized> CaptureSource for Box<S> {
  fn read_frame(&mut self) -> Result<BgrFrame, CaptureError> {
    (**self).read_frame()
  }

  fn release(&mut self) {
    (**self).release()
  }
}
