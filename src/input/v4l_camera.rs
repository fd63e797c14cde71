// 该文件是 Huoyan （火眼） 项目的一部分。
// src/input/v4l_camera.rs - V4L2 摄像头采集
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

use std::{io::ErrorKind, pin::Pin, time::Duration};

use tracing::{debug, info};
use v4l::{
  FourCC, buffer::Type, io::mmap::Stream, io::traits::CaptureStream, prelude::*, video::Capture,
};

use crate::{
  frame::BgrFrame,
  input::{CaptureDevice, CaptureError, CaptureSource},
};

const V4L_DEFAULT_WIDTH: u32 = 640;
const V4L_DEFAULT_HEIGHT: u32 = 480;
const V4L_BUFFER_COUNT: u32 = 4;

/// V4L2 摄像头，按编号打开 `/dev/video{index}`
#[derive(Debug, Clone)]
pub struct V4lCamera {
  width: u32,
  height: u32,
  timeout: Duration,
}

impl V4lCamera {
  pub fn new(timeout: Duration) -> Self {
    Self {
      width: V4L_DEFAULT_WIDTH,
      height: V4L_DEFAULT_HEIGHT,
      timeout,
    }
  }
}

impl CaptureDevice for V4lCamera {
  type Source = V4lCaptureSource;

  fn open(&self, index: u32) -> Result<Self::Source, CaptureError> {
    V4lCaptureSource::open(index, self.width, self.height, self.timeout)
  }
}

/// 已打开的 V4L2 采集源
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box<Device>> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4lCaptureSource {
  // 字段顺序即 drop 顺序：stream 必须先于 device 释放
  stream: Option<Stream<'static>>,
  device: Option<Pin<Box<Device>>>,
  index: u32,
  width: u32,
  height: u32,
  // 每行字节数，驱动可能在行尾填充
  stride: u32,
}

impl V4lCaptureSource {
  fn open(index: u32, width: u32, height: u32, timeout: Duration) -> Result<Self, CaptureError> {
    info!("打开摄像头 /dev/video{}", index);
    let device = Box::pin(
      Device::new(index as usize)
        .map_err(|e| CaptureError::OpenFailed(format!("/dev/video{}: {}", index, e)))?,
    );

    // 设置视频格式
    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(CaptureError::OpenFailed(format!(
        "设备不支持 YUYV 格式, 实际为 {}",
        format.fourcc
      )));
    }
    debug!(
      "摄像头格式: {}x{} {}, 行宽 {} 字节",
      format.width, format.height, format.fourcc, format.stride
    );

    // SAFETY: device 被 Pin<Box> 固定在堆上，不会移动；
    // stream 与 device 存放在同一结构体中，release 与 drop 都先释放 stream。
    let device_ref: &Device = &device;
    let mut stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, V4L_BUFFER_COUNT)?
    };
    stream.set_timeout(timeout);

    Ok(Self {
      stream: Some(stream),
      device: Some(device),
      index,
      width: format.width,
      height: format.height,
      stride: format.stride,
    })
  }
}

/// 将 YUYV 格式转换为 BGR
///
/// `stride` 小于 `width * 2` 时按紧凑排列处理。
pub(crate) fn yuyv_to_bgr(yuyv: &[u8], width: u32, height: u32, stride: u32) -> Option<BgrFrame> {
  let row_bytes = width as usize * 2;
  let stride = (stride as usize).max(row_bytes);
  if height == 0 || yuyv.len() < stride * (height as usize - 1) + row_bytes {
    return None;
  }

  let mut bgr = Vec::with_capacity(width as usize * height as usize * 3);
  for row in yuyv.chunks(stride).take(height as usize) {
    for chunk in row[..row_bytes].chunks_exact(4) {
      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for y in [y0, y1] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        bgr.extend_from_slice(&[b, g, r]);
      }
    }
  }

  BgrFrame::from_raw(width, height, bgr).ok()
}

impl CaptureSource for V4lCaptureSource {
  fn read_frame(&mut self) -> Result<BgrFrame, CaptureError> {
    let stream = self.stream.as_mut().ok_or(CaptureError::Released)?;

    let (buffer, meta) = stream.next().map_err(|e| match e.kind() {
      ErrorKind::TimedOut | ErrorKind::WouldBlock => CaptureError::Timeout,
      _ => CaptureError::ReadFailed(e.to_string()),
    })?;
    debug!("采集帧 #{}: {} 字节", meta.sequence, buffer.len());

    yuyv_to_bgr(buffer, self.width, self.height, self.stride).ok_or_else(|| {
      CaptureError::ReadFailed(format!(
        "帧数据长度不足: {} 字节, 行宽 {} x {} 行",
        buffer.len(),
        self.stride,
        self.height
      ))
    })
  }

  fn release(&mut self) {
    if self.stream.is_none() && self.device.is_none() {
      return;
    }
    // 先释放 stream 再释放 device
    self.stream.take();
    self.device.take();
    info!("摄像头 /dev/video{} 已释放", self.index);
  }
}

impl Drop for V4lCaptureSource {
  fn drop(&mut self) {
    self.release();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gray_yuyv_converts_to_gray_bgr() {
    let yuyv = [128u8, 128, 128, 128].repeat(2);
    let frame = yuyv_to_bgr(&yuyv, 4, 1, 8).unwrap();
    assert_eq!(frame.pixel(0, 0), [128, 128, 128]);
    assert_eq!(frame.pixel(3, 0), [128, 128, 128]);
  }

  #[test]
  fn short_buffer_is_rejected() {
    assert!(yuyv_to_bgr(&[0u8; 6], 4, 1, 8).is_none());
    // 两行、行宽 12 字节：至少需要 12 + 8 字节
    assert!(yuyv_to_bgr(&[128u8; 19], 4, 2, 12).is_none());
  }

  #[test]
  fn padded_rows_are_skipped() {
    // 每行 2 像素 (4 字节) + 4 字节填充；第二行亮度 255
    let mut yuyv = Vec::new();
    yuyv.extend_from_slice(&[0, 128, 0, 128]);
    yuyv.extend_from_slice(&[77; 4]);
    yuyv.extend_from_slice(&[255, 128, 255, 128]);
    yuyv.extend_from_slice(&[77; 4]);

    let frame = yuyv_to_bgr(&yuyv, 2, 2, 8).unwrap();
    assert_eq!(frame.pixel(0, 0), [0, 0, 0]);
    assert_eq!(frame.pixel(1, 0), [0, 0, 0]);
    assert_eq!(frame.pixel(0, 1), [255, 255, 255]);
    assert_eq!(frame.pixel(1, 1), [255, 255, 255]);
  }

  #[test]
  fn tight_stride_is_accepted() {
    let yuyv = [128u8; 16];
    let frame = yuyv_to_bgr(&yuyv, 2, 4, 0).unwrap();
    assert_eq!((frame.width(), frame.height()), (2, 4));
  }
}
