// 该文件是 Huoyan （火眼） 项目的一部分。
// src/input/decode.rs - 上传图像解码
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
use tracing::{debug, warn};

use crate::{config::Config, frame::BgrFrame};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("Empty image buffer")]
  Empty,
  #[error("Image decoding error: {0}")]
  ImageError(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("File extension '{extension}' is not allowed, expected one of {allowed:?}")]
  ExtensionRejected {
    extension: String,
    allowed: Vec<String>,
  },
}

/// 上传的原始字节及其声明的文件后缀
#[derive(Debug, Clone)]
pub struct Upload {
  pub bytes: Vec<u8>,
  pub extension: String,
}

impl Upload {
  pub fn new(bytes: Vec<u8>, extension: impl Into<String>) -> Self {
    Self {
      bytes,
      extension: extension.into(),
    }
  }

  /// 后缀不在允许列表中的上传在解码之前就被拒绝
  pub fn check(&self, config: &Config) -> Result<(), UploadError> {
    if config.is_allowed_extension(&self.extension) {
      Ok(())
    } else {
      warn!("拒绝上传, 文件后缀: {}", self.extension);
      Err(UploadError::ExtensionRejected {
        extension: self.extension.clone(),
        allowed: config.allowed_extensions.clone(),
      })
    }
  }
}

/// 解码 JPEG/PNG 字节为 BGR 帧
pub fn decode_bgr(bytes: &[u8]) -> Result<BgrFrame, DecodeError> {
  if bytes.is_empty() {
    return Err(DecodeError::Empty);
  }

  let image = image::load_from_memory(bytes)?.to_rgb8();
  debug!("解码图像: {}x{}", image.width(), image.height());
  Ok(BgrFrame::from_rgb_image(&image))
}
