// 该文件是 Huoyan （火眼） 项目的一部分。
// src/predict.rs - 单张图像推理
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

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::{ConfidenceThreshold, Config},
  frame::BgrFrame,
  input::{DecodeError, Upload, UploadError, decode_bgr},
  model::Model,
};

#[derive(Error, Debug)]
pub enum PredictError<E: std::error::Error + 'static> {
  #[error("上传被拒绝: {0}")]
  Upload(#[from] UploadError),
  #[error("图像解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理失败: {0}")]
  Inference(#[source] E),
}

/// 解码并推理一张图像，返回结果集与解码后的原图
///
/// 推理错误不在这里处理，原样交给调用方。
pub fn predict<M>(
  model: &M,
  bytes: &[u8],
  confidence: ConfidenceThreshold,
) -> Result<(M::Output, BgrFrame), PredictError<M::Error>>
where
  M: Model<Input = BgrFrame>,
  M::Error: std::error::Error + 'static,
{
  let frame = decode_bgr(bytes)?;
  debug!("输入图像 {}x{}, 开始推理...", frame.width(), frame.height());

  let now = Instant::now();
  let result = model
    .infer(&frame, confidence)
    .map_err(PredictError::Inference)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  Ok((result, frame))
}

/// 先按配置检查文件后缀，再执行 [`predict`]
pub fn predict_upload<M>(
  model: &M,
  upload: &Upload,
  config: &Config,
) -> Result<(M::Output, BgrFrame), PredictError<M::Error>>
where
  M: Model<Input = BgrFrame>,
  M::Error: std::error::Error + 'static,
{
  upload.check(config)?;
  predict(model, &upload.bytes, config.confidence_threshold)
}
