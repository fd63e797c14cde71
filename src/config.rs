// 该文件是 Huoyan （火眼） 项目的一部分。
// src/config.rs - 运行配置
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

use std::{
  fmt,
  path::{Path, PathBuf},
  time::Duration,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_MODEL_PATH: &str = "models/computer_vision_model.onnx";
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
pub const DEFAULT_MAX_DETECTIONS: usize = 300;
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
pub const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SLOW_INFERENCE_MS: u64 = 1_000;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("置信度阈值必须位于 (0, 1] 区间, 实际为 {0}")]
  InvalidConfidence(f32),
  #[error("IoU 阈值必须位于 (0, 1] 区间, 实际为 {0}")]
  InvalidIou(f32),
  #[error("最大检测数必须大于 0")]
  InvalidMaxDetections,
  #[error("采集超时必须大于 0 毫秒")]
  InvalidCaptureTimeout,
  #[error("读取配置文件错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("解析配置文件错误: {0}")]
  ParseError(#[from] serde_json::Error),
}

/// 置信度阈值，取值范围 (0, 1]
///
/// 低于阈值的检测结果由推理调用自身过滤，调用方拿到的结果集都满足
/// `score >= threshold`。
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Deserialize)]
#[serde(try_from = "f32")]
pub struct ConfidenceThreshold(f32);

impl ConfidenceThreshold {
  pub fn new(value: f32) -> Result<Self, ConfigError> {
    if value > 0.0 && value <= 1.0 {
      Ok(Self(value))
    } else {
      Err(ConfigError::InvalidConfidence(value))
    }
  }

  pub fn value(self) -> f32 {
    self.0
  }

  pub fn admits(self, score: f32) -> bool {
    score >= self.0
  }
}

impl Default for ConfidenceThreshold {
  fn default() -> Self {
    Self(DEFAULT_CONFIDENCE_THRESHOLD)
  }
}

impl TryFrom<f32> for ConfidenceThreshold {
  type Error = ConfigError;

  fn try_from(value: f32) -> Result<Self, Self::Error> {
    Self::new(value)
  }
}

impl fmt::Display for ConfidenceThreshold {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}", self.0)
  }
}

/// 运行配置
///
/// 所有组件都通过参数拿到配置，不存在进程级的全局状态。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// ONNX 模型文件路径
  pub model_path: PathBuf,
  /// 置信度阈值
  pub confidence_threshold: ConfidenceThreshold,
  /// NMS IoU 阈值
  pub iou_threshold: f32,
  /// 单张图像最多保留的检测数
  pub max_detections: usize,
  /// 允许上传的文件后缀
  pub allowed_extensions: Vec<String>,
  /// 摄像头设备编号
  pub device_index: u32,
  /// 单帧采集超时（毫秒）
  pub capture_timeout_ms: u64,
  /// 推理耗时告警线（毫秒）
  pub slow_inference_ms: u64,
  /// 标注用字体文件，未设置时只绘制边框
  pub font_path: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      model_path: PathBuf::from(DEFAULT_MODEL_PATH),
      confidence_threshold: ConfidenceThreshold::default(),
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_detections: DEFAULT_MAX_DETECTIONS,
      allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect(),
      device_index: 0,
      capture_timeout_ms: DEFAULT_CAPTURE_TIMEOUT_MS,
      slow_inference_ms: DEFAULT_SLOW_INFERENCE_MS,
      font_path: None,
    }
  }
}

impl Config {
  /// 从 JSON 文件加载配置，缺省字段取默认值
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::from_json(&content)
  }

  pub fn from_json(content: &str) -> Result<Self, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    config.validate()?;
    debug!("配置内容: {:?}", config);
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
      return Err(ConfigError::InvalidIou(self.iou_threshold));
    }
    if self.max_detections == 0 {
      return Err(ConfigError::InvalidMaxDetections);
    }
    // 超时为 0 时 V4L2 轮询立即返回，第一帧就会结束
    if self.capture_timeout_ms == 0 {
      return Err(ConfigError::InvalidCaptureTimeout);
    }
    Ok(())
  }

  /// 后缀比较忽略大小写，允许带前导点
  pub fn is_allowed_extension(&self, extension: &str) -> bool {
    let extension = extension.trim_start_matches('.');
    self
      .allowed_extensions
      .iter()
      .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(extension))
  }

  pub fn capture_timeout(&self) -> Duration {
    Duration::from_millis(self.capture_timeout_ms)
  }

  pub fn slow_inference(&self) -> Duration {
    Duration::from_millis(self.slow_inference_ms)
  }
}
