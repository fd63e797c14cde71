// 该文件是 Huoyan （火眼） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Parser, Subcommand};
use url::Url;

use huoyan::{ConfidenceThreshold, Config};

/// Huoyan 火焰检测命令行
#[derive(Parser, Debug)]
#[command(name = "huoyan", author, version, about, long_about = None)]
pub struct Args {
  /// JSON 配置文件路径
  #[arg(long, value_name = "FILE", global = true)]
  pub config: Option<PathBuf>,

  /// ONNX 模型文件路径，覆盖配置文件
  #[arg(long, value_name = "MODEL", global = true)]
  pub model: Option<PathBuf>,

  /// 置信度阈值 (0.0, 1.0]，覆盖配置文件
  #[arg(long, value_name = "THRESHOLD", global = true)]
  pub confidence: Option<f32>,

  /// 额外的输出，可以重复指定
  /// 支持格式:
  /// - image:///path/to/out.png
  /// - folder:///path/to/dir?always&record=name
  /// - console:?quiet
  #[arg(long, value_name = "OUTPUT", global = true)]
  pub output: Vec<Url>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 对单张图像做一次检测
  Image {
    /// 图像文件路径
    #[arg(long, value_name = "FILE")]
    input: PathBuf,
  },
  /// 在摄像头画面上持续检测
  Camera {
    /// 摄像头设备编号，覆盖配置文件
    #[arg(long, value_name = "INDEX")]
    device: Option<u32>,

    /// 最大处理帧数，0 表示无限制
    #[arg(long, value_name = "COUNT", default_value_t = 0)]
    max_frames: usize,
  },
}

impl Args {
  /// 默认值、配置文件、命令行参数依次覆盖
  pub fn to_config(&self) -> anyhow::Result<Config> {
    let mut config = match &self.config {
      Some(path) => Config::from_file(path)?,
      None => Config::default(),
    };

    if let Some(model) = &self.model {
      config.model_path = model.clone();
    }
    if let Some(confidence) = self.confidence {
      config.confidence_threshold = ConfidenceThreshold::new(confidence)?;
    }
    if let Command::Camera {
      device: Some(device),
      ..
    } = &self.command
    {
      config.device_index = *device;
    }

    config.validate()?;
    Ok(config)
  }
}
