// 该文件是 Huoyan （火眼） 项目的一部分。
// src/output/console.rs - 控制台检测摘要
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

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, WithLabel},
  output::Render,
};

#[derive(Error, Debug)]
pub enum ConsoleOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 把每次推理的结果写到日志里
///
/// `console:?quiet` 时不输出空结果。
#[derive(Debug, Default)]
pub struct ConsoleOutput {
  quiet: bool,
}

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConsoleOutputError::SchemeMismatch);
    }

    Ok(ConsoleOutput {
      quiet: url.query_pairs().any(|(k, _)| k == "quiet"),
    })
  }
}

/// 生成检测摘要，每行一条
pub fn summarize<T: WithLabel>(result: &DetectResult<T>) -> Vec<String> {
  if result.is_empty() {
    return vec!["未检测到火焰".to_string()];
  }

  let mut lines = Vec::with_capacity(result.len() + 1);
  lines.push(format!("检测到火焰! 共 {} 个区域", result.len()));
  for (index, item) in result.iter().enumerate() {
    lines.push(format!(
      "检测 {}: {} 置信度 {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
      index + 1,
      item.kind.to_label_str(),
      item.score * 100.0,
      item.bbox[0],
      item.bbox[1],
      item.width(),
      item.height()
    ));
  }
  lines
}

impl<T: WithLabel> Render<RgbImage, DetectResult<T>> for ConsoleOutput {
  type Error = ConsoleOutputError;

  fn render_result(&self, _frame: &RgbImage, result: &DetectResult<T>) -> Result<(), Self::Error> {
    if result.is_empty() {
      if !self.quiet {
        info!("未检测到火焰");
      }
      return Ok(());
    }

    for line in summarize(result) {
      warn!("{}", line);
    }
    Ok(())
  }
}
