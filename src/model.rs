// 该文件是 Huoyan （火眼） 项目的一部分。
// src/model.rs - 模型
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

use crate::config::{ConfidenceThreshold, Config};

pub trait Model {
  type Input;
  type Output;
  type Error;

  /// 推理并过滤掉置信度低于 `confidence` 的结果
  fn infer(
    &self,
    input: &Self::Input,
    confidence: ConfidenceThreshold,
  ) -> Result<Self::Output, Self::Error>;
}

impl<M: Model> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(
    &self,
    input: &Self::Input,
    confidence: ConfidenceThreshold,
  ) -> Result<Self::Output, Self::Error> {
    (**self).infer(input, confidence)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

impl<T> DetectItem<T> {
  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }
}

/// 一次推理的结果集，顺序即模型给出的顺序
#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn empty() -> Self {
    Self {
      items: Box::new([]),
    }
  }

  /// 构造结果集，并丢弃低于阈值的条目
  pub fn above(items: Vec<DetectItem<T>>, confidence: ConfidenceThreshold) -> Self {
    let items: Vec<_> = items
      .into_iter()
      .filter(|item| confidence.admits(item.score))
      .collect();
    Self {
      items: items.into_boxed_slice(),
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem<T>> {
    self.items.iter()
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// 火焰/烟雾模型的标签空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FireLabel {
  Fire,
  Smoke,
  Other(u32),
}

impl WithLabel for FireLabel {
  fn to_label_str(&self) -> String {
    match self {
      FireLabel::Fire => "fire".to_string(),
      FireLabel::Smoke => "smoke".to_string(),
      FireLabel::Other(id) => format!("class-{}", id),
    }
  }

  fn to_label_id(&self) -> u32 {
    match self {
      FireLabel::Fire => 0,
      FireLabel::Smoke => 1,
      FireLabel::Other(id) => *id,
    }
  }

  fn from_label_id(id: u32) -> Self {
    match id {
      0 => FireLabel::Fire,
      1 => FireLabel::Smoke,
      id => FireLabel::Other(id),
    }
  }
}

mod yolo;
pub use self::yolo::{InferenceError, ModelLoadError, YoloBuilder, YoloModel};

/// 进程内共享的模型句柄
pub type ModelHandle = YoloModel<FireLabel>;

/// 按配置加载模型
///
/// 加载开销较大，调用方应在进程内只加载一次并复用句柄。
pub fn load_model(config: &Config) -> Result<ModelHandle, ModelLoadError> {
  YoloBuilder::from_config(config).build()
}
