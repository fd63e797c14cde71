// 该文件是 Huoyan （火眼） 项目的一部分。
// src/model/yolo.rs - YOLO ONNX 模型
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
  marker::PhantomData,
  path::{Path, PathBuf},
  sync::Mutex,
};

use image::{Rgb, RgbImage, imageops::FilterType};
use ort::{
  session::Session,
  value::{Tensor, ValueType},
};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfidenceThreshold, Config, DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_DETECTIONS},
  frame::BgrFrame,
  model::{DetectItem, DetectResult, Model, WithLabel},
};

const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_BOX_FEATURES: usize = 4;
const YOLO_PAD_VALUE: u8 = 114;

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
}

impl ModelLoadError {
  fn ort(e: impl std::fmt::Display) -> Self {
    ModelLoadError::OrtError(e.to_string())
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("推理会话不可用")]
  SessionPoisoned,
  #[error("输入图像为空")]
  EmptyInput,
  #[error("输出张量形状异常: {0:?}")]
  UnexpectedShape(Vec<i64>),
}

impl InferenceError {
  fn ort(e: impl std::fmt::Display) -> Self {
    InferenceError::OrtError(e.to_string())
  }
}

pub struct YoloBuilder {
  model_path: PathBuf,
  iou_threshold: f32,
  max_detections: usize,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloBuilder {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(YoloBuilder::new(url.path()))
  }
}

impl YoloBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_detections: DEFAULT_MAX_DETECTIONS,
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(&config.model_path)
      .iou_threshold(config.iou_threshold)
      .max_detections(config.max_detections)
  }

  pub fn iou_threshold(mut self, iou_threshold: f32) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  pub fn max_detections(mut self, max_detections: usize) -> Self {
    self.max_detections = max_detections;
    self
  }

  pub fn build<T>(self) -> Result<YoloModel<T>, ModelLoadError> {
    info!("加载模型文件: {}", self.model_path.display());
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(ModelLoadError::NotFound(self.model_path));
    }

    let model_size = std::fs::metadata(&self.model_path)?.len();
    debug!(
      "模型文件大小: {:.2} MB",
      model_size as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()
      .map_err(ModelLoadError::ort)?
      .commit_from_file(&self.model_path)
      .map_err(ModelLoadError::ort)?;

    if session.inputs.len() != 1 {
      return Err(ModelLoadError::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        session.inputs.len()
      )));
    }
    let output = session
      .outputs
      .first()
      .ok_or_else(|| ModelLoadError::ModelInvalid("模型没有输出".to_string()))?;
    let output_name = output.name.clone();

    let input = &session.inputs[0];
    let input_name = input.name.clone();
    let dims: Vec<i64> = match &input.input_type {
      ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
      _ => {
        return Err(ModelLoadError::ModelInvalid(format!(
          "模型输入 {} 不是张量",
          input.name
        )));
      }
    };

    // [batch, channels, height, width]，动态维度为 -1
    if dims.len() != 4 {
      return Err(ModelLoadError::ModelInvalid(format!(
        "预期 4 维模型输入, 实际为 {:?}",
        dims
      )));
    }
    let fixed_or_default = |dim: i64| {
      if dim > 0 {
        dim as u32
      } else {
        YOLO_DEFAULT_INPUT_SIZE
      }
    };
    let input_height = fixed_or_default(dims[2]);
    let input_width = fixed_or_default(dims[3]);

    debug!("模型输入: {} {:?}", input_name, dims);
    debug!("模型输出: {}", output_name);
    info!("模型加载完成, 输入尺寸 {}x{}", input_width, input_height);

    Ok(YoloModel {
      session: Mutex::new(session),
      input_name,
      output_name,
      input_width,
      input_height,
      iou_threshold: self.iou_threshold,
      max_detections: self.max_detections,
      _phantom: PhantomData,
    })
  }
}

/// YOLOv8 系列检测模型
///
/// 会话放在互斥锁中，同一时刻只有一次推理在进行。
pub struct YoloModel<T> {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  input_width: u32,
  input_height: u32,
  iou_threshold: f32,
  max_detections: usize,
  _phantom: PhantomData<fn() -> T>,
}

impl<T> YoloModel<T> {
  fn preprocess(&self, frame: &BgrFrame, letterbox: &Letterbox) -> Result<Tensor<f32>, InferenceError> {
    let data = letterbox_nchw(frame, letterbox, self.input_width, self.input_height);
    let shape = [
      1usize,
      3,
      self.input_height as usize,
      self.input_width as usize,
    ];
    Tensor::from_array((shape, data.into_boxed_slice())).map_err(InferenceError::ort)
  }
}

/// 等比缩放并居中填充到 `width x height`，输出 NCHW、RGB、[0, 1] 的数据
pub(crate) fn letterbox_nchw(frame: &BgrFrame, letterbox: &Letterbox, width: u32, height: u32) -> Vec<f32> {
  let resized = image::imageops::resize(
    &frame.to_rgb_image(),
    letterbox.resized_width,
    letterbox.resized_height,
    FilterType::Triangle,
  );

  let mut canvas = RgbImage::from_pixel(width, height, Rgb([YOLO_PAD_VALUE; 3]));
  image::imageops::replace(
    &mut canvas,
    &resized,
    letterbox.pad_x as i64,
    letterbox.pad_y as i64,
  );

  let plane = (width * height) as usize;
  let raw = canvas.as_raw();
  let mut data = vec![0f32; 3 * plane];
  for idx in 0..plane {
    data[idx] = raw[idx * 3] as f32 / 255.0;
    data[plane + idx] = raw[idx * 3 + 1] as f32 / 255.0;
    data[2 * plane + idx] = raw[idx * 3 + 2] as f32 / 255.0;
  }
  data
}

impl<T: WithLabel> Model for YoloModel<T> {
  type Input = BgrFrame;
  type Output = DetectResult<T>;
  type Error = InferenceError;

  fn infer(
    &self,
    input: &Self::Input,
    confidence: ConfidenceThreshold,
  ) -> Result<Self::Output, Self::Error> {
    if input.width() == 0 || input.height() == 0 {
      return Err(InferenceError::EmptyInput);
    }

    let letterbox = Letterbox::new(
      input.width(),
      input.height(),
      self.input_width,
      self.input_height,
    );
    debug!("设置模型输入: {:?}", letterbox);
    let tensor = self.preprocess(input, &letterbox)?;

    let (shape, data) = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| InferenceError::SessionPoisoned)?;

      debug!("执行模型推理");
      let outputs = session
        .run(ort::inputs![self.input_name.as_str() => tensor])
        .map_err(InferenceError::ort)?;

      debug!("获取模型输出");
      let (shape, data) = outputs[self.output_name.as_str()]
        .try_extract_tensor::<f32>()
        .map_err(InferenceError::ort)?;
      (shape.iter().copied().collect::<Vec<i64>>(), data.to_vec())
    };

    let params = PostprocessParams {
      confidence,
      iou_threshold: self.iou_threshold,
      max_detections: self.max_detections,
    };
    let items = postprocess(&shape, &data, &params, &letterbox)?;
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult::above(items, confidence))
  }
}

/// 原图到模型输入的等比缩放与居中填充
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
  source_width: u32,
  source_height: u32,
  resized_width: u32,
  resized_height: u32,
  pad_x: u32,
  pad_y: u32,
  scale: f32,
}

impl Letterbox {
  pub(crate) fn new(source_width: u32, source_height: u32, target_width: u32, target_height: u32) -> Self {
    let scale = (target_width as f32 / source_width as f32)
      .min(target_height as f32 / source_height as f32);
    let resized_width = ((source_width as f32 * scale).round() as u32).clamp(1, target_width);
    let resized_height = ((source_height as f32 * scale).round() as u32).clamp(1, target_height);

    Self {
      source_width,
      source_height,
      resized_width,
      resized_height,
      pad_x: (target_width - resized_width) / 2,
      pad_y: (target_height - resized_height) / 2,
      scale,
    }
  }

  /// 模型坐标系下的框映射回原图，并裁剪到图像范围内
  pub(crate) fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.source_width as f32;
    let h = self.source_height as f32;
    [
      ((bbox[0] - self.pad_x as f32) / self.scale).clamp(0.0, w),
      ((bbox[1] - self.pad_y as f32) / self.scale).clamp(0.0, h),
      ((bbox[2] - self.pad_x as f32) / self.scale).clamp(0.0, w),
      ((bbox[3] - self.pad_y as f32) / self.scale).clamp(0.0, h),
    ]
  }
}

pub(crate) struct PostprocessParams {
  pub confidence: ConfidenceThreshold,
  pub iou_threshold: f32,
  pub max_detections: usize,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
  class_id: usize,
  score: f32,
  bbox: [f32; 4],
}

/// 解码 YOLOv8 输出
///
/// 支持 `[1, 4 + nc, anchors]` 与转置后的 `[1, anchors, 4 + nc]` 两种布局，
/// 较小的那一维视为特征维。
pub(crate) fn postprocess<T: WithLabel>(
  shape: &[i64],
  data: &[f32],
  params: &PostprocessParams,
  letterbox: &Letterbox,
) -> Result<Vec<DetectItem<T>>, InferenceError> {
  if shape.len() != 3 || shape[0] != 1 || shape[1] <= 0 || shape[2] <= 0 {
    return Err(InferenceError::UnexpectedShape(shape.to_vec()));
  }

  let (features, anchors, channel_major) = if shape[1] <= shape[2] {
    (shape[1] as usize, shape[2] as usize, true)
  } else {
    (shape[2] as usize, shape[1] as usize, false)
  };
  if features <= YOLO_BOX_FEATURES || data.len() < features * anchors {
    return Err(InferenceError::UnexpectedShape(shape.to_vec()));
  }

  let value = |feature: usize, anchor: usize| {
    if channel_major {
      data[feature * anchors + anchor]
    } else {
      data[anchor * features + feature]
    }
  };

  let mut candidates = Vec::new();
  for anchor in 0..anchors {
    let (class_id, score) = (YOLO_BOX_FEATURES..features)
      .map(|feature| (feature - YOLO_BOX_FEATURES, value(feature, anchor)))
      .fold((0usize, f32::MIN), |best, current| {
        if current.1 > best.1 { current } else { best }
      });

    if !params.confidence.admits(score) {
      continue;
    }

    let cx = value(0, anchor);
    let cy = value(1, anchor);
    let w = value(2, anchor);
    let h = value(3, anchor);
    candidates.push(Candidate {
      class_id,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }
  debug!("阈值过滤后候选框: {}", candidates.len());

  let kept = nms(candidates, params.iou_threshold, params.max_detections);

  Ok(
    kept
      .into_iter()
      .map(|candidate| DetectItem {
        kind: T::from_label_id(candidate.class_id as u32),
        score: candidate.score,
        bbox: letterbox.unmap(candidate.bbox),
      })
      .collect(),
  )
}

/// 按类别的非极大值抑制
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, max_detections: usize) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    if kept.len() >= max_detections {
      break;
    }
    let suppressed = kept.iter().any(|best| {
      best.class_id == candidate.class_id && iou(&best.bbox, &candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::FireLabel;

  fn params(confidence: f32) -> PostprocessParams {
    PostprocessParams {
      confidence: ConfidenceThreshold::new(confidence).unwrap(),
      iou_threshold: 0.5,
      max_detections: 300,
    }
  }

  // 3 个锚点, 2 个类别, 通道优先布局
  fn channel_major_output(rows: &[[f32; 6]]) -> (Vec<i64>, Vec<f32>) {
    let anchors = rows.len();
    let mut data = vec![0f32; 6 * anchors];
    for (anchor, row) in rows.iter().enumerate() {
      for (feature, value) in row.iter().enumerate() {
        data[feature * anchors + anchor] = *value;
      }
    }
    (vec![1, 6, anchors as i64], data)
  }

  fn identity() -> Letterbox {
    Letterbox::new(640, 640, 640, 640)
  }

  #[test]
  fn scores_below_threshold_are_dropped() {
    let (shape, data) = channel_major_output(&[
      [100.0, 100.0, 50.0, 50.0, 0.9, 0.1],
      [300.0, 300.0, 50.0, 50.0, 0.2, 0.3],
      [500.0, 500.0, 50.0, 50.0, 0.1, 0.55],
    ]);
    let items: Vec<DetectItem<FireLabel>> =
      postprocess(&shape, &data, &params(0.5), &identity()).unwrap();

    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.score >= 0.5));
    assert_eq!(items[0].kind, FireLabel::Fire);
    assert_eq!(items[1].kind, FireLabel::Smoke);
    assert_eq!(items[0].bbox, [75.0, 75.0, 125.0, 125.0]);
  }

  #[test]
  fn overlapping_boxes_of_same_class_are_suppressed() {
    let (shape, data) = channel_major_output(&[
      [100.0, 100.0, 50.0, 50.0, 0.8, 0.0],
      [102.0, 100.0, 50.0, 50.0, 0.9, 0.0],
      [102.0, 100.0, 50.0, 50.0, 0.0, 0.7],
    ]);
    let items: Vec<DetectItem<FireLabel>> =
      postprocess(&shape, &data, &params(0.5), &identity()).unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].score, 0.9);
    assert_eq!(items[1].kind, FireLabel::Smoke);
  }

  #[test]
  fn transposed_layout_is_accepted() {
    let rows = [
      [100.0, 100.0, 50.0, 50.0, 0.9, 0.1],
      [400.0, 400.0, 20.0, 20.0, 0.1, 0.8],
    ];
    let mut data = Vec::new();
    for row in &rows {
      data.extend_from_slice(row);
    }
    // anchors 维大于特征维才会被识别为转置布局
    let mut padded = data.clone();
    padded.extend(std::iter::repeat_n(0.0, 6 * 8));
    let shape = vec![1, 10, 6];

    let items: Vec<DetectItem<FireLabel>> =
      postprocess(&shape, &padded, &params(0.5), &identity()).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].bbox, [390.0, 390.0, 410.0, 410.0]);
  }

  #[test]
  fn max_detections_caps_result() {
    let (shape, data) = channel_major_output(&[
      [100.0, 100.0, 10.0, 10.0, 0.9, 0.0],
      [300.0, 300.0, 10.0, 10.0, 0.8, 0.0],
      [500.0, 500.0, 10.0, 10.0, 0.7, 0.0],
    ]);
    let params = PostprocessParams {
      max_detections: 2,
      ..params(0.5)
    };
    let items: Vec<DetectItem<FireLabel>> =
      postprocess(&shape, &data, &params, &identity()).unwrap();
    assert_eq!(items.len(), 2);
  }

  #[test]
  fn malformed_shape_is_rejected() {
    let result: Result<Vec<DetectItem<FireLabel>>, _> =
      postprocess(&[1, 4, 10], &[0.0; 40], &params(0.5), &identity());
    assert!(matches!(result, Err(InferenceError::UnexpectedShape(_))));

    let result: Result<Vec<DetectItem<FireLabel>>, _> =
      postprocess(&[1, 6, 10], &[0.0; 12], &params(0.5), &identity());
    assert!(matches!(result, Err(InferenceError::UnexpectedShape(_))));
  }

  #[test]
  fn letterbox_maps_back_to_source() {
    // 1280x640 -> 640x640: 缩放 0.5, 上下各填充 160
    let letterbox = Letterbox::new(1280, 640, 640, 640);
    assert_eq!(letterbox.pad_x, 0);
    assert_eq!(letterbox.pad_y, 160);

    let bbox = letterbox.unmap([10.0, 170.0, 110.0, 270.0]);
    assert_eq!(bbox, [20.0, 20.0, 220.0, 220.0]);

    let clamped = letterbox.unmap([-10.0, 100.0, 700.0, 600.0]);
    assert_eq!(clamped, [0.0, 0.0, 1280.0, 640.0]);
  }

  fn uniform_frame(width: u32, height: u32, bgr: [u8; 3]) -> BgrFrame {
    BgrFrame::from_raw(width, height, bgr.repeat((width * height) as usize)).unwrap()
  }

  fn assert_close(actual: f32, expected: u8) {
    let expected = expected as f32 / 255.0;
    assert!(
      (actual - expected).abs() <= 1.0 / 255.0,
      "{} != {}",
      actual,
      expected
    );
  }

  #[test]
  fn wide_frame_is_padded_top_and_bottom_in_rgb_planes() {
    let frame = uniform_frame(4, 2, [10, 20, 30]);
    let letterbox = Letterbox::new(4, 2, 4, 4);
    let data = letterbox_nchw(&frame, &letterbox, 4, 4);

    assert_eq!(data.len(), 3 * 16);
    let plane = |channel: usize, x: usize, y: usize| data[channel * 16 + y * 4 + x];
    for x in 0..4 {
      for channel in 0..3 {
        assert_close(plane(channel, x, 0), YOLO_PAD_VALUE);
        assert_close(plane(channel, x, 3), YOLO_PAD_VALUE);
      }
      for y in 1..3 {
        assert_close(plane(0, x, y), 30);
        assert_close(plane(1, x, y), 20);
        assert_close(plane(2, x, y), 10);
      }
    }
  }

  #[test]
  fn tall_frame_is_padded_left_and_right() {
    let frame = uniform_frame(2, 4, [200, 100, 0]);
    let letterbox = Letterbox::new(2, 4, 4, 4);
    let data = letterbox_nchw(&frame, &letterbox, 4, 4);

    let plane = |channel: usize, x: usize, y: usize| data[channel * 16 + y * 4 + x];
    for y in 0..4 {
      assert_close(plane(0, 0, y), YOLO_PAD_VALUE);
      assert_close(plane(2, 3, y), YOLO_PAD_VALUE);
      assert_close(plane(0, 1, y), 0);
      assert_close(plane(1, 2, y), 100);
      assert_close(plane(2, 1, y), 200);
    }
  }

  #[test]
  fn letterboxed_output_is_mapped_to_source_pixels() {
    // 1280x640 缩放到 640x320，上下各填充 160
    let letterbox = Letterbox::new(1280, 640, 640, 640);
    let (shape, data) = channel_major_output(&[[320.0, 320.0, 100.0, 50.0, 0.1, 0.8]]);
    let items: Vec<DetectItem<FireLabel>> =
      postprocess(&shape, &data, &params(0.5), &letterbox).unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, FireLabel::Smoke);
    assert_eq!(items[0].bbox, [540.0, 270.0, 740.0, 370.0]);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
    assert!((iou(&[0.0, 0.0, 2.0, 2.0], &[1.0, 0.0, 3.0, 2.0]) - 1.0 / 3.0).abs() < 1e-6);
  }

  #[test]
  fn missing_model_file_fails_to_load() {
    let result = YoloBuilder::new("does/not/exist.onnx").build::<FireLabel>();
    assert!(matches!(result, Err(ModelLoadError::NotFound(_))));
  }

  #[test]
  fn url_scheme_is_checked() {
    let url = Url::parse("yolo:///models/fire.onnx").unwrap();
    assert!(YoloBuilder::from_url(&url).is_ok());
    let url = Url::parse("file:///models/fire.onnx").unwrap();
    assert!(YoloBuilder::from_url(&url).is_err());
  }
}
