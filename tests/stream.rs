// 该文件是 Huoyan （火眼） 项目的一部分。
// tests/stream.rs - 推理流测试
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

use std::{cell::Cell, collections::VecDeque, rc::Rc};

use image::Rgb;

use huoyan::{
  ConfidenceThreshold, StopHandle,
  frame::BgrFrame,
  input::{CaptureError, CaptureSource},
  model::{DetectItem, DetectResult, FireLabel, Model},
  stream,
  stream::StreamState,
};

#[derive(Debug, thiserror::Error)]
#[error("第 {0} 帧推理失败")]
struct FakeInferenceError(u8);

/// 把帧左上角像素的蓝色分量当作帧号写进检测框，并附带一个低分结果
struct MarkerModel {
  fail_on: Option<u8>,
}

impl Model for MarkerModel {
  type Input = BgrFrame;
  type Output = DetectResult<FireLabel>;
  type Error = FakeInferenceError;

  fn infer(
    &self,
    input: &BgrFrame,
    confidence: ConfidenceThreshold,
  ) -> Result<Self::Output, Self::Error> {
    let marker = input.pixel(0, 0)[0];
    if self.fail_on == Some(marker) {
      return Err(FakeInferenceError(marker));
    }

    let items = vec![
      DetectItem {
        kind: FireLabel::Fire,
        score: 0.95,
        bbox: [marker as f32, 0.0, 4.0, 4.0],
      },
      DetectItem {
        kind: FireLabel::Smoke,
        score: 0.4,
        bbox: [0.0, 0.0, 2.0, 2.0],
      },
    ];
    Ok(DetectResult::above(items, confidence))
  }
}

/// 固定在画面下半部分报告一个火焰框
struct FixedBoxModel;

impl Model for FixedBoxModel {
  type Input = BgrFrame;
  type Output = DetectResult<FireLabel>;
  type Error = FakeInferenceError;

  fn infer(
    &self,
    _input: &BgrFrame,
    confidence: ConfidenceThreshold,
  ) -> Result<Self::Output, Self::Error> {
    let items = vec![DetectItem {
      kind: FireLabel::Fire,
      score: 0.9,
      bbox: [8.0, 40.0, 40.0, 60.0],
    }];
    Ok(DetectResult::above(items, confidence))
  }
}

/// 依次交出预先准备好的帧，之后报告流结束
struct ScriptedSource {
  frames: VecDeque<BgrFrame>,
  releases: Rc<Cell<u32>>,
}

impl ScriptedSource {
  fn new(count: u8) -> (Self, Rc<Cell<u32>>) {
    Self::from_frames((0..count).map(marked_frame).collect())
  }

  fn from_frames(frames: VecDeque<BgrFrame>) -> (Self, Rc<Cell<u32>>) {
    let releases = Rc::new(Cell::new(0));
    (
      Self {
        frames,
        releases: releases.clone(),
      },
      releases,
    )
  }
}

impl CaptureSource for ScriptedSource {
  fn read_frame(&mut self) -> Result<BgrFrame, CaptureError> {
    self.frames.pop_front().ok_or(CaptureError::EndOfStream)
  }

  fn release(&mut self) {
    self.releases.set(self.releases.get() + 1);
  }
}

fn marked_frame(marker: u8) -> BgrFrame {
  let mut data = vec![0u8; 8 * 8 * 3];
  data[0] = marker;
  BgrFrame::from_raw(8, 8, data).unwrap()
}

fn threshold(value: f32) -> ConfidenceThreshold {
  ConfidenceThreshold::new(value).unwrap()
}

#[test]
fn frames_arrive_in_order_then_source_is_released_once() {
  let (source, releases) = ScriptedSource::new(3);
  let mut frames = stream(MarkerModel { fail_on: None }, source, threshold(0.6));

  let mut markers = Vec::new();
  for item in frames.by_ref() {
    let (annotated, result) = item.unwrap();
    assert_eq!(annotated.dimensions(), (8, 8));
    markers.push(result.items[0].bbox[0]);
  }

  assert_eq!(markers, vec![0.0, 1.0, 2.0]);
  assert_eq!(frames.frames_emitted(), 3);
  assert_eq!(frames.state(), StreamState::Released);
  assert!(frames.next().is_none());

  drop(frames);
  assert_eq!(releases.get(), 1);
}

#[test]
fn empty_source_ends_immediately() {
  let (source, releases) = ScriptedSource::new(0);
  let mut frames = stream(MarkerModel { fail_on: None }, source, threshold(0.6));

  assert!(frames.next().is_none());
  assert_eq!(releases.get(), 1);
  drop(frames);
  assert_eq!(releases.get(), 1);
}

#[test]
fn dropping_early_releases_once() {
  let (source, releases) = ScriptedSource::new(5);
  let frames = stream(MarkerModel { fail_on: None }, source, threshold(0.6));

  let taken: Vec<_> = frames.take(2).collect();
  assert_eq!(taken.len(), 2);
  assert_eq!(releases.get(), 1);
}

#[test]
fn explicit_release_then_drop_releases_once() {
  let (source, releases) = ScriptedSource::new(5);
  let mut frames = stream(MarkerModel { fail_on: None }, source, threshold(0.6));

  assert!(frames.next().is_some());
  frames.release();
  frames.release();
  assert!(frames.next().is_none());
  drop(frames);
  assert_eq!(releases.get(), 1);
}

#[test]
fn stop_handle_ends_stream_before_next_capture() {
  let (source, releases) = ScriptedSource::new(5);
  let stop = StopHandle::new();
  let mut frames = stream(MarkerModel { fail_on: None }, source, threshold(0.6))
    .with_stop_handle(stop.clone());

  assert!(frames.next().is_some());
  assert!(frames.next().is_some());
  stop.stop();
  assert!(frames.next().is_none());
  assert_eq!(frames.frames_emitted(), 2);
  assert_eq!(releases.get(), 1);

  drop(frames);
  assert_eq!(releases.get(), 1);
}

#[test]
fn inference_failure_is_yielded_once_then_stream_ends() {
  let (source, releases) = ScriptedSource::new(5);
  let mut frames = stream(MarkerModel { fail_on: Some(2) }, source, threshold(0.6));

  assert!(frames.next().unwrap().is_ok());
  assert!(frames.next().unwrap().is_ok());
  let err = frames.next().unwrap().unwrap_err();
  assert_eq!(err.0, 2);
  assert!(frames.next().is_none());
  assert_eq!(releases.get(), 1);
}

#[test]
fn every_streamed_detection_meets_threshold() {
  for value in [0.3, 0.6, 0.99] {
    let (source, _) = ScriptedSource::new(4);
    let threshold = threshold(value);
    for item in stream(MarkerModel { fail_on: None }, source, threshold) {
      let (_, result) = item.unwrap();
      assert!(result.iter().all(|det| det.score >= value));
    }
  }
}

#[test]
fn low_threshold_keeps_low_scoring_detections() {
  let (source, _) = ScriptedSource::new(1);
  let mut frames = stream(MarkerModel { fail_on: None }, source, threshold(0.3));
  let (_, result) = frames.next().unwrap().unwrap();
  assert_eq!(result.len(), 2);
}

#[test]
fn yielded_frame_is_rgb_with_detections_drawn() {
  // 右上角放一个 BGR 标记像素
  let (width, height) = (64u32, 64u32);
  let mut data = vec![0u8; (width * height * 3) as usize];
  let marker = ((2 * width + 63) * 3) as usize;
  data[marker..marker + 3].copy_from_slice(&[200, 10, 50]);
  let frame = BgrFrame::from_raw(width, height, data).unwrap();

  let (source, releases) = ScriptedSource::from_frames(VecDeque::from([frame]));
  let mut frames = stream(FixedBoxModel, source, threshold(0.6));
  let (annotated, result) = frames.next().unwrap().unwrap();

  assert_eq!(result.len(), 1);
  assert_eq!(annotated.get_pixel(63, 2), &Rgb([50, 10, 200]));
  assert_eq!(annotated.get_pixel(8, 50), &Rgb([255, 64, 0]));
  assert_eq!(annotated.get_pixel(40, 50), &Rgb([255, 64, 0]));
  assert_eq!(annotated.get_pixel(24, 50), &Rgb([0, 0, 0]));

  assert!(frames.next().is_none());
  assert_eq!(releases.get(), 1);
}
