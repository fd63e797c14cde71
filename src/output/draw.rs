// 该文件是 Huoyan （火眼） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::{fmt, path::Path};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  config::Config,
  frame::BgrFrame,
  model::{DetectItem, DetectResult, WithLabel},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;

static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf"); // 默认字体

// 按类别编号取色：火焰橙红、烟雾灰，其余类别黄色
const LABEL_PALETTE: [[u8; 3]; 3] = [[255, 64, 0], [128, 128, 128], [255, 200, 0]];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

/// 在图像上绘制检测框与标签
///
/// 默认使用内嵌字体，配置中的 `font_path` 可以替换它。
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
}

fn embedded_font() -> Option<FontArc> {
  FontArc::try_from_slice(EMBEDDED_FONT)
    .map_err(|e| warn!("内嵌字体无法加载, 只绘制边框: {}", e))
    .ok()
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: embedded_font(),
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
    }
  }
}

impl Draw {
  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let path = path.as_ref();
    info!("加载标注字体: {}", path.display());
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn from_config(config: &Config) -> Result<Self, DrawError> {
    match &config.font_path {
      Some(path) => Self::with_font_file(path),
      None => Ok(Self::default()),
    }
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn color_of<T: WithLabel>(kind: &T) -> [u8; 3] {
    let id = kind.to_label_id() as usize;
    LABEL_PALETTE[id.min(LABEL_PALETTE.len() - 1)]
  }

  // bbox 为原图像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (item.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (item.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (item.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (item.bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(Self::color_of(&item.kind));

    // 绘制边框（加粗为2像素）
    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min + 1 - 2 * thickness;
      let height = y_max - y_min + 1 - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", item.kind.to_label_str(), item.score);
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签放在边框上方，不超出图像
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = text_height.min(h - label_y).max(0) as u32;

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);

      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}

impl fmt::Debug for Draw {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Draw")
      .field("has_font", &self.has_font())
      .finish()
  }
}

pub trait DrawDetectionOnImage<T: WithLabel> {
  fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult<T>);
}

impl<T: WithLabel> DrawDetectionOnImage<T> for Draw {
  fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult<T>) {
    for item in result.iter() {
      self.draw_bbox_with_label(image, item);
    }
  }
}

impl Draw {
  /// 拷贝原帧、绘制结果，并转为显示用的 RGB 顺序
  pub fn annotate<T: WithLabel>(&self, frame: &BgrFrame, result: &DetectResult<T>) -> RgbImage {
    let mut image = frame.to_rgb_image();
    self.draw_detections_on_image(&mut image, result);
    image
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::FireLabel;

  const FIRE: Rgb<u8> = Rgb(LABEL_PALETTE[0]);

  fn result(bbox: [f32; 4]) -> DetectResult<FireLabel> {
    DetectResult::from(vec![DetectItem {
      kind: FireLabel::Fire,
      score: 0.8,
      bbox,
    }])
  }

  fn boxes_only() -> Draw {
    Draw {
      font: None,
      ..Draw::default()
    }
  }

  #[test]
  fn box_edges_are_painted() {
    let frame = BgrFrame::with_shape(64, 64);
    let image = boxes_only().annotate(&frame, &result([8.0, 32.0, 40.0, 56.0]));

    assert_eq!(image.get_pixel(8, 32), &FIRE);
    assert_eq!(image.get_pixel(9, 33), &FIRE);
    assert_eq!(image.get_pixel(40, 44), &FIRE);
    assert_eq!(image.get_pixel(24, 56), &FIRE);
    assert_eq!(image.get_pixel(24, 44), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(24, 20), &Rgb([0, 0, 0]));
  }

  #[test]
  fn default_config_draws_labels_above_the_box() {
    let draw = Draw::from_config(&Config::default()).unwrap();
    assert!(draw.has_font());

    let frame = BgrFrame::with_shape(64, 64);
    let image = draw.annotate(&frame, &result([8.0, 32.0, 40.0, 56.0]));

    let label_rows = (32 - LABEL_TEXT_HEIGHT) as u32..32;
    let mut background = 0;
    let mut text = 0;
    for y in label_rows {
      for x in 8..64 {
        match image.get_pixel(x, y) {
          pixel if *pixel == FIRE => background += 1,
          Rgb([0, 0, 0]) => {}
          _ => text += 1,
        }
      }
    }
    assert!(background > 0);
    assert!(text > 0);
    assert_eq!(image.get_pixel(24, 44), &Rgb([0, 0, 0]));
  }

  #[test]
  fn out_of_bounds_box_is_clamped() {
    let frame = BgrFrame::with_shape(64, 64);
    let image = Draw::default().annotate(&frame, &result([-10.0, -10.0, 100.0, 100.0]));
    assert_eq!(image.get_pixel(0, 40), &FIRE);
    assert_eq!(image.get_pixel(63, 63), &FIRE);
    assert_eq!(image.get_pixel(0, 63), &FIRE);
  }

  #[test]
  fn empty_result_leaves_frame_untouched() {
    let frame = BgrFrame::with_shape(8, 8);
    let image = Draw::default().annotate(&frame, &DetectResult::<FireLabel>::empty());
    assert_eq!(image, frame.to_rgb_image());
  }

  #[test]
  fn invalid_font_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    assert!(matches!(
      Draw::with_font_file(&path),
      Err(DrawError::InvalidFont(_))
    ));
  }
}
