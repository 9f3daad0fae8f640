// 该文件是 Yunjing （云镜） 项目的一部分。
// src/output/draw.rs - 结果可视化与记录
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_text_mut},
  rect::Rect,
};
use serde::Serialize;
use tracing::debug;

use crate::{
  decoder::Decoded,
  model::{ClassificationResult, DetectionResult},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 0, 255];
const BOX_THICKNESS: i32 = 2;
const MASK_OPACITY: f32 = 0.5;

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  label_color: [u8; 3],
  /// 未提供字体时只绘制边框与底色
  font: Option<FontArc>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      label_color: LABEL_COLOR,
      font: None,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file(self, path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(self.with_font(font))
  }

  /// 把任务结果绘制到源图像上
  pub fn render(&self, frame: &RgbImage, result: &Decoded) -> RgbImage {
    match result {
      Decoded::Depth(image) | Decoded::Upscaled(image) => image.to_rgb8(),
      Decoded::Mask(mask) => overlay_mask(frame, &mask.to_rgba8()),
      Decoded::Detections(items) => {
        let mut image = frame.clone();
        for item in items {
          self.draw_detection(&mut image, item);
        }
        image
      }
      Decoded::Classes(items) | Decoded::Actions(items) => {
        let mut image = frame.clone();
        for (line, item) in items.iter().enumerate() {
          let label = format!("{} {:.2}", item.label, item.score);
          self.draw_label(&mut image, 0, line as i32 * self.label_text_height, &label);
        }
        image
      }
    }
  }

  fn draw_detection(&self, image: &mut RgbImage, item: &DetectionResult) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let x_min = (item.bbox.left.floor() as i32).clamp(0, w - 1);
    let y_min = (item.bbox.top.floor() as i32).clamp(0, h - 1);
    let x_max = (item.bbox.right.ceil() as i32).clamp(0, w - 1);
    let y_max = (item.bbox.bottom.ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      debug!("跳过退化的检测框: {:?}", item.bbox);
      return;
    }

    let color = Rgb(self.label_color);
    for t in 0..BOX_THICKNESS {
      let (left, top) = (x_min + t, y_min + t);
      let (right, bottom) = (x_max - t, y_max - t);
      if left > right || top > bottom {
        break;
      }
      for x in left..=right {
        image.put_pixel(x as u32, top as u32, color);
        image.put_pixel(x as u32, bottom as u32, color);
      }
      for y in top..=bottom {
        image.put_pixel(left as u32, y as u32, color);
        image.put_pixel(right as u32, y as u32, color);
      }
    }

    let label = format!("{} {:.2}", item.label, item.score);
    self.draw_label(
      image,
      x_min,
      (y_min - self.label_text_height).max(0),
      &label,
    );
  }

  // 标签底色加白色文字，超出图像的部分被截断
  fn draw_label(&self, image: &mut RgbImage, x: i32, y: i32, label: &str) {
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let max_width = (image.width() as i32 - x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = self.label_text_height as u32;
    if label_width == 0 || y >= image.height() as i32 {
      return;
    }

    let rect = Rect::at(x, y).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, Rgb(self.label_color));

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        x,
        y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }
}

/// 按掩码 alpha 混合，透明像素保留原图
pub fn overlay_mask(frame: &RgbImage, mask: &image::RgbaImage) -> RgbImage {
  let mask = if mask.dimensions() == frame.dimensions() {
    mask.clone()
  } else {
    imageops::resize(
      mask,
      frame.width(),
      frame.height(),
      imageops::FilterType::Nearest,
    )
  };
  RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
    let base = frame.get_pixel(x, y);
    let top = mask.get_pixel(x, y);
    let alpha = top[3] as f32 / 255.0 * MASK_OPACITY;
    Rgb(std::array::from_fn(|c| {
      (base[c] as f32 * (1.0 - alpha) + top[c] as f32 * alpha).round() as u8
    }))
  })
}

fn is_empty<T>(items: &&[T]) -> bool {
  items.is_empty()
}

#[derive(Serialize)]
struct RecordFile<'a> {
  width: u32,
  height: u32,
  #[serde(skip_serializing_if = "is_empty")]
  detections: &'a [DetectionResult],
  #[serde(skip_serializing_if = "is_empty")]
  classes: &'a [ClassificationResult],
}

/// 保存原图，并把结构化结果写到同名的旁路文件
pub enum Record {
  /// 每行 `label, score, left, top, right, bottom`
  Text { label_with_name: bool },
  Json,
}

impl Record {
  pub fn record(
    &self,
    frame: &RgbImage,
    result: &Decoded,
    path: &Path,
  ) -> Result<(), std::io::Error> {
    let (detections, classes): (&[DetectionResult], &[ClassificationResult]) = match result {
      Decoded::Detections(items) => (items.as_slice(), &[]),
      Decoded::Classes(items) | Decoded::Actions(items) => (&[], items.as_slice()),
      _ => (&[], &[]),
    };

    match self {
      Record::Text { label_with_name } => {
        let mut records = Vec::new();
        for item in detections {
          let name = if *label_with_name {
            item.label.clone()
          } else {
            item.class_id.to_string()
          };
          records.push(format!(
            "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
            name, item.score, item.bbox.left, item.bbox.top, item.bbox.right, item.bbox.bottom
          ));
        }
        for item in classes {
          records.push(format!("{}, {:.4}", item.label, item.score));
        }
        std::fs::write(path.with_extension("txt"), records.join("\n"))
      }
      Record::Json => {
        let file = RecordFile {
          width: frame.width(),
          height: frame.height(),
          detections,
          classes,
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(path.with_extension("json"), json)
      }
    }
  }
}
