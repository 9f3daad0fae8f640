// 该文件是 Yunjing （云镜） 项目的一部分。
// src/decoder/segmentation.rs - 语义分割解码
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

use image::{
  Rgba, RgbaImage,
  imageops::{self, FilterType},
};
use tracing::debug;

use super::{DecodeError, SourceSize, output};
use crate::{
  executor::{OutputBuffer, OutputBuffers},
  tensor::TensorData,
};

/// 21 色调色板，0 号为透明背景
pub const PALETTE: [[u8; 4]; 21] = [
  [0, 0, 0, 0],
  [255, 0, 0, 255],
  [0, 255, 0, 255],
  [0, 0, 255, 255],
  [0, 255, 255, 255],
  [255, 0, 255, 255],
  [255, 255, 0, 255],
  [0xCC, 0xCC, 0xCC, 255],
  [0x44, 0x44, 0x44, 255],
  [0, 255, 0, 255],
  [0, 255, 255, 255],
  [255, 255, 0, 255],
  [255, 0, 0, 255],
  [240, 0, 0, 255],
  [0, 0, 255, 255],
  [0, 255, 1, 255],
  [254, 254, 255, 255],
  [255, 0, 1, 255],
  [255, 0, 255, 255],
  [255, 255, 1, 255],
  [0, 0, 0, 255],
];

fn wrap(class: i64) -> u8 {
  class.rem_euclid(PALETTE.len() as i64) as u8
}

/// 模型分辨率下的调色板索引图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
  width: u32,
  height: u32,
  classes: Vec<u8>,
}

impl SegmentationMask {
  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn class_at(&self, x: u32, y: u32) -> Option<u8> {
    if x >= self.width || y >= self.height {
      return None;
    }
    self
      .classes
      .get((y * self.width + x) as usize)
      .copied()
  }

  pub fn to_rgba(&self) -> RgbaImage {
    RgbaImage::from_fn(self.width, self.height, |x, y| {
      let class = self.classes[(y * self.width + x) as usize];
      Rgba(PALETTE[class as usize])
    })
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentationDecoder;

impl SegmentationDecoder {
  /// `[1,H,W,C]` 按像素取最大概率类别（相同时取较小索引）；
  /// `[1,H,W]` 或 `[1,H,W,1]` 直接读取类别编号
  pub fn class_map(&self, buffer: &OutputBuffer) -> Result<SegmentationMask, DecodeError> {
    let mismatch = || DecodeError::ShapeMismatchError {
      output: 0,
      shape: buffer.shape().to_vec(),
    };
    let (height, width, channels) = match *buffer.shape() {
      [1, h, w, c] if c > 1 => (h, w, Some(c)),
      [1, h, w, 1] | [1, h, w] | [h, w] => (h, w, None),
      _ => return Err(mismatch()),
    };
    let pixels = height * width;
    if buffer.len() < pixels * channels.unwrap_or(1) {
      return Err(mismatch());
    }

    let classes = match channels {
      Some(channels) => {
        let mut cursor = buffer.cursor();
        (0..pixels)
          .map(|_| {
            let mut best = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for c in 0..channels {
              let v = cursor.next_value().unwrap_or(f32::NEG_INFINITY);
              if v > best_score {
                best_score = v;
                best = c;
              }
            }
            wrap(best as i64)
          })
          .collect()
      }
      None => match buffer.data() {
        TensorData::Float32(v) => v[..pixels].iter().map(|&x| wrap(x as i64)).collect(),
        TensorData::Int64(v) => v[..pixels].iter().map(|&x| wrap(x)).collect(),
        TensorData::UInt8(v) => v[..pixels].iter().map(|&x| wrap(x as i64)).collect(),
        TensorData::Int8(v) => v[..pixels].iter().map(|&x| wrap(x as u8 as i64)).collect(),
      },
    };

    Ok(SegmentationMask {
      width: width as u32,
      height: height as u32,
      classes,
    })
  }

  /// 彩色掩码，双线性缩放到源图像尺寸
  pub fn decode(&self, outputs: &OutputBuffers, source: SourceSize) -> Result<RgbaImage, DecodeError> {
    let mask = self.class_map(output(outputs, 0)?)?;
    debug!(
      "分割掩码 {}x{} -> {}x{}",
      mask.width, mask.height, source.width, source.height
    );
    Ok(imageops::resize(
      &mask.to_rgba(),
      source.width.max(1),
      source.height.max(1),
      FilterType::Triangle,
    ))
  }
}
