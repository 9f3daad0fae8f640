// 该文件是 Yunjing （云镜） 项目的一部分。
// src/decoder/depth.rs - 深度估计解码
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

use image::{Rgba, RgbaImage};
use tracing::debug;

use super::{DecodeError, output};
use crate::executor::OutputBuffers;

#[derive(Debug, Clone, Copy, Default)]
pub struct DepthDecoder;

// [1,H,W,1] / [1,1,H,W] / [1,H,W] / [H,W]
fn depth_dims(shape: &[usize]) -> Option<(usize, usize)> {
  match *shape {
    [1, h, w, 1] | [1, 1, h, w] | [1, h, w] | [h, w] => Some((h, w)),
    _ => None,
  }
}

impl DepthDecoder {
  /// 线性拉伸到 0..255 的灰度图，分辨率与模型输出一致
  pub fn decode(&self, outputs: &OutputBuffers) -> Result<RgbaImage, DecodeError> {
    let buffer = output(outputs, 0)?;
    let (height, width) = depth_dims(buffer.shape()).ok_or_else(|| DecodeError::ShapeMismatchError {
      output: 0,
      shape: buffer.shape().to_vec(),
    })?;
    let pixels = width * height;

    let (mut min, mut max) = (f32::INFINITY, f32::NEG_INFINITY);
    for v in buffer.cursor().take(pixels) {
      min = min.min(v);
      max = max.max(v);
    }
    let range = if max - min == 0.0 { 1.0 } else { max - min };
    debug!("深度范围: [{}, {}]", min, max);

    let mut image = RgbaImage::new(width as u32, height as u32);
    for (pixel, v) in image.pixels_mut().zip(buffer.cursor()) {
      let gray = ((v - min) / range * 255.0).clamp(0.0, 255.0) as u8;
      *pixel = Rgba([gray, gray, gray, 255]);
    }
    Ok(image)
  }
}
