// 该文件是 Yunjing （云镜） 项目的一部分。
// src/decoder/super_resolution.rs - 超分辨率解码
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

use image::{Rgb, RgbImage};

use super::{DecodeError, output};
use crate::{
  executor::OutputBuffers,
  frame::{RGB_CHANNELS, TensorLayout},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct SuperResolutionDecoder;

fn to_channel(v: f32) -> u8 {
  (v * 255.0).clamp(0.0, 255.0) as u8
}

impl SuperResolutionDecoder {
  /// 输出为 0..1 的 RGB 浮点值，保留信箱填充区域
  pub fn decode(&self, outputs: &OutputBuffers) -> Result<RgbImage, DecodeError> {
    let buffer = output(outputs, 0)?;
    let shape = buffer
      .shape()
      .iter()
      .map(|&d| d as i64)
      .collect::<Vec<_>>();
    let geometry = TensorLayout::detect(&shape).ok_or_else(|| DecodeError::ShapeMismatchError {
      output: 0,
      shape: buffer.shape().to_vec(),
    })?;
    let (width, height) = (geometry.width as usize, geometry.height as usize);

    let image = match geometry.layout {
      TensorLayout::Nhwc => {
        let mut cursor = buffer.cursor();
        let mut image = RgbImage::new(geometry.width, geometry.height);
        for pixel in image.pixels_mut() {
          let mut rgb = [0u8; RGB_CHANNELS];
          for channel in rgb.iter_mut() {
            *channel = to_channel(cursor.next_value().unwrap_or(0.0));
          }
          *pixel = Rgb(rgb);
        }
        image
      }
      TensorLayout::Nchw => RgbImage::from_fn(geometry.width, geometry.height, |x, y| {
        let mut rgb = [0u8; RGB_CHANNELS];
        for (c, channel) in rgb.iter_mut().enumerate() {
          let index = TensorLayout::Nchw.index(x as usize, y as usize, c, width, height);
          *channel = to_channel(buffer.value(index).unwrap_or(0.0));
        }
        Rgb(rgb)
      }),
    };
    Ok(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{decoder::testing::{buffer, single}, tensor::TensorData};

  #[test]
  fn reads_nhwc_triples_and_clamps() {
    let outputs = single(buffer(
      &[1, 1, 2, 3],
      TensorData::Float32(vec![1.0, 0.5, 0.0, 2.0, -1.0, 0.2]),
    ));
    let image = SuperResolutionDecoder.decode(&outputs).unwrap();
    assert_eq!(image.dimensions(), (2, 1));
    assert_eq!(image.get_pixel(0, 0), &Rgb([255, 127, 0]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([255, 0, 51]));
  }

  #[test]
  fn reads_nchw_planes() {
    let outputs = single(buffer(
      &[1, 3, 1, 2],
      TensorData::Float32(vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
    ));
    let image = SuperResolutionDecoder.decode(&outputs).unwrap();
    assert_eq!(image.get_pixel(0, 0), &Rgb([255, 0, 0]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([0, 255, 0]));
  }

  #[test]
  fn rejects_non_image_output() {
    let outputs = single(buffer(&[1, 10], TensorData::Float32(vec![0.0; 10])));
    assert!(SuperResolutionDecoder.decode(&outputs).is_err());
  }
}
