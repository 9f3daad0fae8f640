// 该文件是 Yunjing （云镜） 项目的一部分。
// src/frame.rs - NHWC/NCHW 帧布局与像素打包
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

pub const RGB_CHANNELS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  Nhwc,
  Nchw,
}

/// 从形状中识别出的图像张量几何信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
  pub layout: TensorLayout,
  pub width: u32,
  pub height: u32,
}

impl TensorLayout {
  /// 识别 `[N,H,W,3]` 或 `[N,3,H,W]`，空间维度必须是静态的
  pub fn detect(shape: &[i64]) -> Option<FrameGeometry> {
    let [_, a, b, c] = shape else {
      return None;
    };
    let (layout, height, width) = if *c == RGB_CHANNELS as i64 {
      (TensorLayout::Nhwc, *a, *b)
    } else if *a == RGB_CHANNELS as i64 {
      (TensorLayout::Nchw, *b, *c)
    } else {
      return None;
    };
    Some(FrameGeometry {
      layout,
      width: u32::try_from(width).ok().filter(|&w| w > 0)?,
      height: u32::try_from(height).ok().filter(|&h| h > 0)?,
    })
  }

  pub fn shape(&self, width: u32, height: u32) -> Vec<usize> {
    let (w, h) = (width as usize, height as usize);
    match self {
      TensorLayout::Nhwc => vec![1, h, w, RGB_CHANNELS],
      TensorLayout::Nchw => vec![1, RGB_CHANNELS, h, w],
    }
  }

  pub fn index(&self, x: usize, y: usize, c: usize, width: usize, height: usize) -> usize {
    match self {
      TensorLayout::Nhwc => (y * width + x) * RGB_CHANNELS + c,
      TensorLayout::Nchw => c * height * width + y * width + x,
    }
  }
}

/// 按布局把 RGB 图像写入 `out` 末尾，`map` 接收通道号与像素值
pub fn pack_rgb<T: Copy + Default>(
  image: &RgbImage,
  layout: TensorLayout,
  out: &mut Vec<T>,
  map: impl Fn(usize, u8) -> T,
) {
  let (width, height) = (image.width() as usize, image.height() as usize);
  let base = out.len();
  out.resize(base + width * height * RGB_CHANNELS, T::default());
  let slice = &mut out[base..];

  for (x, y, pixel) in image.enumerate_pixels() {
    let (x, y) = (x as usize, y as usize);
    for c in 0..RGB_CHANNELS {
      slice[layout.index(x, y, c, width, height)] = map(c, pixel[c]);
    }
  }
}
