// 该文件是 Yunjing （云镜） 项目的一部分。
// src/preprocess.rs - 图像预处理：缩放、信箱填充与归一化
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
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{FrameGeometry, TensorLayout, pack_rgb},
  model::BoundingBox,
  tensor::{DType, Tensor, TensorData, TensorError, TensorSpec},
};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入张量形状无法识别为 RGB 图像: {0:?}")]
  UnsupportedShape(Vec<i64>),
  #[error("输入张量类型不受支持: {0:?}")]
  UnsupportedDType(DType),
  #[error("源图像为空")]
  EmptyImage,
  #[error("张量错误: {0}")]
  TensorError(#[from] TensorError),
}

/// 像素归一化策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
  /// 保持像素原值
  Raw,
  /// v / 255
  Unit,
  /// (v - 127.5) / 127.5
  Symmetric,
  /// (v / 255 - mean[c]) / std[c]
  MeanStd { mean: [f32; 3], std: [f32; 3] },
}

impl Normalization {
  pub const IMAGENET: Normalization = Normalization::MeanStd {
    mean: IMAGENET_MEAN,
    std: IMAGENET_STD,
  };

  pub fn apply(&self, channel: usize, value: u8) -> f32 {
    let v = value as f32;
    match self {
      Normalization::Raw => v,
      Normalization::Unit => v / 255.0,
      Normalization::Symmetric => (v - 127.5) / 127.5,
      Normalization::MeanStd { mean, std } => (v / 255.0 - mean[channel]) / std[channel],
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeMode {
  /// 直接拉伸到目标尺寸
  #[default]
  Direct,
  /// 保持宽高比缩放后居中填充黑边
  Letterbox,
}

/// 保持宽高比缩放并居中填充的几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub source: (u32, u32),
  pub scaled: (u32, u32),
  pub target: (u32, u32),
  pub offset: (u32, u32),
}

impl Letterbox {
  pub fn new(source: (u32, u32), target: (u32, u32)) -> Self {
    let (src_w, src_h) = source;
    let (dst_w, dst_h) = target;
    // 按宽高比向下取整
    let (w, h) = if src_w > src_h {
      let h = dst_w as u64 * src_h as u64 / src_w as u64;
      (dst_w, h as u32)
    } else {
      let w = dst_h as u64 * src_w as u64 / src_h.max(1) as u64;
      (w as u32, dst_h)
    };
    let scaled = (w.clamp(1, dst_w.max(1)), h.clamp(1, dst_h.max(1)));
    let offset = ((dst_w - scaled.0) / 2, (dst_h - scaled.1) / 2);
    Self {
      source,
      scaled,
      target,
      offset,
    }
  }

  pub fn scale_x(&self) -> f32 {
    self.scaled.0 as f32 / self.source.0.max(1) as f32
  }

  pub fn scale_y(&self) -> f32 {
    self.scaled.1 as f32 / self.source.1.max(1) as f32
  }

  /// 缩放并填充到目标尺寸，不裁剪
  pub fn apply(&self, image: &RgbImage) -> RgbImage {
    let resized = imageops::resize(image, self.scaled.0, self.scaled.1, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(self.target.0, self.target.1, Rgb([0, 0, 0]));
    imageops::replace(
      &mut canvas,
      &resized,
      self.offset.0 as i64,
      self.offset.1 as i64,
    );
    canvas
  }

  /// 源图像坐标 -> 模型输入坐标
  pub fn to_model(&self, bbox: BoundingBox) -> BoundingBox {
    let (sx, sy) = (self.scale_x(), self.scale_y());
    let (ox, oy) = (self.offset.0 as f32, self.offset.1 as f32);
    BoundingBox {
      left: bbox.left * sx + ox,
      top: bbox.top * sy + oy,
      right: bbox.right * sx + ox,
      bottom: bbox.bottom * sy + oy,
    }
  }

  /// 模型输入坐标 -> 源图像坐标
  pub fn to_source(&self, bbox: BoundingBox) -> BoundingBox {
    let (sx, sy) = (self.scale_x(), self.scale_y());
    let (ox, oy) = (self.offset.0 as f32, self.offset.1 as f32);
    BoundingBox {
      left: (bbox.left - ox) / sx,
      top: (bbox.top - oy) / sy,
      right: (bbox.right - ox) / sx,
      bottom: (bbox.bottom - oy) / sy,
    }
  }
}

/// 预处理结果
#[derive(Debug, Clone)]
pub struct Prepared {
  pub tensor: Tensor,
  pub geometry: FrameGeometry,
  pub letterbox: Option<Letterbox>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preprocessor {
  resize: ResizeMode,
  normalization: Normalization,
}

impl Preprocessor {
  pub fn new(resize: ResizeMode, normalization: Normalization) -> Self {
    Self {
      resize,
      normalization,
    }
  }

  pub fn resize_mode(&self) -> ResizeMode {
    self.resize
  }

  pub fn normalization(&self) -> Normalization {
    self.normalization
  }

  pub fn prepare(&self, image: &RgbImage, spec: &TensorSpec) -> Result<Prepared, PreprocessError> {
    if image.width() == 0 || image.height() == 0 {
      return Err(PreprocessError::EmptyImage);
    }
    let geometry = TensorLayout::detect(spec.shape())
      .ok_or_else(|| PreprocessError::UnsupportedShape(spec.shape().to_vec()))?;

    let (resized, letterbox) = match self.resize {
      ResizeMode::Direct => (
        imageops::resize(image, geometry.width, geometry.height, FilterType::Triangle),
        None,
      ),
      ResizeMode::Letterbox => {
        let letterbox = Letterbox::new(image.dimensions(), (geometry.width, geometry.height));
        (letterbox.apply(image), Some(letterbox))
      }
    };
    debug!(
      "预处理: {:?} -> {}x{} ({:?})",
      image.dimensions(),
      geometry.width,
      geometry.height,
      geometry.layout
    );

    let data = pack_image(&resized, geometry.layout, spec.dtype(), self.normalization)?;
    let tensor = Tensor::new(geometry.layout.shape(geometry.width, geometry.height), data)?;
    Ok(Prepared {
      tensor,
      geometry,
      letterbox,
    })
  }
}

/// 按目标类型打包；整数输入直接使用像素值，int8 偏移 -128
pub fn pack_image(
  image: &RgbImage,
  layout: TensorLayout,
  dtype: DType,
  normalization: Normalization,
) -> Result<TensorData, PreprocessError> {
  let data = match dtype {
    DType::Float32 => {
      let mut out = Vec::new();
      pack_rgb(image, layout, &mut out, |c, v| normalization.apply(c, v));
      TensorData::Float32(out)
    }
    DType::UInt8 => {
      let mut out = Vec::new();
      pack_rgb(image, layout, &mut out, |_, v| v);
      TensorData::UInt8(out)
    }
    DType::Int8 => {
      let mut out = Vec::new();
      pack_rgb(image, layout, &mut out, |_, v| (v as i16 - 128) as i8);
      TensorData::Int8(out)
    }
    other => return Err(PreprocessError::UnsupportedDType(other)),
  };
  Ok(data)
}
