// 该文件是 Yunjing （云镜） 项目的一部分。
// src/decoder.rs - 任务解码器
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

use image::DynamicImage;
use thiserror::Error;

use crate::{
  executor::{OutputBuffer, OutputBuffers},
  labels::Labels,
  model::{ClassificationResult, DetectionResult, VideoAction},
  ranking::RankedCollector,
  tensor::DType,
};

mod classification;
mod depth;
mod detection;
mod segmentation;
mod super_resolution;
mod video_action;

pub use self::classification::{
  CLASSIFICATION_THRESHOLD, CLASSIFICATION_TOP_K, ClassificationDecoder,
};
pub use self::depth::DepthDecoder;
pub use self::detection::{
  DETECTION_SCORE_THRESHOLD, DetectionDecoder, MAX_DETECTIONS,
};
pub use self::segmentation::{PALETTE, SegmentationDecoder, SegmentationMask};
pub use self::super_resolution::SuperResolutionDecoder;
pub use self::video_action::{VIDEO_ACTION_THRESHOLD, VIDEO_ACTION_TOP_K, VideoActionDecoder};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("缺少第 {0} 个输出")]
  MissingOutputError(usize),
  #[error("第 {output} 个输出形状不符合预期: {shape:?}")]
  ShapeMismatchError { output: usize, shape: Vec<usize> },
  #[error("第 {output} 个输出元素不足: 需要 {needed}, 实际 {actual}")]
  TooFewElementsError {
    output: usize,
    needed: usize,
    actual: usize,
  },
  #[error("不支持的输出类型: {0:?}")]
  UnsupportedDTypeError(DType),
}

/// 源图像尺寸，用于把结果映射回源坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSize {
  pub width: u32,
  pub height: u32,
}

impl SourceSize {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

/// 每个任务一个解码器
#[derive(Debug, Clone)]
pub enum Decoder {
  Depth(DepthDecoder),
  Detection(DetectionDecoder),
  Segmentation(SegmentationDecoder),
  SuperResolution(SuperResolutionDecoder),
  VideoAction(VideoActionDecoder),
  Classification(ClassificationDecoder),
}

/// 解码后的任务结果
#[derive(Debug, Clone)]
pub enum Decoded {
  /// 灰度深度图
  Depth(DynamicImage),
  Detections(Vec<DetectionResult>),
  /// 已缩放到源尺寸的分割掩码
  Mask(DynamicImage),
  Upscaled(DynamicImage),
  Classes(Vec<ClassificationResult>),
  Actions(Vec<VideoAction>),
}

impl Decoded {
  /// 结果中是否没有可展示的内容
  pub fn is_empty(&self) -> bool {
    match self {
      Decoded::Detections(items) => items.is_empty(),
      Decoded::Classes(items) | Decoded::Actions(items) => items.is_empty(),
      Decoded::Depth(_) | Decoded::Mask(_) | Decoded::Upscaled(_) => false,
    }
  }

  pub fn image(&self) -> Option<&DynamicImage> {
    match self {
      Decoded::Depth(image) | Decoded::Mask(image) | Decoded::Upscaled(image) => Some(image),
      _ => None,
    }
  }
}

impl Decoder {
  pub fn decode(&self, outputs: &OutputBuffers, source: SourceSize) -> Result<Decoded, DecodeError> {
    match self {
      Decoder::Depth(d) => d.decode(outputs).map(|m| Decoded::Depth(m.into())),
      Decoder::Detection(d) => d.decode(outputs, source).map(Decoded::Detections),
      Decoder::Segmentation(d) => d.decode(outputs, source).map(|m| Decoded::Mask(m.into())),
      Decoder::SuperResolution(d) => d.decode(outputs).map(|m| Decoded::Upscaled(m.into())),
      Decoder::VideoAction(d) => d.decode(outputs).map(Decoded::Actions),
      Decoder::Classification(d) => d.decode(outputs).map(Decoded::Classes),
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Decoder::Depth(_) => "depth",
      Decoder::Detection(_) => "detection",
      Decoder::Segmentation(_) => "segmentation",
      Decoder::SuperResolution(_) => "superres",
      Decoder::VideoAction(_) => "video",
      Decoder::Classification(_) => "classify",
    }
  }
}

fn output(outputs: &OutputBuffers, index: usize) -> Result<&OutputBuffer, DecodeError> {
  outputs
    .get(index)
    .ok_or(DecodeError::MissingOutputError(index))
}

fn value_at(buffer: &OutputBuffer, output: usize, index: usize) -> Result<f32, DecodeError> {
  buffer.value(index).ok_or(DecodeError::TooFewElementsError {
    output,
    needed: index + 1,
    actual: buffer.len(),
  })
}

/// 把一维分数向量按标签排序，`score` 决定每个元素的取值方式
fn rank_scores(
  buffer: &OutputBuffer,
  labels: &Labels,
  top_k: usize,
  threshold: f32,
  score: impl Fn(&OutputBuffer, usize) -> Option<f32>,
) -> Vec<ClassificationResult> {
  let count = if labels.is_empty() {
    buffer.len()
  } else {
    labels.len().min(buffer.len())
  };

  let mut collector = RankedCollector::new(top_k, threshold);
  for i in 0..count {
    if let Some(s) = score(buffer, i) {
      collector.push(s, i);
    }
  }
  collector
    .into_scored_vec()
    .into_iter()
    .map(|(score, i)| ClassificationResult {
      label: labels.get(i as i64).to_string(),
      score,
    })
    .collect()
}

#[cfg(test)]
pub(crate) mod testing {
  use crate::{
    executor::{OutputBuffer, OutputBuffers},
    tensor::{DType, Quantization, Tensor, TensorData, TensorSpec},
  };

  pub fn buffer(shape: &[usize], data: TensorData) -> OutputBuffer {
    let spec = TensorSpec::new(
      "out",
      shape.iter().map(|&d| d as i64).collect::<Vec<_>>(),
      data.dtype(),
    );
    OutputBuffer::new(spec, Tensor::new(shape.to_vec(), data).unwrap())
  }

  pub fn quantized(shape: &[usize], data: Vec<u8>, q: Quantization) -> OutputBuffer {
    let spec = TensorSpec::new(
      "out",
      shape.iter().map(|&d| d as i64).collect::<Vec<_>>(),
      DType::UInt8,
    )
    .with_quantization(q)
    .unwrap();
    OutputBuffer::new(
      spec,
      Tensor::new(shape.to_vec(), TensorData::UInt8(data)).unwrap(),
    )
  }

  pub fn single(buffer: OutputBuffer) -> OutputBuffers {
    OutputBuffers::new(vec![buffer])
  }
}
