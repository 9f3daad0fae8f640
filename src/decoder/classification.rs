// 该文件是 Yunjing （云镜） 项目的一部分。
// src/decoder/classification.rs - 图像分类解码
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

use super::{DecodeError, output, rank_scores};
use crate::{
  executor::{OutputBuffer, OutputBuffers},
  labels::Labels,
  model::ClassificationResult,
  tensor::DType,
};

pub const CLASSIFICATION_TOP_K: usize = 3;
pub const CLASSIFICATION_THRESHOLD: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct ClassificationDecoder {
  labels: Labels,
  top_k: usize,
  threshold: f32,
}

// 量化输出的 scale 不为正时按原值处理
fn score(buffer: &OutputBuffer, index: usize) -> Option<f32> {
  match (buffer.dtype(), buffer.spec().quantization()) {
    (DType::Float32, _) => buffer.raw(index),
    (_, Some(q)) if q.scale > 0.0 => buffer.value(index),
    _ => buffer.raw(index),
  }
}

impl ClassificationDecoder {
  pub fn new(labels: Labels) -> Self {
    Self {
      labels,
      top_k: CLASSIFICATION_TOP_K,
      threshold: CLASSIFICATION_THRESHOLD,
    }
  }

  pub fn with_top_k(mut self, top_k: usize) -> Self {
    self.top_k = top_k;
    self
  }

  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn decode(&self, outputs: &OutputBuffers) -> Result<Vec<ClassificationResult>, DecodeError> {
    let scores = output(outputs, 0)?;
    Ok(rank_scores(
      scores,
      &self.labels,
      self.top_k,
      self.threshold,
      score,
    ))
  }
}
