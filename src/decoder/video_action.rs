// 该文件是 Yunjing （云镜） 项目的一部分。
// src/decoder/video_action.rs - 视频动作识别解码
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
use crate::{executor::OutputBuffers, labels::Labels, model::VideoAction};

pub const VIDEO_ACTION_TOP_K: usize = 3;
pub const VIDEO_ACTION_THRESHOLD: f32 = 0.05;

#[derive(Debug, Clone)]
pub struct VideoActionDecoder {
  labels: Labels,
  top_k: usize,
  threshold: f32,
}

impl VideoActionDecoder {
  pub fn new(labels: Labels) -> Self {
    Self {
      labels,
      top_k: VIDEO_ACTION_TOP_K,
      threshold: VIDEO_ACTION_THRESHOLD,
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

  /// 每个标签一个分数，保留分数大于阈值的前 k 个，按分数降序
  pub fn decode(&self, outputs: &OutputBuffers) -> Result<Vec<VideoAction>, DecodeError> {
    let scores = output(outputs, 0)?;
    Ok(rank_scores(
      scores,
      &self.labels,
      self.top_k,
      self.threshold,
      |buffer, i| buffer.value(i),
    ))
  }
}
