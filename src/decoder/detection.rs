// 该文件是 Yunjing （云镜） 项目的一部分。
// src/decoder/detection.rs - 目标检测解码
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

use tracing::debug;

use super::{DecodeError, SourceSize, output, value_at};
use crate::{
  executor::OutputBuffers,
  labels::Labels,
  model::{BoundingBox, DetectionResult},
};

pub const DETECTION_SCORE_THRESHOLD: f32 = 0.5;
pub const MAX_DETECTIONS: usize = 10;

const BOXES: usize = 0;
const CLASSES: usize = 1;
const SCORES: usize = 2;
const COUNT: usize = 3;

/// SSD 风格的四输出检测模型：
/// 框 `[1,N,4]`（top, left, bottom, right，归一化）、类别 `[1,N]`、分数 `[1,N]`、数量 `[1]`
#[derive(Debug, Clone)]
pub struct DetectionDecoder {
  labels: Labels,
  score_threshold: f32,
  max_detections: usize,
}

impl DetectionDecoder {
  pub fn new(labels: Labels) -> Self {
    Self {
      labels,
      score_threshold: DETECTION_SCORE_THRESHOLD,
      max_detections: MAX_DETECTIONS,
    }
  }

  pub fn with_score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn with_max_detections(mut self, max: usize) -> Self {
    self.max_detections = max;
    self
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  pub fn decode(
    &self,
    outputs: &OutputBuffers,
    source: SourceSize,
  ) -> Result<Vec<DetectionResult>, DecodeError> {
    let boxes = output(outputs, BOXES)?;
    let classes = output(outputs, CLASSES)?;
    let scores = output(outputs, SCORES)?;
    let count = output(outputs, COUNT)?;

    let raw_count = value_at(count, COUNT, 0)?;
    let anchors = scores.len().min(classes.len()).min(boxes.len() / 4);
    let count = if raw_count.is_nan() {
      0
    } else {
      (raw_count as i64).clamp(0, self.max_detections as i64) as usize
    };
    if count > anchors {
      debug!("检测数量 {} 超过锚点数量 {}", count, anchors);
    }
    let count = count.min(anchors);

    let (width, height) = (source.width as f32, source.height as f32);
    let mut results = Vec::with_capacity(count);
    for i in 0..count {
      let score = value_at(scores, SCORES, i)?;
      if !(score >= self.score_threshold) {
        continue;
      }

      let class_id = value_at(classes, CLASSES, i)?.round() as i64;
      let top = value_at(boxes, BOXES, 4 * i)? * height;
      let left = value_at(boxes, BOXES, 4 * i + 1)? * width;
      let bottom = value_at(boxes, BOXES, 4 * i + 2)? * height;
      let right = value_at(boxes, BOXES, 4 * i + 3)? * width;

      results.push(DetectionResult {
        bbox: BoundingBox {
          left,
          top,
          right,
          bottom,
        },
        class_id,
        label: self.labels.get(class_id).to_string(),
        score,
      });
    }

    debug!("检测到 {} 个物体", results.len());
    Ok(results)
  }
}
