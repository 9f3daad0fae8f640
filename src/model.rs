// 该文件是 Yunjing （云镜） 项目的一部分。
// src/model.rs - 模型与任务结果
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

use std::{fmt::Display, path::PathBuf, str::FromStr};

use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl,
  decoder::DecodeError,
  labels::Labels,
  preprocess::{Normalization, PreprocessError},
  runtime::{RuntimeConfig, RuntimeError},
};

pub trait Model {
  type Input;
  type Output;
  type Error: Display;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  /// 推理失败时的降级结果
  fn fallback(&self, input: &Self::Input) -> Self::Output;

  /// 总能得到结果：失败时记录日志并返回降级结果
  fn predict(&mut self, input: &Self::Input) -> Self::Output {
    match self.infer(input) {
      Ok(output) => output,
      Err(e) => {
        warn!("推理失败，返回降级结果: {}", e);
        self.fallback(input)
      }
    }
  }
}

/// 源图像像素坐标下的矩形框
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
  pub bbox: BoundingBox,
  pub class_id: i64,
  pub label: String,
  pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
  pub label: String,
  pub score: f32,
}

pub type VideoAction = ClassificationResult;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型未初始化")]
  Uninitialized,
  #[error("运行时错误: {0}")]
  RuntimeError(#[from] RuntimeError),
  #[error("预处理错误: {0}")]
  PreprocessError(#[from] PreprocessError),
  #[error("解码错误: {0}")]
  DecodeError(#[from] DecodeError),
  #[error("帧数不匹配: 模型需要 {expected} 帧, 实际 {actual} 帧")]
  FrameCountMismatch { expected: usize, actual: usize },
  #[error("模型输入不受支持: {0}")]
  UnsupportedInput(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("无效的模型参数: {0}")]
  InvalidOption(String),
}

/// 模型 URL 所对应的任务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
  Depth,
  Detection,
  Segmentation,
  SuperResolution,
  Classification,
  VideoAction,
}

impl TaskKind {
  pub const ALL: [TaskKind; 6] = [
    TaskKind::Depth,
    TaskKind::Detection,
    TaskKind::Segmentation,
    TaskKind::SuperResolution,
    TaskKind::Classification,
    TaskKind::VideoAction,
  ];

  pub fn scheme(&self) -> &'static str {
    match self {
      TaskKind::Depth => "depth",
      TaskKind::Detection => "detection",
      TaskKind::Segmentation => "segmentation",
      TaskKind::SuperResolution => "superres",
      TaskKind::Classification => "classify",
      TaskKind::VideoAction => "video",
    }
  }

  pub fn from_scheme(scheme: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|t| t.scheme() == scheme)
  }

  pub fn default_normalization(&self) -> Normalization {
    match self {
      TaskKind::Depth | TaskKind::SuperResolution | TaskKind::Classification => Normalization::Unit,
      TaskKind::Detection => Normalization::Raw,
      TaskKind::Segmentation => Normalization::Symmetric,
      TaskKind::VideoAction => Normalization::IMAGENET,
    }
  }
}

fn parse_normalization(value: &str) -> Result<Normalization, ModelError> {
  match value {
    "raw" => Ok(Normalization::Raw),
    "unit" => Ok(Normalization::Unit),
    "symmetric" => Ok(Normalization::Symmetric),
    "imagenet" => Ok(Normalization::IMAGENET),
    other => Err(ModelError::InvalidOption(format!("norm={other}"))),
  }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ModelError> {
  value
    .parse()
    .map_err(|_| ModelError::InvalidOption(format!("{key}={value}")))
}

/// 从 URL 构建任务模型，例如 `detection:///models/ssd.onnx?labels=/models/coco.txt&accel=cuda`
#[derive(Debug, Clone)]
pub struct ModelBuilder {
  task: TaskKind,
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
  normalization: Normalization,
  threshold: Option<f32>,
  top_k: Option<usize>,
  runtime: RuntimeConfig,
}

impl FromUrl for ModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let task = TaskKind::from_scheme(url.scheme()).ok_or_else(|| {
      ModelError::ModelPathError(format!(
        "模型路径必须使用以下方案之一: {}",
        TaskKind::ALL.map(|t| t.scheme()).join(", ")
      ))
    })?;

    let mut builder = ModelBuilder::new(task, url.path());
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "labels" => builder.labels_path = Some(PathBuf::from(value.as_ref())),
        "norm" => builder.normalization = parse_normalization(&value)?,
        "threshold" => builder.threshold = Some(parse_number(&key, &value)?),
        "top" => builder.top_k = Some(parse_number(&key, &value)?),
        _ => {}
      }
    }
    builder.runtime = builder.runtime.apply_query(url)?;
    Ok(builder)
  }
}

impl ModelBuilder {
  pub fn new(task: TaskKind, model_path: impl Into<PathBuf>) -> Self {
    Self {
      task,
      model_path: model_path.into(),
      labels_path: None,
      normalization: task.default_normalization(),
      threshold: None,
      top_k: None,
      runtime: RuntimeConfig::default(),
    }
  }

  pub fn task(&self) -> TaskKind {
    self.task
  }

  pub fn model_path(&self) -> &PathBuf {
    &self.model_path
  }

  pub fn labels(mut self, path: impl Into<PathBuf>) -> Self {
    self.labels_path = Some(path.into());
    self
  }

  pub fn normalization(mut self, normalization: Normalization) -> Self {
    self.normalization = normalization;
    self
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.threshold = Some(threshold);
    self
  }

  pub fn top_k(mut self, top_k: usize) -> Self {
    self.top_k = Some(top_k);
    self
  }

  /// 使用配置文件中的运行时参数，URL 中的参数仍然优先
  pub fn runtime(mut self, runtime: RuntimeConfig) -> Self {
    self.runtime = runtime;
    self
  }

  pub fn merge_runtime(mut self, runtime: RuntimeConfig, url: &Url) -> Result<Self, ModelError> {
    self.runtime = runtime.apply_query(url)?;
    Ok(self)
  }

  /// 标签文件缺失时记录警告并使用空标签
  fn load_labels(&self) -> Labels {
    match &self.labels_path {
      Some(path) => Labels::from_file(path).unwrap_or_else(|e| {
        warn!("无法加载标签文件 {}: {}", path.display(), e);
        Labels::default()
      }),
      None => Labels::default(),
    }
  }
}

mod image_model;
mod video_action;

pub use self::image_model::ImageModel;
pub use self::video_action::VideoActionModel;
