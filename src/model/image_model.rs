// 该文件是 Yunjing （云镜） 项目的一部分。
// src/model/image_model.rs - 单图像任务模型
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

use image::{DynamicImage, RgbImage};
use tracing::{debug, error, info};

use super::{Model, ModelBuilder, ModelError, TaskKind};
use crate::{
  decoder::{
    ClassificationDecoder, Decoded, Decoder, DepthDecoder, DetectionDecoder, SegmentationDecoder,
    SourceSize, SuperResolutionDecoder,
  },
  executor,
  labels::Labels,
  preprocess::{Preprocessor, ResizeMode},
  runtime::{Backend, Engine, ModelHandle, OrtEngine},
};

/// 深度、检测、分割、超分辨率与分类共用的推理流程：
/// 预处理 -> 执行 -> 解码。模型加载失败时保持未初始化，推理直接返回降级结果。
pub struct ImageModel<E = OrtEngine> {
  task: TaskKind,
  handle: Option<ModelHandle<E>>,
  preprocessor: Preprocessor,
  decoder: Decoder,
}

impl ModelBuilder {
  fn image_decoder(&self, labels: Labels) -> Result<Decoder, ModelError> {
    let decoder = match self.task {
      TaskKind::Depth => Decoder::Depth(DepthDecoder),
      TaskKind::Segmentation => Decoder::Segmentation(SegmentationDecoder),
      TaskKind::SuperResolution => Decoder::SuperResolution(SuperResolutionDecoder),
      TaskKind::Detection => {
        let mut decoder = DetectionDecoder::new(labels);
        if let Some(threshold) = self.threshold {
          decoder = decoder.with_score_threshold(threshold);
        }
        if let Some(max) = self.top_k {
          decoder = decoder.with_max_detections(max);
        }
        Decoder::Detection(decoder)
      }
      TaskKind::Classification => {
        let mut decoder = ClassificationDecoder::new(labels);
        if let Some(threshold) = self.threshold {
          decoder = decoder.with_threshold(threshold);
        }
        if let Some(top_k) = self.top_k {
          decoder = decoder.with_top_k(top_k);
        }
        Decoder::Classification(decoder)
      }
      TaskKind::VideoAction => {
        return Err(ModelError::UnsupportedInput(
          "视频动作模型需要使用 build_video 构建".to_string(),
        ));
      }
    };
    Ok(decoder)
  }

  fn preprocessor(&self) -> Preprocessor {
    let resize = match self.task {
      TaskKind::SuperResolution => ResizeMode::Letterbox,
      _ => ResizeMode::Direct,
    };
    Preprocessor::new(resize, self.normalization)
  }

  /// 从文件加载模型；加载失败时得到未初始化的模型
  pub fn build_image<E: Engine>(self) -> Result<ImageModel<E>, ModelError> {
    let decoder = self.image_decoder(self.load_labels())?;
    let handle = match ModelHandle::<E>::from_file(&self.model_path, &self.runtime) {
      Ok(handle) => Some(handle),
      Err(e) => {
        error!("模型加载失败，推理将返回降级结果: {}", e);
        None
      }
    };
    Ok(ImageModel::new(self.task, handle, self.preprocessor(), decoder))
  }

  /// 从内存中的模型数据构建
  pub fn build_image_from_bytes<E: Engine>(self, model: &[u8]) -> Result<ImageModel<E>, ModelError> {
    let decoder = self.image_decoder(self.load_labels())?;
    let handle = match ModelHandle::<E>::load(model, &self.runtime) {
      Ok(handle) => Some(handle),
      Err(e) => {
        error!("模型加载失败，推理将返回降级结果: {}", e);
        None
      }
    };
    Ok(ImageModel::new(self.task, handle, self.preprocessor(), decoder))
  }
}

impl<E: Engine> ImageModel<E> {
  pub fn new(
    task: TaskKind,
    handle: Option<ModelHandle<E>>,
    preprocessor: Preprocessor,
    decoder: Decoder,
  ) -> Self {
    Self {
      task,
      handle,
      preprocessor,
      decoder,
    }
  }

  pub fn task(&self) -> TaskKind {
    self.task
  }

  pub fn is_initialized(&self) -> bool {
    self.handle.is_some()
  }

  pub fn backend(&self) -> Option<Backend> {
    self.handle.as_ref().map(ModelHandle::backend)
  }

  pub fn close(self) {
    match self.handle {
      Some(handle) => handle.close(),
      None => debug!("模型未初始化，无需释放"),
    }
  }
}

impl<E: Engine> Model for ImageModel<E> {
  type Input = RgbImage;
  type Output = Decoded;
  type Error = ModelError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let handle = self.handle.as_mut().ok_or(ModelError::Uninitialized)?;

    debug!("预处理输入图像");
    let prepared = self.preprocessor.prepare(input, handle.input_spec(0)?)?;

    debug!("执行模型推理");
    let outputs = executor::run(handle, &prepared.tensor)?;

    debug!("解码模型输出: {}", self.decoder.name());
    let decoded = self
      .decoder
      .decode(&outputs, SourceSize::new(input.width(), input.height()))?;
    if let Decoded::Detections(items) = &decoded {
      info!("检测到 {} 个物体", items.len());
    }
    Ok(decoded)
  }

  fn fallback(&self, input: &Self::Input) -> Self::Output {
    let passthrough = || DynamicImage::ImageRgb8(input.clone());
    match self.task {
      TaskKind::Depth => Decoded::Depth(passthrough()),
      TaskKind::Segmentation => Decoded::Mask(passthrough()),
      TaskKind::SuperResolution => Decoded::Upscaled(passthrough()),
      TaskKind::Detection => Decoded::Detections(Vec::new()),
      TaskKind::Classification => Decoded::Classes(Vec::new()),
      TaskKind::VideoAction => Decoded::Actions(Vec::new()),
    }
  }
}
