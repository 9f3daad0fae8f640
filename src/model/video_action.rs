// 该文件是 Yunjing （云镜） 项目的一部分。
// src/model/video_action.rs - 视频动作识别模型
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
  RgbImage,
  imageops::{self, FilterType},
};
use tracing::{debug, error, info, warn};

use super::{Model, ModelBuilder, ModelError, TaskKind, VideoAction};
use crate::{
  decoder::VideoActionDecoder,
  executor,
  frame::{RGB_CHANNELS, TensorLayout, pack_rgb},
  input::video_source::{VideoSource, sample_frames},
  preprocess::{Normalization, PreprocessError},
  runtime::{Backend, Engine, ModelHandle, OrtEngine},
  tensor::{DType, Tensor, TensorData, TensorSpec},
};

/// 模型帧数维度未定时使用的帧数
pub const VIDEO_FRAMES: usize = 16;
/// 模型空间维度未定时使用的边长
pub const VIDEO_INPUT_SIZE: u32 = 224;

/// 输入为 `[1, F, H, W, 3]` 的帧序列
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClipGeometry {
  frames: usize,
  width: u32,
  height: u32,
}

impl ClipGeometry {
  fn from_spec(spec: &TensorSpec) -> Result<Self, ModelError> {
    if spec.rank() != 5 || spec.dim(4) != Some(RGB_CHANNELS) {
      return Err(PreprocessError::UnsupportedShape(spec.shape().to_vec()).into());
    }
    if spec.dtype() != DType::Float32 {
      return Err(PreprocessError::UnsupportedDType(spec.dtype()).into());
    }
    Ok(Self {
      frames: spec.dim(1).filter(|&d| d > 0).unwrap_or(VIDEO_FRAMES),
      height: spec
        .dim(2)
        .filter(|&d| d > 0)
        .map_or(VIDEO_INPUT_SIZE, |d| d as u32),
      width: spec
        .dim(3)
        .filter(|&d| d > 0)
        .map_or(VIDEO_INPUT_SIZE, |d| d as u32),
    })
  }

  fn shape(&self) -> Vec<usize> {
    vec![
      1,
      self.frames,
      self.height as usize,
      self.width as usize,
      RGB_CHANNELS,
    ]
  }
}

pub struct VideoActionModel<E = OrtEngine> {
  handle: Option<ModelHandle<E>>,
  normalization: Normalization,
  decoder: VideoActionDecoder,
}

impl ModelBuilder {
  fn video_decoder(&self) -> Result<VideoActionDecoder, ModelError> {
    if self.task != TaskKind::VideoAction {
      return Err(ModelError::UnsupportedInput(format!(
        "{} 模型不接受视频输入",
        self.task.scheme()
      )));
    }
    let mut decoder = VideoActionDecoder::new(self.load_labels());
    if let Some(threshold) = self.threshold {
      decoder = decoder.with_threshold(threshold);
    }
    if let Some(top_k) = self.top_k {
      decoder = decoder.with_top_k(top_k);
    }
    Ok(decoder)
  }

  pub fn build_video<E: Engine>(self) -> Result<VideoActionModel<E>, ModelError> {
    let decoder = self.video_decoder()?;
    let handle = match ModelHandle::<E>::from_file(&self.model_path, &self.runtime) {
      Ok(handle) => Some(handle),
      Err(e) => {
        error!("视频模型加载失败，识别将返回空结果: {}", e);
        None
      }
    };
    Ok(VideoActionModel::new(handle, self.normalization, decoder))
  }

  pub fn build_video_from_bytes<E: Engine>(
    self,
    model: &[u8],
  ) -> Result<VideoActionModel<E>, ModelError> {
    let decoder = self.video_decoder()?;
    let handle = match ModelHandle::<E>::load(model, &self.runtime) {
      Ok(handle) => Some(handle),
      Err(e) => {
        error!("视频模型加载失败，识别将返回空结果: {}", e);
        None
      }
    };
    Ok(VideoActionModel::new(handle, self.normalization, decoder))
  }
}

impl<E: Engine> VideoActionModel<E> {
  pub fn new(
    handle: Option<ModelHandle<E>>,
    normalization: Normalization,
    decoder: VideoActionDecoder,
  ) -> Self {
    Self {
      handle,
      normalization,
      decoder,
    }
  }

  pub fn is_initialized(&self) -> bool {
    self.handle.is_some()
  }

  pub fn backend(&self) -> Option<Backend> {
    self.handle.as_ref().map(ModelHandle::backend)
  }

  /// 模型需要的帧数；未初始化或形状未定时为默认值
  pub fn frame_count(&self) -> usize {
    self
      .handle
      .as_ref()
      .and_then(|h| h.input_spec(0).ok())
      .and_then(|spec| ClipGeometry::from_spec(spec).ok())
      .map_or(VIDEO_FRAMES, |g| g.frames)
  }

  /// 从视频源均匀抽帧并识别动作；帧数不足时返回空列表
  pub fn classify(&mut self, source: &mut dyn VideoSource) -> Vec<VideoAction> {
    if !self.is_initialized() {
      warn!("视频模型未初始化，跳过识别");
      return Vec::new();
    }
    let expected = self.frame_count();
    let frames = sample_frames(source, expected);
    if frames.len() < expected {
      warn!("抽取到 {} 帧，模型需要 {} 帧", frames.len(), expected);
      return Vec::new();
    }
    let actions = self.predict(&frames);
    info!("识别到 {} 个动作", actions.len());
    actions
  }

  pub fn close(self) {
    match self.handle {
      Some(handle) => handle.close(),
      None => debug!("模型未初始化，无需释放"),
    }
  }

  fn pack_clip(&self, frames: &[RgbImage], geometry: ClipGeometry) -> Result<Tensor, ModelError> {
    let mut data = Vec::with_capacity(geometry.shape().iter().product());
    for frame in frames {
      if frame.width() == 0 || frame.height() == 0 {
        return Err(PreprocessError::EmptyImage.into());
      }
      let resized = imageops::resize(frame, geometry.width, geometry.height, FilterType::Triangle);
      pack_rgb(&resized, TensorLayout::Nhwc, &mut data, |c, v| {
        self.normalization.apply(c, v)
      });
    }
    let tensor = Tensor::new(geometry.shape(), TensorData::Float32(data))
      .map_err(PreprocessError::from)?;
    Ok(tensor)
  }
}

impl<E: Engine> Model for VideoActionModel<E> {
  type Input = Vec<RgbImage>;
  type Output = Vec<VideoAction>;
  type Error = ModelError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let geometry = {
      let handle = self.handle.as_ref().ok_or(ModelError::Uninitialized)?;
      ClipGeometry::from_spec(handle.input_spec(0)?)?
    };
    if input.len() != geometry.frames {
      return Err(ModelError::FrameCountMismatch {
        expected: geometry.frames,
        actual: input.len(),
      });
    }

    debug!(
      "打包 {} 帧 {}x{}",
      geometry.frames, geometry.width, geometry.height
    );
    let tensor = self.pack_clip(input, geometry)?;

    let handle = self.handle.as_mut().ok_or(ModelError::Uninitialized)?;
    let outputs = executor::run(handle, &tensor)?;
    Ok(self.decoder.decode(&outputs)?)
  }

  fn fallback(&self, _input: &Self::Input) -> Self::Output {
    Vec::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clip_geometry_fills_dynamic_dims() {
    let spec = TensorSpec::new("clip", vec![1, -1, -1, -1, 3], DType::Float32);
    let geometry = ClipGeometry::from_spec(&spec).unwrap();
    assert_eq!(
      geometry,
      ClipGeometry {
        frames: VIDEO_FRAMES,
        width: VIDEO_INPUT_SIZE,
        height: VIDEO_INPUT_SIZE,
      }
    );

    let spec = TensorSpec::new("clip", vec![1, 8, 172, 128, 3], DType::Float32);
    let geometry = ClipGeometry::from_spec(&spec).unwrap();
    assert_eq!(geometry.frames, 8);
    assert_eq!((geometry.width, geometry.height), (128, 172));
    assert_eq!(geometry.shape(), vec![1, 8, 172, 128, 3]);
  }

  #[test]
  fn zero_sized_clip_dims_use_defaults() {
    let spec = TensorSpec::new("clip", vec![1, 0, 0, 0, 3], DType::Float32);
    let geometry = ClipGeometry::from_spec(&spec).unwrap();
    assert_eq!(geometry.frames, VIDEO_FRAMES);
    assert_eq!(
      geometry.shape(),
      vec![1, VIDEO_FRAMES, VIDEO_INPUT_SIZE as usize, VIDEO_INPUT_SIZE as usize, 3]
    );
  }

  #[test]
  fn clip_geometry_rejects_image_inputs() {
    let spec = TensorSpec::new("image", vec![1, 224, 224, 3], DType::Float32);
    assert!(ClipGeometry::from_spec(&spec).is_err());
    let spec = TensorSpec::new("clip", vec![1, 16, 224, 224, 3], DType::UInt8);
    assert!(ClipGeometry::from_spec(&spec).is_err());
  }

  #[test]
  fn builder_refuses_image_task_for_video() {
    let builder = ModelBuilder::new(TaskKind::Depth, "/m.onnx");
    assert!(matches!(
      builder.build_video_from_bytes::<OrtEngine>(&[]),
      Err(ModelError::UnsupportedInput(_))
    ));
  }
}
