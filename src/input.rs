// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input.rs - 图像/视频输入
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
use thiserror::Error;
use url::Url;

use crate::FromUrl;

pub mod video_source;
pub use self::video_source::{FrameExtractionError, InMemoryVideo, VideoSource, sample_frames};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "read_image_file")]
mod image_sequence;
#[cfg(feature = "read_image_file")]
pub use self::image_sequence::{ImageSequenceInput, ImageSequenceInputError};

#[cfg(feature = "ffmpeg_input")]
mod ffmpeg_video;
#[cfg(feature = "ffmpeg_input")]
pub use self::ffmpeg_video::FfmpegVideo;

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "read_image_file")]
  #[error("图像序列输入错误: {0}")]
  ImageSequenceInputError(#[from] ImageSequenceInputError),
  #[error("视频输入错误: {0}")]
  FrameExtractionError(#[from] FrameExtractionError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  ImageSequence(ImageSequenceInput),
  #[cfg(feature = "ffmpeg_input")]
  FfmpegVideo(FfmpegVideo),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "read_image_file")]
      <ImageFileInput as crate::FromUrlWithScheme>::SCHEME => {
        Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?))
      }
      #[cfg(feature = "read_image_file")]
      <ImageSequenceInput as crate::FromUrlWithScheme>::SCHEME => Ok(InputWrapper::ImageSequence(
        ImageSequenceInput::from_url(url)?,
      )),
      #[cfg(feature = "ffmpeg_input")]
      <FfmpegVideo as crate::FromUrlWithScheme>::SCHEME => {
        Ok(InputWrapper::FfmpegVideo(FfmpegVideo::from_url(url)?))
      }
      _ => Err(InputError::SchemeMismatch),
    }
  }
}

impl InputWrapper {
  /// 支持按时间戳取帧的输入
  pub fn as_video_source(&mut self) -> Option<&mut dyn VideoSource> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(_) => None,
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => Some(input),
      #[cfg(feature = "ffmpeg_input")]
      InputWrapper::FfmpegVideo(input) => Some(input),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ImageSequence(input) => input.next(),
      #[cfg(feature = "ffmpeg_input")]
      InputWrapper::FfmpegVideo(input) => input.next(),
    }
  }
}
