// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input/image_sequence.rs - 图像目录序列输入
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use super::{
  read_image_file::{ImageFileInputError, read_rgb},
  video_source::{FrameExtractionError, VideoSource},
};
use crate::{FromUrl, FromUrlWithScheme};

const DEFAULT_FPS: f64 = 30.0;
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum ImageSequenceInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效的帧率: {0}")]
  InvalidFps(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 目录中按文件名排序的图像，视作固定帧率的视频，例如 `frames:///data/clip?fps=25`
pub struct ImageSequenceInput {
  paths: Vec<PathBuf>,
  fps: f64,
  cursor: usize,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "frames";
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageSequenceInputError::SchemeMismatch);
    }

    let mut fps = DEFAULT_FPS;
    for (key, value) in url.query_pairs() {
      if key == "fps" {
        fps = value
          .parse()
          .ok()
          .filter(|f: &f64| *f > 0.0)
          .ok_or_else(|| ImageSequenceInputError::InvalidFps(value.to_string()))?;
      }
    }
    Self::open(url.path(), fps)
  }
}

impl ImageSequenceInput {
  pub fn open(dir: impl AsRef<Path>, fps: f64) -> Result<Self, ImageSequenceInputError> {
    if fps.is_nan() || fps <= 0.0 {
      return Err(ImageSequenceInputError::InvalidFps(fps.to_string()));
    }
    let dir = dir.as_ref();
    let mut paths = std::fs::read_dir(dir)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image(path))
      .collect::<Vec<_>>();
    paths.sort();
    info!("图像序列 {}: {} 帧，{} fps", dir.display(), paths.len(), fps);
    Ok(Self {
      paths,
      fps,
      cursor: 0,
    })
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }

  pub fn fps(&self) -> f64 {
    self.fps
  }

  fn load(&self, index: usize) -> Result<RgbImage, ImageFileInputError> {
    read_rgb(&self.paths[index])
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

impl Iterator for ImageSequenceInput {
  type Item = RgbImage;

  // 无法读取的文件记录警告后跳过
  fn next(&mut self) -> Option<Self::Item> {
    while self.cursor < self.paths.len() {
      let index = self.cursor;
      self.cursor += 1;
      match self.load(index) {
        Ok(image) => return Some(image),
        Err(e) => warn!("跳过无法读取的帧 {}: {}", self.paths[index].display(), e),
      }
    }
    None
  }
}

impl VideoSource for ImageSequenceInput {
  fn duration_ms(&mut self) -> Result<u64, FrameExtractionError> {
    Ok((self.paths.len() as f64 * 1000.0 / self.fps) as u64)
  }

  fn frame_at(&mut self, timestamp_us: u64) -> Result<Option<RgbImage>, FrameExtractionError> {
    let index = (timestamp_us as f64 * self.fps / 1_000_000.0).round() as usize;
    if index >= self.paths.len() {
      return Ok(None);
    }
    match self.load(index) {
      Ok(image) => Ok(Some(image)),
      Err(ImageFileInputError::IoError(e)) => Err(e.into()),
      Err(ImageFileInputError::ImageLoadError(e)) => Err(e.into()),
      Err(ImageFileInputError::SchemeMismatch) => Ok(None),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::video_source::sample_frames;
  use image::Rgb;

  fn write_frames(dir: &Path, count: u8) {
    for i in 0..count {
      RgbImage::from_pixel(2, 2, Rgb([i, i, i]))
        .save(dir.join(format!("{:03}.png", i)))
        .unwrap();
    }
    std::fs::write(dir.join("notes.txt"), "不是图像").unwrap();
  }

  #[test]
  fn iterates_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 4);
    let input = ImageSequenceInput::open(dir.path(), 10.0).unwrap();
    assert_eq!(input.len(), 4);
    let values = input.map(|f| f.get_pixel(0, 0)[0]).collect::<Vec<_>>();
    assert_eq!(values, vec![0, 1, 2, 3]);
  }

  #[test]
  fn acts_as_video_source() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 8);
    let mut input = ImageSequenceInput::open(dir.path(), 4.0).unwrap();
    assert_eq!(input.duration_ms().unwrap(), 2000);
    let frame = input.frame_at(500_000).unwrap().unwrap();
    assert_eq!(frame.get_pixel(0, 0)[0], 2);
    assert!(input.frame_at(5_000_000).unwrap().is_none());

    let frames = sample_frames(&mut input, 4);
    let values = frames.iter().map(|f| f.get_pixel(0, 0)[0]).collect::<Vec<_>>();
    assert_eq!(values, vec![0, 2, 4, 6]);
  }

  #[test]
  fn empty_directory_has_zero_duration() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = ImageSequenceInput::open(dir.path(), 30.0).unwrap();
    assert_eq!(input.duration_ms().unwrap(), 0);
    assert!(sample_frames(&mut input, 16).is_empty());
  }

  #[test]
  fn parses_fps_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("frames://{}?fps=12.5", dir.path().display())).unwrap();
    assert_eq!(ImageSequenceInput::from_url(&url).unwrap().fps(), 12.5);

    let url = Url::parse(&format!("frames://{}?fps=-1", dir.path().display())).unwrap();
    assert!(matches!(
      ImageSequenceInput::from_url(&url),
      Err(ImageSequenceInputError::InvalidFps(_))
    ));
  }
}
