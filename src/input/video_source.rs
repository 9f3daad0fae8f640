// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input/video_source.rs - 视频输入源与均匀抽帧
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
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FrameExtractionError {
  #[error("无法打开视频: {0}")]
  OpenError(String),
  #[error("找不到视频流")]
  NoVideoStream,
  #[error("无法获取视频时长")]
  DurationUnavailable,
  #[error("解码错误: {0}")]
  DecodeError(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "ffmpeg_input")]
  #[error("FFmpeg 错误: {0}")]
  FfmpegError(#[from] ffmpeg_next::Error),
}

/// 可按时间戳随机访问的视频源
pub trait VideoSource {
  /// 视频时长（毫秒）
  fn duration_ms(&mut self) -> Result<u64, FrameExtractionError>;

  /// 取时间戳（微秒）附近最近的关键帧；超出范围返回 `None`
  fn frame_at(&mut self, timestamp_us: u64) -> Result<Option<RgbImage>, FrameExtractionError>;
}

/// 在整个时长上均匀抽取 `count` 帧。
///
/// 第 `i` 帧取自 `i * (duration / count)` 毫秒；取帧失败时复制上一帧，
/// 尚无成功帧时跳过。时长为 0 或无法读取时返回空列表。
pub fn sample_frames(source: &mut dyn VideoSource, count: usize) -> Vec<RgbImage> {
  if count == 0 {
    return Vec::new();
  }
  let duration_ms = match source.duration_ms() {
    Ok(0) => {
      warn!("视频时长为 0，无法抽帧");
      return Vec::new();
    }
    Ok(duration) => duration,
    Err(e) => {
      warn!("无法读取视频时长: {}", e);
      return Vec::new();
    }
  };

  let interval_ms = duration_ms / count as u64;
  debug!("视频时长 {} ms，抽取 {} 帧，间隔 {} ms", duration_ms, count, interval_ms);

  let mut frames: Vec<RgbImage> = Vec::with_capacity(count);
  for i in 0..count as u64 {
    let timestamp_us = i * interval_ms * 1000;
    let frame = match source.frame_at(timestamp_us) {
      Ok(frame) => frame,
      Err(e) => {
        warn!("第 {} 帧 ({} us) 提取失败: {}", i, timestamp_us, e);
        None
      }
    };
    match frame {
      Some(frame) => frames.push(frame),
      None => match frames.last().cloned() {
        Some(last) => {
          debug!("第 {} 帧缺失，复制上一帧", i);
          frames.push(last);
        }
        None => debug!("第 {} 帧缺失且没有可复制的帧，跳过", i),
      },
    }
  }
  frames
}

/// 内存中的帧序列，每帧带有显示时间戳（微秒）
#[derive(Debug, Clone, Default)]
pub struct InMemoryVideo {
  frames: Vec<(u64, RgbImage)>,
  duration_ms: u64,
}

impl InMemoryVideo {
  pub fn new(duration_ms: u64) -> Self {
    Self {
      frames: Vec::new(),
      duration_ms,
    }
  }

  /// 按固定帧率构建
  pub fn from_frames(frames: Vec<RgbImage>, fps: f64) -> Self {
    let step_us = if fps > 0.0 { 1_000_000.0 / fps } else { 0.0 };
    let duration_ms = (frames.len() as f64 * step_us / 1000.0) as u64;
    let frames = frames
      .into_iter()
      .enumerate()
      .map(|(i, f)| ((i as f64 * step_us) as u64, f))
      .collect();
    Self {
      frames,
      duration_ms,
    }
  }

  pub fn push(&mut self, timestamp_us: u64, frame: RgbImage) {
    let at = self.frames.partition_point(|(t, _)| *t <= timestamp_us);
    self.frames.insert(at, (timestamp_us, frame));
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

impl VideoSource for InMemoryVideo {
  fn duration_ms(&mut self) -> Result<u64, FrameExtractionError> {
    Ok(self.duration_ms)
  }

  // 所有帧都视为关键帧，取与时间戳最近的一帧
  fn frame_at(&mut self, timestamp_us: u64) -> Result<Option<RgbImage>, FrameExtractionError> {
    if timestamp_us > self.duration_ms.saturating_mul(1000) {
      return Ok(None);
    }
    Ok(
      self
        .frames
        .iter()
        .min_by_key(|(t, _)| t.abs_diff(timestamp_us))
        .map(|(_, f)| f.clone()),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn solid(v: u8) -> RgbImage {
    RgbImage::from_pixel(2, 2, Rgb([v, v, v]))
  }

  struct Scripted {
    duration: Result<u64, ()>,
    frames: Vec<Option<u8>>,
    requested: Vec<u64>,
  }

  impl VideoSource for Scripted {
    fn duration_ms(&mut self) -> Result<u64, FrameExtractionError> {
      self.duration.map_err(|_| FrameExtractionError::DurationUnavailable)
    }

    fn frame_at(&mut self, timestamp_us: u64) -> Result<Option<RgbImage>, FrameExtractionError> {
      let i = self.requested.len();
      self.requested.push(timestamp_us);
      match self.frames.get(i).copied().flatten() {
        Some(v) => Ok(Some(solid(v))),
        None if i % 2 == 0 => Ok(None),
        None => Err(FrameExtractionError::DecodeError("坏帧".to_string())),
      }
    }
  }

  #[test]
  fn samples_evenly_spaced_timestamps() {
    let mut source = Scripted {
      duration: Ok(1600),
      frames: (0..16).map(Some).collect(),
      requested: Vec::new(),
    };
    let frames = sample_frames(&mut source, 16);
    assert_eq!(frames.len(), 16);
    assert_eq!(source.requested[0], 0);
    assert_eq!(source.requested[1], 100_000);
    assert_eq!(source.requested[15], 1_500_000);
  }

  #[test]
  fn missing_frames_duplicate_previous() {
    let mut source = Scripted {
      duration: Ok(400),
      frames: vec![None, Some(10), None, Some(30)],
      requested: Vec::new(),
    };
    let frames = sample_frames(&mut source, 4);
    // 第 0 帧缺失且无可复制帧，被跳过
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].get_pixel(0, 0)[0], 10);
    assert_eq!(frames[1].get_pixel(0, 0)[0], 10);
    assert_eq!(frames[2].get_pixel(0, 0)[0], 30);
  }

  #[test]
  fn zero_or_unreadable_duration_yields_nothing() {
    let mut zero = Scripted {
      duration: Ok(0),
      frames: vec![Some(1)],
      requested: Vec::new(),
    };
    assert!(sample_frames(&mut zero, 16).is_empty());
    assert!(zero.requested.is_empty());

    let mut broken = Scripted {
      duration: Err(()),
      frames: vec![Some(1)],
      requested: Vec::new(),
    };
    assert!(sample_frames(&mut broken, 16).is_empty());
  }

  #[test]
  fn in_memory_video_snaps_to_nearest_frame() {
    let mut video = InMemoryVideo::from_frames((0..10).map(|v| solid(v * 10)).collect(), 10.0);
    assert_eq!(video.duration_ms().unwrap(), 1000);
    let frame = video.frame_at(240_000).unwrap().unwrap();
    assert_eq!(frame.get_pixel(0, 0)[0], 20);
    assert!(video.frame_at(2_000_000).unwrap().is_none());
    assert_eq!(sample_frames(&mut video, 5).len(), 5);
  }

  #[test]
  fn late_samples_snap_forward_to_nearer_sync_frame() {
    // 10 秒视频，只有 0 秒和 10 秒两个关键帧
    let mut video = InMemoryVideo::new(10_000);
    video.push(0, solid(0));
    video.push(10_000_000, solid(200));
    let frames = sample_frames(&mut video, 16);
    assert_eq!(frames.len(), 16);
    assert_eq!(frames[7].get_pixel(0, 0)[0], 0);
    assert_eq!(frames[9].get_pixel(0, 0)[0], 200);
    assert_eq!(frames[15].get_pixel(0, 0)[0], 200);
  }

  #[test]
  fn huge_duration_does_not_overflow() {
    let mut video = InMemoryVideo::new(u64::MAX);
    video.push(0, solid(7));
    let frame = video.frame_at(u64::MAX).unwrap().unwrap();
    assert_eq!(frame.get_pixel(0, 0)[0], 7);
  }
}
