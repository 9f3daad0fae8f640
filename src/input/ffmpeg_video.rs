// 该文件是 Yunjing （云镜） 项目的一部分。
// src/input/ffmpeg_video.rs - FFmpeg 视频文件输入
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

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{Pixel, input};
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video;
use image::RgbImage;
use tracing::{debug, error, info};
use url::Url;

use super::video_source::{FrameExtractionError, VideoSource};
use crate::{FromUrl, FromUrlWithScheme};

/// FFmpeg 解码的视频文件，既可顺序迭代，也可按时间戳定位
pub struct FfmpegVideo {
  input_context: ffmpeg::format::context::Input,
  video_stream_index: usize,
  decoder: ffmpeg::decoder::Video,
  scaler: ScalingContext,
  width: u32,
  height: u32,
  finished: bool,
}

impl FromUrlWithScheme for FfmpegVideo {
  const SCHEME: &'static str = "video";
}

impl FromUrl for FfmpegVideo {
  type Error = FrameExtractionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(FrameExtractionError::OpenError(url.to_string()));
    }
    Self::open(url.path())
  }
}

impl FfmpegVideo {
  pub fn open(path: &str) -> Result<Self, FrameExtractionError> {
    ffmpeg::init()?;

    let input_context =
      input(&path).map_err(|e| FrameExtractionError::OpenError(format!("{}: {}", path, e)))?;

    let video_stream = input_context
      .streams()
      .best(Type::Video)
      .ok_or(FrameExtractionError::NoVideoStream)?;

    let video_stream_index = video_stream.index();
    let context_decoder =
      ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?;
    let decoder = context_decoder.decoder().video()?;

    let width = decoder.width();
    let height = decoder.height();

    let scaler = ScalingContext::get(
      decoder.format(),
      width,
      height,
      Pixel::RGB24,
      width,
      height,
      Flags::BILINEAR,
    )?;
    info!("打开视频 {}: {}x{}", path, width, height);

    Ok(Self {
      input_context,
      video_stream_index,
      decoder,
      scaler,
      width,
      height,
      finished: false,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  fn decode_next_frame(&mut self) -> Result<Option<Video>, FrameExtractionError> {
    loop {
      let mut decoded = Video::empty();
      if self.decoder.receive_frame(&mut decoded).is_ok() {
        return Ok(Some(decoded));
      }

      let mut packet_iter = self.input_context.packets();
      loop {
        match packet_iter.next() {
          Some((stream, packet)) => {
            if stream.index() == self.video_stream_index {
              self.decoder.send_packet(&packet)?;
              break;
            }
          }
          None => {
            self.decoder.send_eof()?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
              return Ok(Some(decoded));
            }
            return Ok(None);
          }
        }
      }
    }
  }

  fn to_rgb(&mut self, decoded: &Video) -> Result<RgbImage, FrameExtractionError> {
    let mut rgb_frame = Video::empty();
    self.scaler.run(decoded, &mut rgb_frame)?;

    let data = rgb_frame.data(0);
    let stride = rgb_frame.stride(0);
    let width = self.width as usize;
    let height = self.height as usize;

    // 按行去掉步长对齐的填充
    let mut image_data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
      let row_start = y * stride;
      image_data.extend_from_slice(&data[row_start..row_start + width * 3]);
    }

    RgbImage::from_raw(self.width, self.height, image_data)
      .ok_or_else(|| FrameExtractionError::DecodeError("无法创建 RGB 图像".to_string()))
  }
}

impl VideoSource for FfmpegVideo {
  fn duration_ms(&mut self) -> Result<u64, FrameExtractionError> {
    // 容器时长以微秒计
    let duration = self.input_context.duration();
    if duration < 0 {
      return Err(FrameExtractionError::DurationUnavailable);
    }
    Ok(duration as u64 / 1000)
  }

  fn frame_at(&mut self, timestamp_us: u64) -> Result<Option<RgbImage>, FrameExtractionError> {
    let ts = timestamp_us as i64;
    // 定位到离时间戳最近的关键帧，前后均可
    self.input_context.seek(ts, ..)?;
    self.decoder.flush();
    self.finished = false;
    debug!("定位到 {} us", timestamp_us);

    match self.decode_next_frame()? {
      Some(decoded) => Ok(Some(self.to_rgb(&decoded)?)),
      None => Ok(None),
    }
  }
}

impl Iterator for FfmpegVideo {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    let frame = self
      .decode_next_frame()
      .and_then(|decoded| decoded.map(|d| self.to_rgb(&d)).transpose());
    match frame {
      Ok(Some(image)) => Some(image),
      Ok(None) => {
        self.finished = true;
        None
      }
      Err(e) => {
        error!("视频解码失败: {}", e);
        self.finished = true;
        None
      }
    }
  }
}
