// 该文件是 Yunjing （云镜） 项目的一部分。
// src/bin/video_action.rs - 视频动作识别
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

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use url::Url;

use tracing::{info, warn};
use yunjing::{
  FromUrl,
  config::load_runtime_config,
  input::{InputWrapper, sample_frames},
  model::{ModelBuilder, VideoActionModel},
  task::InferenceWorker,
};

/// Yunjing 视频动作识别
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 video:///models/movinet.onnx?labels=/models/kinetics600.txt
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 视频来源，例如 frames:///data/clip?fps=25 或 video:///data/clip.mp4
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 运行时配置文件（TOML）
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);

  let runtime = load_runtime_config(args.config.as_deref())?;
  let model: VideoActionModel = ModelBuilder::from_url(&args.model)?
    .merge_runtime(runtime, &args.model)?
    .build_video()?;
  let frame_count = model.frame_count();

  let mut input = InputWrapper::from_url(&args.input)?;
  let source = input
    .as_video_source()
    .ok_or_else(|| anyhow!("输入 {} 不支持按时间取帧", args.input))?;
  let frames = sample_frames(source, frame_count);
  info!("抽取 {} 帧", frames.len());
  if frames.len() < frame_count {
    warn!("帧数不足 {}，无法识别", frame_count);
    println!("无识别结果");
    return Ok(());
  }

  let worker = InferenceWorker::spawn(model)?;
  let result = worker.submit(frames)?.wait()?;

  if result.output.is_empty() {
    println!("无识别结果");
  }
  for action in &result.output {
    println!("{}: {:.3}", action.label, action.score);
  }
  println!("{}", result.elapsed_text());

  Ok(())
}
