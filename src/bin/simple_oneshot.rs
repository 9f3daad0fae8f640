// 该文件是 Yunjing （云镜） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像推理
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use yunjing::{
  FromUrl,
  config::load_runtime_config,
  model::{ImageModel, ModelBuilder},
  task::{OneShotTask, Task},
};

/// Yunjing 单张图像推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 depth:///models/midas.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///data/in.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，例如 image:///data/out.png
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 运行时配置文件（TOML）
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let runtime = load_runtime_config(args.config.as_deref())?;
  let input_image = yunjing::input::ImageFileInput::from_url(&args.input)?;
  let model: ImageModel = ModelBuilder::from_url(&args.model)?
    .merge_runtime(runtime, &args.model)?
    .build_image()?;
  let output = yunjing::output::OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input_image, model, output)?;

  Ok(())
}
