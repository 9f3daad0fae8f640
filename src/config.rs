// 该文件是 Yunjing （云镜） 项目的一部分。
// src/config.rs - 配置文件
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::runtime::RuntimeConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法解析配置文件 {path}: {source}")]
  ParseError {
    path: PathBuf,
    source: toml::de::Error,
  },
}

/// 配置文件内容，例如：
///
/// ```toml
/// [runtime]
/// accelerator = "qnn"
/// cpu_threads = 2
///
/// [[runtime.quantization]]
/// output = 0
/// scale = 0.00390625
/// zero_point = 0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
  pub runtime: RuntimeConfig,
}

impl ConfigFile {
  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
      path: path.to_path_buf(),
      source,
    })?;
    let config = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
      path: path.to_path_buf(),
      source,
    })?;
    info!("已加载配置文件: {}", path.display());
    Ok(config)
  }
}

/// 读取运行时配置；未指定文件时使用默认值
pub fn load_runtime_config(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
  match path {
    Some(path) => Ok(ConfigFile::from_file(path)?.runtime),
    None => Ok(RuntimeConfig::default()),
  }
}
