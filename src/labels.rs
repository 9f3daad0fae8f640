// 该文件是 Yunjing （云镜） 项目的一部分。
// src/labels.rs - 标签列表
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

use std::{convert::Infallible, path::Path, str::FromStr, sync::Arc};

use tracing::debug;

/// 越界索引对应的标签
pub const UNKNOWN_LABEL: &str = "Unknown";

/// 按行存储的标签，行号即类别编号。加载后只读，可廉价克隆共享。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Labels {
  names: Arc<[String]>,
}

impl Labels {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let labels = Self::parse(&text);
    debug!("从 {} 加载 {} 个标签", path.display(), labels.len());
    Ok(labels)
  }

  pub fn parse(text: &str) -> Self {
    let names = text
      .lines()
      .map(|line| line.trim_end_matches('\r').to_string())
      .collect::<Vec<_>>();
    Self {
      names: names.into(),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 负数或越界索引返回 "Unknown"
  pub fn get(&self, index: i64) -> &str {
    usize::try_from(index)
      .ok()
      .and_then(|i| self.names.get(i))
      .map(String::as_str)
      .unwrap_or(UNKNOWN_LABEL)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

impl FromStr for Labels {
  type Err = Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self::parse(s))
  }
}

impl<S: Into<String>> FromIterator<S> for Labels {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    let names = iter.into_iter().map(Into::into).collect::<Vec<_>>();
    Self {
      names: names.into(),
    }
  }
}
