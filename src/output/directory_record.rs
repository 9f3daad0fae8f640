// 该文件是 Yunjing （云镜） 项目的一部分。
// src/output/directory_record.rs - 按日期目录记录结果
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU32, Ordering},
};

use chrono::{Datelike, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  decoder::Decoded,
  output::{
    Render,
    draw::{Draw, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn with(kind: &str) -> Self {
    match kind {
      "name" => DrawWrapper::Record(Record::Text {
        label_with_name: true,
      }),
      "id" => DrawWrapper::Record(Record::Text {
        label_with_name: false,
      }),
      "json" => DrawWrapper::Record(Record::Json),
      _ => DrawWrapper::Draw(Box::default()),
    }
  }

  pub fn save_result(
    &self,
    path: &Path,
    frame: &RgbImage,
    result: &Decoded,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => draw.render(frame, result).save(path)?,
      DrawWrapper::Record(record) => {
        frame.save(path)?;
        record.record(frame, result, path)?;
      }
    }
    Ok(())
  }
}

/// 结果按 `YYYY/MM/DD/HH-MM-SS-XXXX.png` 保存，例如 `folder:///data/records?record=json&always`。
/// 默认只保存非空结果。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mut draw = DrawWrapper::with("draw");
    let mut always = false;
    for (k, v) in uri.query_pairs() {
      match k.as_ref() {
        "record" => draw = DrawWrapper::with(&v),
        "always" => always = true,
        "font" => {
          draw = match draw {
            DrawWrapper::Draw(d) => DrawWrapper::Draw(Box::new((*d).with_font_file(v.as_ref())?)),
            other => other,
          }
        }
        _ => {}
      }
    }

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw,
      frame_counter: AtomicU32::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id() & 0xFFFF
    )))
  }
}

impl Render<RgbImage, Decoded> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &Decoded) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("结果为空，跳过记录");
      return Ok(());
    }
    let path = self.frame_path()?;
    self.draw.save_result(&path, frame, result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ClassificationResult;
  use url::Url;

  fn saved_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files.sort();
    files
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = RgbImage::new(4, 4);

    let url = Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output
      .render_result(&frame, &Decoded::Classes(Vec::new()))
      .unwrap();
    assert!(saved_files(dir.path()).is_empty());

    let url = Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output
      .render_result(&frame, &Decoded::Classes(Vec::new()))
      .unwrap();
    assert_eq!(saved_files(dir.path()).len(), 1);
  }

  #[test]
  fn record_mode_writes_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("folder://{}?record=name", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let result = Decoded::Actions(vec![ClassificationResult {
      label: "跑步".to_string(),
      score: 0.75,
    }]);
    output.render_result(&RgbImage::new(4, 4), &result).unwrap();

    let files = saved_files(dir.path());
    assert_eq!(files.len(), 2);
    let sidecar = files
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "txt"))
      .unwrap();
    assert_eq!(std::fs::read_to_string(sidecar).unwrap(), "跑步, 0.7500");
    assert!(sidecar.to_string_lossy().contains("-0001"));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("image:///tmp/out.png").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::from_url(&url),
      Err(DirectoryRecordOutputError::SchemeMismatch)
    ));
  }
}
