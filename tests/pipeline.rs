// 该文件是 Yunjing （云镜） 项目的一部分。
// tests/pipeline.rs - 端到端推理流程
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

use image::{Rgb, RgbImage};
use yunjing::{
  decoder::Decoded,
  input::{InMemoryVideo, ImageSequenceInput},
  model::{ImageModel, Model, ModelBuilder, ModelError, TaskKind, VideoActionModel},
  runtime::{Backend, Engine, EngineError},
  task::InferenceWorker,
  tensor::{DType, Tensor, TensorData, TensorSpec},
};

const ANCHORS: usize = 20;

/// 按模型数据选择固定行为的引擎
#[derive(Debug, Clone, Copy)]
enum Scripted {
  Depth,
  Detection,
  Video,
  BrokenRun,
}

impl Engine for Scripted {
  fn build(model: &[u8], _backend: Backend) -> Result<Self, EngineError> {
    match model {
      b"depth" => Ok(Scripted::Depth),
      b"detection" => Ok(Scripted::Detection),
      b"video" => Ok(Scripted::Video),
      b"broken-run" => Ok(Scripted::BrokenRun),
      _ => Err(EngineError::InvalidModel("无法解析模型".to_string())),
    }
  }

  fn input_specs(&self) -> Result<Vec<TensorSpec>, EngineError> {
    let spec = match self {
      Scripted::Depth | Scripted::BrokenRun => {
        TensorSpec::new("image", vec![1, 4, 4, 3], DType::Float32)
      }
      Scripted::Detection => TensorSpec::new("image", vec![1, 4, 4, 3], DType::UInt8),
      Scripted::Video => TensorSpec::new("clip", vec![1, 16, 8, 8, 3], DType::Float32),
    };
    Ok(vec![spec])
  }

  fn output_specs(&self) -> Result<Vec<TensorSpec>, EngineError> {
    let n = ANCHORS as i64;
    let specs = match self {
      Scripted::Depth | Scripted::BrokenRun => {
        vec![TensorSpec::new("depth", vec![1, 4, 4, 1], DType::Float32)]
      }
      Scripted::Detection => vec![
        TensorSpec::new("boxes", vec![1, n, 4], DType::Float32),
        TensorSpec::new("classes", vec![1, n], DType::Float32),
        TensorSpec::new("scores", vec![1, n], DType::Float32),
        TensorSpec::new("count", vec![1], DType::Float32),
      ],
      Scripted::Video => vec![TensorSpec::new("logits", vec![1, 10], DType::Float32)],
    };
    Ok(specs)
  }

  fn run(&mut self, _input_name: &str, input: &Tensor) -> Result<Vec<Tensor>, EngineError> {
    let tensor = |shape: Vec<usize>, data: Vec<f32>| {
      Tensor::new(shape, TensorData::Float32(data)).map_err(|e| EngineError::Execution(e.to_string()))
    };
    match self {
      Scripted::Depth => Ok(vec![tensor(vec![1, 4, 4, 1], vec![0.5; 16])?]),
      Scripted::BrokenRun => Err(EngineError::Execution("设备丢失".to_string())),
      Scripted::Detection => {
        assert_eq!(input.dtype(), DType::UInt8);
        let boxes = (0..ANCHORS).flat_map(|_| [0.25, 0.25, 0.75, 0.75]).collect();
        let classes = (0..ANCHORS).map(|i| (i % 3) as f32).collect();
        // 奇数锚点低于阈值
        let scores = (0..ANCHORS)
          .map(|i| if i % 2 == 0 { 0.9 } else { 0.3 })
          .collect();
        Ok(vec![
          tensor(vec![1, ANCHORS, 4], boxes)?,
          tensor(vec![1, ANCHORS], classes)?,
          tensor(vec![1, ANCHORS], scores)?,
          tensor(vec![1], vec![ANCHORS as f32])?,
        ])
      }
      Scripted::Video => {
        assert_eq!(input.shape(), &[1, 16, 8, 8, 3]);
        let mut scores = vec![0.9, 0.04];
        scores.resize(10, 0.01);
        Ok(vec![tensor(vec![1, 10], scores)?])
      }
    }
  }
}

fn image_model(task: TaskKind, model: &[u8]) -> ImageModel<Scripted> {
  ModelBuilder::new(task, "unused.onnx")
    .build_image_from_bytes(model)
    .unwrap()
}

fn photo() -> RgbImage {
  RgbImage::from_fn(100, 50, |x, y| Rgb([x as u8, y as u8, 128]))
}

#[test]
fn flat_depth_output_gives_uniform_image() {
  let mut model = image_model(TaskKind::Depth, b"depth");
  assert!(model.is_initialized());
  let Decoded::Depth(depth) = model.infer(&photo()).unwrap() else {
    panic!("期望深度图");
  };
  let gray = depth.to_luma8();
  assert_eq!(gray.dimensions(), (4, 4));
  assert!(gray.pixels().all(|p| p[0] == 0));
}

#[test]
fn detections_are_capped_and_thresholded() {
  let mut model = image_model(TaskKind::Detection, b"detection");
  let Decoded::Detections(items) = model.predict(&photo()) else {
    panic!("期望检测结果");
  };
  // 数量被截断为 10，其中一半低于阈值
  assert_eq!(items.len(), 5);
  assert!(items.iter().all(|d| d.score >= 0.5));
  let first = &items[0];
  assert_eq!(first.label, "Unknown");
  assert_eq!(first.bbox.left, 25.0);
  assert_eq!(first.bbox.top, 12.5);
  assert_eq!(first.bbox.right, 75.0);
  assert_eq!(first.bbox.bottom, 37.5);
}

#[test]
fn corrupt_model_passes_input_through() {
  let mut model = image_model(TaskKind::Depth, b"\x00\x01garbage");
  assert!(!model.is_initialized());
  assert!(matches!(
    model.infer(&photo()),
    Err(ModelError::Uninitialized)
  ));
  let result = model.predict(&photo());
  assert_eq!(result.image().unwrap().to_rgb8(), photo());

  let mut detector = image_model(TaskKind::Detection, b"");
  assert!(detector.predict(&photo()).is_empty());
}

#[test]
fn execution_failure_degrades_to_passthrough() {
  let mut model = image_model(TaskKind::Depth, b"broken-run");
  assert!(model.is_initialized());
  assert!(matches!(
    model.infer(&photo()),
    Err(ModelError::RuntimeError(_))
  ));
  let result = model.predict(&photo());
  assert_eq!(result.image().unwrap().to_rgb8(), photo());
}

fn video_model(labels: &std::path::Path) -> VideoActionModel<Scripted> {
  ModelBuilder::new(TaskKind::VideoAction, "unused.onnx")
    .labels(labels)
    .build_video_from_bytes(b"video")
    .unwrap()
}

fn write_labels(dir: &std::path::Path) -> std::path::PathBuf {
  let path = dir.join("actions.txt");
  let labels = (0..10).map(|i| format!("action{i}")).collect::<Vec<_>>();
  std::fs::write(&path, labels.join("\n")).unwrap();
  path
}

#[test]
fn video_scores_keep_only_confident_actions() {
  let dir = tempfile::tempdir().unwrap();
  let mut model = video_model(&write_labels(dir.path()));
  assert_eq!(model.frame_count(), 16);

  let frames = (0..32)
    .map(|i| RgbImage::from_pixel(12, 10, Rgb([i * 8, 0, 0])))
    .collect();
  let mut video = InMemoryVideo::from_frames(frames, 10.0);
  let actions = model.classify(&mut video);
  assert_eq!(actions.len(), 1);
  assert_eq!(actions[0].label, "action0");
  assert_eq!(actions[0].score, 0.9);
}

#[test]
fn zero_duration_video_yields_no_actions() {
  let dir = tempfile::tempdir().unwrap();
  let mut model = video_model(&write_labels(dir.path()));
  let mut video = InMemoryVideo::new(0);
  assert!(model.classify(&mut video).is_empty());
}

#[test]
fn wrong_frame_count_is_rejected() {
  let dir = tempfile::tempdir().unwrap();
  let mut model = video_model(&write_labels(dir.path()));
  let frames = vec![RgbImage::new(8, 8); 3];
  assert!(matches!(
    model.infer(&frames),
    Err(ModelError::FrameCountMismatch {
      expected: 16,
      actual: 3
    })
  ));
  assert!(model.predict(&frames).is_empty());
}

#[test]
fn image_sequence_feeds_video_model() {
  let dir = tempfile::tempdir().unwrap();
  let frames = dir.path().join("frames");
  std::fs::create_dir(&frames).unwrap();
  for i in 0..20u8 {
    RgbImage::from_pixel(6, 6, Rgb([i, i, i]))
      .save(frames.join(format!("{i:04}.png")))
      .unwrap();
  }
  let mut model = video_model(&write_labels(dir.path()));
  let mut input = ImageSequenceInput::open(&frames, 20.0).unwrap();
  let actions = model.classify(&mut input);
  assert_eq!(actions.len(), 1);
}

#[test]
fn worker_runs_model_off_thread() {
  let worker = InferenceWorker::spawn(image_model(TaskKind::Detection, b"detection")).unwrap();
  let first = worker.submit(photo()).unwrap();
  let second = worker.submit(RgbImage::new(10, 10)).unwrap();

  let first = first.wait().unwrap();
  assert!(first.elapsed_text().starts_with("Estimated Output Time: "));
  assert!(first.elapsed_text().ends_with(" ms"));
  let Decoded::Detections(items) = first.output else {
    panic!("期望检测结果");
  };
  assert_eq!(items.len(), 5);
  assert!(!second.wait().unwrap().output.is_empty());
}
