// 该文件是 Yunjing （云镜） 项目的一部分。
// src/runtime.rs - 模型运行时：加载、后端选择与张量描述
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

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::tensor::{Quantization, Tensor, TensorError, TensorSpec};

mod ort_engine;
pub use self::ort_engine::OrtEngine;

/// CPU 回退时的线程数
pub const CPU_FALLBACK_THREADS: usize = 4;

/// 硬件加速后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accelerator {
  #[default]
  Cuda,
  CoreMl,
  DirectMl,
  Nnapi,
  Qnn,
  Rknpu,
}

impl FromStr for Accelerator {
  type Err = RuntimeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cuda" => Ok(Accelerator::Cuda),
      "coreml" => Ok(Accelerator::CoreMl),
      "directml" => Ok(Accelerator::DirectMl),
      "nnapi" => Ok(Accelerator::Nnapi),
      "qnn" => Ok(Accelerator::Qnn),
      "rknpu" => Ok(Accelerator::Rknpu),
      other => Err(RuntimeError::UnknownAccelerator(other.to_string())),
    }
  }
}

impl fmt::Display for Accelerator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Accelerator::Cuda => "cuda",
      Accelerator::CoreMl => "coreml",
      Accelerator::DirectMl => "directml",
      Accelerator::Nnapi => "nnapi",
      Accelerator::Qnn => "qnn",
      Accelerator::Rknpu => "rknpu",
    };
    f.write_str(name)
  }
}

/// 实际使用的执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
  Accelerated(Accelerator),
  Cpu { threads: usize },
}

impl fmt::Display for Backend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Backend::Accelerated(kind) => write!(f, "accelerated({kind})"),
      Backend::Cpu { threads } => write!(f, "cpu({threads})"),
    }
  }
}

/// 对某个输出张量覆盖量化参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationOverride {
  pub output: usize,
  pub scale: f32,
  pub zero_point: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
  pub accelerator: Accelerator,
  /// 跳过加速后端，直接使用 CPU
  pub prefer_cpu: bool,
  pub cpu_threads: usize,
  pub quantization: Vec<QuantizationOverride>,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      accelerator: Accelerator::default(),
      prefer_cpu: false,
      cpu_threads: CPU_FALLBACK_THREADS,
      quantization: Vec::new(),
    }
  }
}

impl RuntimeConfig {
  /// 读取 URL 中的 `accel`、`cpu`、`threads` 参数
  pub fn apply_query(mut self, url: &url::Url) -> Result<Self, RuntimeError> {
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "accel" => self.accelerator = value.parse()?,
        "cpu" => self.prefer_cpu = value != "0" && value != "false",
        "threads" => {
          self.cpu_threads = value
            .parse()
            .map_err(|_| RuntimeError::InvalidOption(format!("threads={value}")))?
        }
        _ => {}
      }
    }
    Ok(self)
  }
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("后端初始化失败: {0}")]
  Backend(String),
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("推理执行失败: {0}")]
  Execution(String),
}

/// 推理引擎的抽象，生产实现为 [`OrtEngine`]
pub trait Engine: Sized {
  fn build(model: &[u8], backend: Backend) -> Result<Self, EngineError>;
  fn input_specs(&self) -> Result<Vec<TensorSpec>, EngineError>;
  fn output_specs(&self) -> Result<Vec<TensorSpec>, EngineError>;
  /// 返回的张量按输出位置排列
  fn run(&mut self, input_name: &str, input: &Tensor) -> Result<Vec<Tensor>, EngineError>;
}

#[derive(Error, Debug)]
pub enum RuntimeError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("加速器初始化错误: {0}")]
  AcceleratorInitError(String),
  #[error("推理运行错误: {0}")]
  InferenceRuntimeError(String),
  #[error("张量索引越界: {0}")]
  NoSuchTensor(usize),
  #[error("未知的加速器: {0}")]
  UnknownAccelerator(String),
  #[error("无效的运行时参数: {0}")]
  InvalidOption(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("张量错误: {0}")]
  TensorError(#[from] TensorError),
}

/// 已加载的模型。单一所有者，执行需要 `&mut self`。
pub struct ModelHandle<E = OrtEngine> {
  engine: E,
  backend: Backend,
  inputs: Box<[TensorSpec]>,
  outputs: Box<[TensorSpec]>,
}

impl<E: Engine> ModelHandle<E> {
  pub fn from_file(path: impl AsRef<Path>, config: &RuntimeConfig) -> Result<Self, RuntimeError> {
    let path = path.as_ref();
    info!("加载模型文件: {}", path.display());
    let model = std::fs::read(path)
      .map_err(|e| RuntimeError::ModelLoadError(format!("{}: {}", path.display(), e)))?;
    debug!(
      "模型文件大小: {:.2} MB",
      model.len() as f64 / (1024.0 * 1024.0)
    );
    Self::load(&model, config)
  }

  pub fn load(model: &[u8], config: &RuntimeConfig) -> Result<Self, RuntimeError> {
    if model.is_empty() {
      return Err(RuntimeError::ModelLoadError("模型数据为空".to_string()));
    }

    let now = std::time::Instant::now();
    let (engine, backend) = Self::select_backend(model, config)?;
    info!("模型加载完成，后端: {}，耗时: {:.2?}", backend, now.elapsed());

    let inputs = engine
      .input_specs()
      .map_err(|e| RuntimeError::ModelLoadError(e.to_string()))?;
    let mut outputs = engine
      .output_specs()
      .map_err(|e| RuntimeError::ModelLoadError(e.to_string()))?;

    for o in &config.quantization {
      let Some(spec) = outputs.get_mut(o.output) else {
        warn!("量化参数覆盖的输出 {} 不存在，忽略", o.output);
        continue;
      };
      match spec
        .clone()
        .with_quantization(Quantization::new(o.scale, o.zero_point))
      {
        Ok(updated) => *spec = updated,
        Err(e) => warn!("忽略量化参数覆盖: {}", e),
      }
    }

    debug!("模型输入: {:?}", inputs);
    debug!("模型输出: {:?}", outputs);

    Ok(Self {
      engine,
      backend,
      inputs: inputs.into_boxed_slice(),
      outputs: outputs.into_boxed_slice(),
    })
  }

  // 先尝试加速后端，失败后在 CPU 上重建
  fn select_backend(model: &[u8], config: &RuntimeConfig) -> Result<(E, Backend), RuntimeError> {
    if !config.prefer_cpu {
      let backend = Backend::Accelerated(config.accelerator);
      match E::build(model, backend).map_err(|e| RuntimeError::AcceleratorInitError(e.to_string()))
      {
        Ok(engine) => return Ok((engine, backend)),
        Err(e) => warn!("{}，回退到 CPU", e),
      }
    }

    let backend = Backend::Cpu {
      threads: config.cpu_threads.max(1),
    };
    let engine = E::build(model, backend).map_err(|e| RuntimeError::ModelLoadError(e.to_string()))?;
    Ok((engine, backend))
  }

  pub fn backend(&self) -> Backend {
    self.backend
  }

  pub fn input_count(&self) -> usize {
    self.inputs.len()
  }

  pub fn output_count(&self) -> usize {
    self.outputs.len()
  }

  pub fn input_spec(&self, index: usize) -> Result<&TensorSpec, RuntimeError> {
    self
      .inputs
      .get(index)
      .ok_or(RuntimeError::NoSuchTensor(index))
  }

  pub fn output_spec(&self, index: usize) -> Result<&TensorSpec, RuntimeError> {
    self
      .outputs
      .get(index)
      .ok_or(RuntimeError::NoSuchTensor(index))
  }

  pub fn input_specs(&self) -> &[TensorSpec] {
    &self.inputs
  }

  pub fn output_specs(&self) -> &[TensorSpec] {
    &self.outputs
  }

  /// 以第 0 个输入执行一次推理，返回按输出位置排列的原始张量
  pub fn invoke(&mut self, input: &Tensor) -> Result<Vec<Tensor>, RuntimeError> {
    let name = self.input_spec(0)?.name().to_string();
    self
      .engine
      .run(&name, input)
      .map_err(|e| RuntimeError::InferenceRuntimeError(e.to_string()))
  }

  pub fn close(self) {
    info!("释放模型，后端: {}", self.backend);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::{DType, TensorData};

  struct FlakyEngine {
    backend: Backend,
  }

  impl Engine for FlakyEngine {
    fn build(model: &[u8], backend: Backend) -> Result<Self, EngineError> {
      match (model, backend) {
        (b"bad", _) => Err(EngineError::InvalidModel("损坏".to_string())),
        (b"cpu-only", Backend::Accelerated(_)) => Err(EngineError::Backend("无加速器".to_string())),
        _ => Ok(Self { backend }),
      }
    }

    fn input_specs(&self) -> Result<Vec<TensorSpec>, EngineError> {
      Ok(vec![TensorSpec::new("input", vec![1, 2], DType::Float32)])
    }

    fn output_specs(&self) -> Result<Vec<TensorSpec>, EngineError> {
      Ok(vec![
        TensorSpec::new("scores", vec![1, 2], DType::UInt8),
        TensorSpec::new("boxes", vec![1, 2], DType::Float32),
      ])
    }

    fn run(&mut self, _input_name: &str, input: &Tensor) -> Result<Vec<Tensor>, EngineError> {
      let threads = match self.backend {
        Backend::Cpu { threads } => threads as u8,
        Backend::Accelerated(_) => 0,
      };
      Ok(vec![
        Tensor::new(vec![1, 2], TensorData::UInt8(vec![threads, 0])).unwrap(),
        input.clone(),
      ])
    }
  }

  #[test]
  fn uses_accelerator_when_available() {
    let handle = ModelHandle::<FlakyEngine>::load(b"ok", &RuntimeConfig::default()).unwrap();
    assert_eq!(handle.backend(), Backend::Accelerated(Accelerator::Cuda));
    assert_eq!(handle.input_count(), 1);
    assert_eq!(handle.output_count(), 2);
  }

  #[test]
  fn falls_back_to_cpu_with_four_threads() {
    let mut handle =
      ModelHandle::<FlakyEngine>::load(b"cpu-only", &RuntimeConfig::default()).unwrap();
    assert_eq!(handle.backend(), Backend::Cpu { threads: 4 });
    let input = Tensor::new(vec![1, 2], TensorData::Float32(vec![0.0, 1.0])).unwrap();
    let outputs = handle.invoke(&input).unwrap();
    assert_eq!(outputs[0].data(), &TensorData::UInt8(vec![4, 0]));
  }

  #[test]
  fn prefer_cpu_skips_accelerator() {
    let config = RuntimeConfig {
      prefer_cpu: true,
      cpu_threads: 2,
      ..RuntimeConfig::default()
    };
    let handle = ModelHandle::<FlakyEngine>::load(b"ok", &config).unwrap();
    assert_eq!(handle.backend(), Backend::Cpu { threads: 2 });
  }

  #[test]
  fn corrupt_or_empty_model_fails_to_load() {
    let config = RuntimeConfig::default();
    assert!(matches!(
      ModelHandle::<FlakyEngine>::load(b"bad", &config),
      Err(RuntimeError::ModelLoadError(_))
    ));
    assert!(matches!(
      ModelHandle::<FlakyEngine>::load(b"", &config),
      Err(RuntimeError::ModelLoadError(_))
    ));
  }

  #[test]
  fn quantization_overrides_apply_to_integer_outputs_only() {
    let config = RuntimeConfig {
      quantization: vec![
        QuantizationOverride {
          output: 0,
          scale: 0.5,
          zero_point: 3,
        },
        QuantizationOverride {
          output: 1,
          scale: 0.5,
          zero_point: 3,
        },
        QuantizationOverride {
          output: 7,
          scale: 1.0,
          zero_point: 0,
        },
      ],
      ..RuntimeConfig::default()
    };
    let handle = ModelHandle::<FlakyEngine>::load(b"ok", &config).unwrap();
    assert_eq!(
      handle.output_spec(0).unwrap().quantization(),
      Some(Quantization::new(0.5, 3))
    );
    assert_eq!(handle.output_spec(1).unwrap().quantization(), None);
    assert!(matches!(
      handle.output_spec(2),
      Err(RuntimeError::NoSuchTensor(2))
    ));
  }

  #[test]
  fn config_reads_url_query() {
    let url = url::Url::parse("detection:///m.onnx?accel=coreml&cpu=1&threads=8").unwrap();
    let config = RuntimeConfig::default().apply_query(&url).unwrap();
    assert_eq!(config.accelerator, Accelerator::CoreMl);
    assert!(config.prefer_cpu);
    assert_eq!(config.cpu_threads, 8);

    let bad = url::Url::parse("detection:///m.onnx?accel=tpu").unwrap();
    assert!(matches!(
      RuntimeConfig::default().apply_query(&bad),
      Err(RuntimeError::UnknownAccelerator(_))
    ));
  }
}
