// 该文件是 Yunjing （云镜） 项目的一部分。
// src/runtime/ort_engine.rs - ONNX Runtime 推理引擎
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

use ndarray::{ArrayD, IxDyn};
use ort::{
  execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    DirectMLExecutionProvider, ExecutionProviderDispatch, NNAPIExecutionProvider,
    QNNExecutionProvider, RKNPUExecutionProvider,
  },
  session::{Session, builder::GraphOptimizationLevel},
  tensor::TensorElementType,
  value::{DynValue, Tensor as OrtTensor, ValueType},
};
use tracing::debug;

use super::{Accelerator, Backend, Engine, EngineError};
use crate::tensor::{DType, Tensor, TensorData, TensorSpec};

pub struct OrtEngine {
  session: Session,
}

// 加速后端注册失败时必须报错，不能静默退化为 CPU
fn accelerator_provider(accelerator: Accelerator) -> ExecutionProviderDispatch {
  let provider = match accelerator {
    Accelerator::Cuda => CUDAExecutionProvider::default().build(),
    Accelerator::CoreMl => CoreMLExecutionProvider::default().build(),
    Accelerator::DirectMl => DirectMLExecutionProvider::default().build(),
    Accelerator::Nnapi => NNAPIExecutionProvider::default().build(),
    Accelerator::Qnn => QNNExecutionProvider::default().build(),
    Accelerator::Rknpu => RKNPUExecutionProvider::default().build(),
  };
  provider.error_on_failure()
}

fn backend_error(e: impl std::fmt::Display) -> EngineError {
  EngineError::Backend(e.to_string())
}

fn tensor_spec(name: &str, value_type: &ValueType) -> Result<TensorSpec, EngineError> {
  match value_type {
    ValueType::Tensor { ty, shape, .. } => {
      let dtype = match ty {
        TensorElementType::Float32 => DType::Float32,
        TensorElementType::Uint8 => DType::UInt8,
        TensorElementType::Int8 => DType::Int8,
        TensorElementType::Int64 => DType::Int64,
        other => {
          return Err(EngineError::InvalidModel(format!(
            "张量 {} 的元素类型 {:?} 不受支持",
            name, other
          )));
        }
      };
      let shape = shape.iter().copied().collect::<Vec<i64>>();
      Ok(TensorSpec::new(name, shape, dtype))
    }
    other => Err(EngineError::InvalidModel(format!(
      "{} 不是张量: {:?}",
      name, other
    ))),
  }
}

fn to_value(input: &Tensor) -> Result<DynValue, EngineError> {
  let shape = IxDyn(input.shape());
  let execution = |e: ndarray::ShapeError| EngineError::Execution(e.to_string());
  let value = match input.data() {
    TensorData::Float32(v) => {
      OrtTensor::from_array(ArrayD::from_shape_vec(shape, v.clone()).map_err(execution)?)
        .map(|t| t.into_dyn())
    }
    TensorData::UInt8(v) => {
      OrtTensor::from_array(ArrayD::from_shape_vec(shape, v.clone()).map_err(execution)?)
        .map(|t| t.into_dyn())
    }
    TensorData::Int8(v) => {
      OrtTensor::from_array(ArrayD::from_shape_vec(shape, v.clone()).map_err(execution)?)
        .map(|t| t.into_dyn())
    }
    TensorData::Int64(v) => {
      OrtTensor::from_array(ArrayD::from_shape_vec(shape, v.clone()).map_err(execution)?)
        .map(|t| t.into_dyn())
    }
  };
  value.map_err(|e| EngineError::Execution(e.to_string()))
}

fn dims(shape: &[i64]) -> Vec<usize> {
  shape.iter().map(|&d| d.max(0) as usize).collect()
}

fn from_value(name: &str, value: &DynValue) -> Result<Tensor, EngineError> {
  let (shape, data) = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
    (dims(shape), TensorData::Float32(data.to_vec()))
  } else if let Ok((shape, data)) = value.try_extract_tensor::<u8>() {
    (dims(shape), TensorData::UInt8(data.to_vec()))
  } else if let Ok((shape, data)) = value.try_extract_tensor::<i8>() {
    (dims(shape), TensorData::Int8(data.to_vec()))
  } else if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
    (dims(shape), TensorData::Int64(data.to_vec()))
  } else {
    return Err(EngineError::Execution(format!(
      "输出 {} 的类型不受支持",
      name
    )));
  };
  Tensor::new(shape, data).map_err(|e| EngineError::Execution(e.to_string()))
}

impl Engine for OrtEngine {
  fn build(model: &[u8], backend: Backend) -> Result<Self, EngineError> {
    debug!("创建 ONNX Runtime 会话，后端: {}", backend);
    let builder = Session::builder()
      .map_err(backend_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(backend_error)?;

    let builder = match backend {
      Backend::Accelerated(accelerator) => builder
        .with_execution_providers([accelerator_provider(accelerator)])
        .map_err(backend_error)?,
      Backend::Cpu { threads } => builder
        .with_intra_threads(threads)
        .map_err(backend_error)?
        .with_execution_providers([CPUExecutionProvider::default().build()])
        .map_err(backend_error)?,
    };

    let session = builder
      .commit_from_memory(model)
      .map_err(|e| EngineError::InvalidModel(e.to_string()))?;
    Ok(Self { session })
  }

  fn input_specs(&self) -> Result<Vec<TensorSpec>, EngineError> {
    self
      .session
      .inputs
      .iter()
      .map(|i| tensor_spec(&i.name, &i.input_type))
      .collect()
  }

  fn output_specs(&self) -> Result<Vec<TensorSpec>, EngineError> {
    self
      .session
      .outputs
      .iter()
      .map(|o| tensor_spec(&o.name, &o.output_type))
      .collect()
  }

  fn run(&mut self, input_name: &str, input: &Tensor) -> Result<Vec<Tensor>, EngineError> {
    let output_names = self
      .session
      .outputs
      .iter()
      .map(|o| o.name.clone())
      .collect::<Vec<_>>();

    let value = to_value(input)?;
    let outputs = self
      .session
      .run(ort::inputs![input_name => value])
      .map_err(|e| EngineError::Execution(e.to_string()))?;

    output_names
      .iter()
      .map(|name| {
        let value = outputs
          .get(name.as_str())
          .ok_or_else(|| EngineError::Execution(format!("缺少输出 {}", name)))?;
        from_value(name, value)
      })
      .collect()
  }
}
