// 该文件是 Yunjing （云镜） 项目的一部分。
// src/executor.rs - 推理执行与输出缓冲
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

use tracing::debug;

use crate::{
  runtime::{Engine, ModelHandle, RuntimeError},
  tensor::{DType, Tensor, TensorCursor, TensorData, TensorError, TensorSpec, dequantize},
};

/// 单个输出张量的原始数据及其描述
#[derive(Debug, Clone)]
pub struct OutputBuffer {
  spec: TensorSpec,
  tensor: Tensor,
}

impl OutputBuffer {
  pub fn new(spec: TensorSpec, tensor: Tensor) -> Self {
    Self { spec, tensor }
  }

  pub fn spec(&self) -> &TensorSpec {
    &self.spec
  }

  /// 实际输出形状
  pub fn shape(&self) -> &[usize] {
    self.tensor.shape()
  }

  pub fn data(&self) -> &TensorData {
    self.tensor.data()
  }

  pub fn dtype(&self) -> DType {
    self.tensor.dtype()
  }

  pub fn len(&self) -> usize {
    self.tensor.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tensor.is_empty()
  }

  pub fn raw(&self, index: usize) -> Option<f32> {
    self.tensor.data().raw(index)
  }

  /// 反量化后的第 `index` 个元素
  pub fn value(&self, index: usize) -> Option<f32> {
    self.raw(index).map(|raw| dequantize(raw, &self.spec))
  }

  /// 从位置 0 开始的顺序读取器
  pub fn cursor(&self) -> TensorCursor<'_> {
    TensorCursor::new(self.tensor.data(), self.spec.quantization())
  }
}

/// 按输出位置索引的输出缓冲
#[derive(Debug, Clone, Default)]
pub struct OutputBuffers {
  buffers: Vec<OutputBuffer>,
}

impl OutputBuffers {
  pub fn new(buffers: Vec<OutputBuffer>) -> Self {
    Self { buffers }
  }

  pub fn get(&self, index: usize) -> Option<&OutputBuffer> {
    self.buffers.get(index)
  }

  pub fn len(&self) -> usize {
    self.buffers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffers.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &OutputBuffer> {
    self.buffers.iter()
  }
}

/// 绑定输入并执行一次推理，每个输出张量对应一个缓冲
pub fn run<E: Engine>(
  handle: &mut ModelHandle<E>,
  input: &Tensor,
) -> Result<OutputBuffers, RuntimeError> {
  input.check_against(handle.input_spec(0)?)?;

  let now = std::time::Instant::now();
  let tensors = handle.invoke(input)?;
  debug!("推理完成，耗时: {:.2?}", now.elapsed());

  if tensors.len() != handle.output_count() {
    return Err(RuntimeError::InferenceRuntimeError(format!(
      "预期 {} 个输出, 实际 {} 个",
      handle.output_count(),
      tensors.len()
    )));
  }

  let mut buffers = Vec::with_capacity(tensors.len());
  for (index, tensor) in tensors.into_iter().enumerate() {
    let spec = handle.output_spec(index)?.clone();
    if tensor.dtype() != spec.dtype() {
      return Err(
        TensorError::DTypeMismatch {
          expected: spec.dtype(),
          actual: tensor.dtype(),
        }
        .into(),
      );
    }
    if let Some(expected) = spec.element_count()
      && expected != tensor.len()
    {
      return Err(
        TensorError::ShapeMismatchError {
          expected: spec.shape().to_vec(),
          actual: tensor.shape().to_vec(),
        }
        .into(),
      );
    }
    debug!("输出 {} ({}): {:?}", index, spec.name(), tensor.shape());
    buffers.push(OutputBuffer::new(spec, tensor));
  }
  Ok(OutputBuffers::new(buffers))
}
