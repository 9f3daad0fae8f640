// 该文件是 Yunjing （云镜） 项目的一部分。
// src/tensor.rs - 张量描述、量化参数与张量数据
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatchError {
    expected: Vec<i64>,
    actual: Vec<usize>,
  },
  #[error("张量数据长度不匹配: 形状 {shape:?} 需要 {expected} 个元素, 实际 {actual} 个")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("张量类型不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  DTypeMismatch { expected: DType, actual: DType },
  #[error("浮点张量 {0} 不能携带量化参数")]
  QuantizationOnFloat(String),
}

/// 张量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
  Float32,
  UInt8,
  Int8,
  Int64,
}

impl DType {
  /// 单个元素占用的字节数
  pub fn size_of(&self) -> usize {
    match self {
      DType::Float32 => 4,
      DType::UInt8 | DType::Int8 => 1,
      DType::Int64 => 8,
    }
  }

  pub fn is_integer(&self) -> bool {
    !matches!(self, DType::Float32)
  }
}

/// 仿射量化参数: real = (raw - zero_point) * scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantization {
  pub scale: f32,
  pub zero_point: i32,
}

impl Quantization {
  pub const IDENTITY: Quantization = Quantization {
    scale: 1.0,
    zero_point: 0,
  };

  pub fn new(scale: f32, zero_point: i32) -> Self {
    Self { scale, zero_point }
  }

  pub fn dequantize(&self, raw: f32) -> f32 {
    (raw - self.zero_point as f32) * self.scale
  }
}

/// 模型输入/输出张量的静态描述，加载后不再变化。
///
/// 量化参数当且仅当元素类型为整数时存在；整数张量默认使用恒等量化参数。
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
  name: String,
  shape: Box<[i64]>,
  dtype: DType,
  quantization: Option<Quantization>,
}

impl TensorSpec {
  pub fn new(name: impl Into<String>, shape: impl Into<Box<[i64]>>, dtype: DType) -> Self {
    let quantization = dtype.is_integer().then_some(Quantization::IDENTITY);
    Self {
      name: name.into(),
      shape: shape.into(),
      dtype,
      quantization,
    }
  }

  /// 替换整数张量的量化参数，浮点张量会返回错误
  pub fn with_quantization(mut self, quantization: Quantization) -> Result<Self, TensorError> {
    if !self.dtype.is_integer() {
      return Err(TensorError::QuantizationOnFloat(self.name));
    }
    self.quantization = Some(quantization);
    Ok(self)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// 动态维度为 -1
  pub fn shape(&self) -> &[i64] {
    &self.shape
  }

  pub fn dtype(&self) -> DType {
    self.dtype
  }

  pub fn quantization(&self) -> Option<Quantization> {
    self.quantization
  }

  pub fn rank(&self) -> usize {
    self.shape.len()
  }

  /// 第 `axis` 维的大小；越界或动态维度返回 `None`
  pub fn dim(&self, axis: usize) -> Option<usize> {
    self
      .shape
      .get(axis)
      .and_then(|&d| usize::try_from(d).ok())
  }

  pub fn is_static(&self) -> bool {
    self.shape.iter().all(|&d| d >= 0)
  }

  pub fn element_count(&self) -> Option<usize> {
    if !self.is_static() {
      return None;
    }
    Some(self.shape.iter().map(|&d| d as usize).product())
  }

  pub fn byte_count(&self) -> Option<usize> {
    self.element_count().map(|n| n * self.dtype.size_of())
  }

  /// 检查实际形状是否与声明形状兼容（动态维度可匹配任意值）
  pub fn accepts_shape(&self, actual: &[usize]) -> bool {
    self.shape.len() == actual.len()
      && self
        .shape
        .iter()
        .zip(actual)
        .all(|(&declared, &dim)| declared < 0 || declared as usize == dim)
  }
}

/// 反量化原语：浮点张量原样返回，整数张量按仿射参数换算
pub fn dequantize(raw: f32, spec: &TensorSpec) -> f32 {
  match (spec.dtype(), spec.quantization()) {
    (DType::Float32, _) => raw,
    (_, Some(q)) => q.dequantize(raw),
    (_, None) => raw,
  }
}

/// 按元素类型存放的张量数据
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  Float32(Vec<f32>),
  UInt8(Vec<u8>),
  Int8(Vec<i8>),
  Int64(Vec<i64>),
}

impl TensorData {
  pub fn zeros(dtype: DType, len: usize) -> Self {
    match dtype {
      DType::Float32 => TensorData::Float32(vec![0.0; len]),
      DType::UInt8 => TensorData::UInt8(vec![0; len]),
      DType::Int8 => TensorData::Int8(vec![0; len]),
      DType::Int64 => TensorData::Int64(vec![0; len]),
    }
  }

  pub fn dtype(&self) -> DType {
    match self {
      TensorData::Float32(_) => DType::Float32,
      TensorData::UInt8(_) => DType::UInt8,
      TensorData::Int8(_) => DType::Int8,
      TensorData::Int64(_) => DType::Int64,
    }
  }

  pub fn len(&self) -> usize {
    match self {
      TensorData::Float32(v) => v.len(),
      TensorData::UInt8(v) => v.len(),
      TensorData::Int8(v) => v.len(),
      TensorData::Int64(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 第 `index` 个元素的原始数值（未反量化）
  pub fn raw(&self, index: usize) -> Option<f32> {
    match self {
      TensorData::Float32(v) => v.get(index).copied(),
      TensorData::UInt8(v) => v.get(index).map(|&x| x as f32),
      TensorData::Int8(v) => v.get(index).map(|&x| x as f32),
      TensorData::Int64(v) => v.get(index).map(|&x| x as f32),
    }
  }

  pub fn byte_len(&self) -> usize {
    self.len() * self.dtype().size_of()
  }
}

/// 带形状的张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Vec<usize>,
  data: TensorData,
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self, TensorError> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
      return Err(TensorError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }

  pub fn dtype(&self) -> DType {
    self.data.dtype()
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn into_parts(self) -> (Vec<usize>, TensorData) {
    (self.shape, self.data)
  }

  /// 检查张量是否符合描述中的形状与类型
  pub fn check_against(&self, spec: &TensorSpec) -> Result<(), TensorError> {
    if self.dtype() != spec.dtype() {
      return Err(TensorError::DTypeMismatch {
        expected: spec.dtype(),
        actual: self.dtype(),
      });
    }
    if !spec.accepts_shape(&self.shape) {
      return Err(TensorError::ShapeMismatchError {
        expected: spec.shape().to_vec(),
        actual: self.shape.clone(),
      });
    }
    Ok(())
  }
}

/// 顺序读取器，每次创建都从位置 0 开始
pub struct TensorCursor<'a> {
  data: &'a TensorData,
  quantization: Option<Quantization>,
  position: usize,
}

impl<'a> TensorCursor<'a> {
  pub fn new(data: &'a TensorData, quantization: Option<Quantization>) -> Self {
    Self {
      data,
      quantization,
      position: 0,
    }
  }

  pub fn position(&self) -> usize {
    self.position
  }

  pub fn remaining(&self) -> usize {
    self.data.len().saturating_sub(self.position)
  }

  /// 读取下一个原始数值
  pub fn next_raw(&mut self) -> Option<f32> {
    let value = self.data.raw(self.position)?;
    self.position += 1;
    Some(value)
  }

  /// 读取下一个反量化后的数值
  pub fn next_value(&mut self) -> Option<f32> {
    let raw = self.next_raw()?;
    Some(match (self.data.dtype(), self.quantization) {
      (DType::Float32, _) | (_, None) => raw,
      (_, Some(q)) => q.dequantize(raw),
    })
  }
}

impl Iterator for TensorCursor<'_> {
  type Item = f32;

  fn next(&mut self) -> Option<Self::Item> {
    self.next_value()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dequantize_is_identity_for_float() {
    let spec = TensorSpec::new("scores", vec![1, 10], DType::Float32);
    for raw in [-3.5f32, 0.0, 0.25, 1e6] {
      assert_eq!(dequantize(raw, &spec), raw);
    }
  }

  #[test]
  fn dequantize_applies_affine_mapping_for_integers() {
    let cases = [
      (DType::UInt8, 0.00390625f32, 0i32, 128.0f32),
      (DType::UInt8, 0.1, 10, 0.0),
      (DType::Int8, 0.5, -3, 17.0),
      (DType::Int64, 2.0, 1, 5.0),
    ];
    for (dtype, scale, zero_point, raw) in cases {
      let spec = TensorSpec::new("t", vec![1], dtype)
        .with_quantization(Quantization::new(scale, zero_point))
        .unwrap();
      let expected = (raw - zero_point as f32) * scale;
      assert!((dequantize(raw, &spec) - expected).abs() < 1e-6);
    }
  }

  #[test]
  fn quantization_present_only_for_integer_types() {
    assert!(
      TensorSpec::new("f", vec![1], DType::Float32)
        .quantization()
        .is_none()
    );
    assert_eq!(
      TensorSpec::new("u", vec![1], DType::UInt8).quantization(),
      Some(Quantization::IDENTITY)
    );
    let err = TensorSpec::new("f", vec![1], DType::Float32)
      .with_quantization(Quantization::new(0.5, 3))
      .unwrap_err();
    assert!(matches!(err, TensorError::QuantizationOnFloat(_)));
  }

  #[test]
  fn spec_reports_counts_and_dynamic_dims() {
    let spec = TensorSpec::new("image", vec![1, 224, 224, 3], DType::Float32);
    assert_eq!(spec.element_count(), Some(224 * 224 * 3));
    assert_eq!(spec.byte_count(), Some(224 * 224 * 3 * 4));
    assert_eq!(spec.dim(1), Some(224));
    assert_eq!(spec.dim(9), None);

    let dynamic = TensorSpec::new("image", vec![-1, 3, 64, 64], DType::Float32);
    assert_eq!(dynamic.element_count(), None);
    assert_eq!(dynamic.dim(0), None);
    assert!(dynamic.accepts_shape(&[1, 3, 64, 64]));
    assert!(!dynamic.accepts_shape(&[1, 3, 32, 64]));
  }

  #[test]
  fn tensor_rejects_inconsistent_length() {
    let err = Tensor::new(vec![1, 2, 2], TensorData::Float32(vec![0.0; 3])).unwrap_err();
    assert!(matches!(err, TensorError::LengthMismatch { expected: 4, .. }));
  }

  #[test]
  fn cursor_reads_sequentially_and_dequantizes() {
    let data = TensorData::UInt8(vec![10, 20, 30]);
    let mut cursor = TensorCursor::new(&data, Some(Quantization::new(0.5, 10)));
    assert_eq!(cursor.next_value(), Some(0.0));
    assert_eq!(cursor.next_raw(), Some(20.0));
    assert_eq!(cursor.remaining(), 1);
    assert_eq!(cursor.next_value(), Some(10.0));
    assert_eq!(cursor.next_value(), None);
  }
}
