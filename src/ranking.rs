// 该文件是 Yunjing （云镜） 项目的一部分。
// src/ranking.rs - 有界 Top-K 收集器
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

use std::{cmp::Ordering, collections::BinaryHeap};

struct Entry<T> {
  score: f32,
  sequence: usize,
  item: T,
}

// 堆顶为“最差”的元素：分数最低，同分时为最晚插入者
impl<T> Ord for Entry<T> {
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .score
      .total_cmp(&self.score)
      .then(self.sequence.cmp(&other.sequence))
  }
}

impl<T> PartialOrd for Entry<T> {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl<T> PartialEq for Entry<T> {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl<T> Eq for Entry<T> {}

/// 容量为 k 的最小堆，只保留分数严格大于阈值的前 k 个元素
pub struct RankedCollector<T> {
  capacity: usize,
  threshold: f32,
  heap: BinaryHeap<Entry<T>>,
  sequence: usize,
}

impl<T> RankedCollector<T> {
  pub fn new(capacity: usize, threshold: f32) -> Self {
    Self {
      capacity,
      threshold,
      heap: BinaryHeap::with_capacity(capacity + 1),
      sequence: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }

  pub fn is_empty(&self) -> bool {
    self.heap.is_empty()
  }

  /// 返回元素是否被保留
  pub fn push(&mut self, score: f32, item: T) -> bool {
    if self.capacity == 0 || score.is_nan() || score <= self.threshold {
      return false;
    }
    let sequence = self.sequence;
    self.sequence += 1;
    self.heap.push(Entry {
      score,
      sequence,
      item,
    });
    if self.heap.len() > self.capacity {
      return self.heap.pop().is_some_and(|e| e.sequence != sequence);
    }
    true
  }

  /// 按分数从高到低输出
  pub fn into_sorted_vec(self) -> Vec<T> {
    self
      .into_scored_vec()
      .into_iter()
      .map(|(_, item)| item)
      .collect()
  }

  pub fn into_scored_vec(mut self) -> Vec<(f32, T)> {
    let mut out = Vec::with_capacity(self.heap.len());
    while let Some(entry) = self.heap.pop() {
      out.push((entry.score, entry.item));
    }
    out.reverse();
    out
  }
}

impl<T> Extend<(f32, T)> for RankedCollector<T> {
  fn extend<I: IntoIterator<Item = (f32, T)>>(&mut self, iter: I) {
    for (score, item) in iter {
      self.push(score, item);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn keeps_top_k_in_descending_order() {
    let mut collector = RankedCollector::new(3, 0.05);
    for (i, s) in [0.3f32, 0.9, 0.1, 0.7, 0.5, 0.2].into_iter().enumerate() {
      collector.push(s, i);
    }
    assert_eq!(collector.len(), 3);
    assert_eq!(
      collector.into_scored_vec(),
      vec![(0.9, 1), (0.7, 3), (0.5, 4)]
    );
  }

  #[test]
  fn threshold_is_exclusive() {
    let mut collector = RankedCollector::new(3, 0.05);
    assert!(!collector.push(0.05, "edge"));
    assert!(!collector.push(0.04, "below"));
    assert!(collector.push(0.9, "kept"));
    assert_eq!(collector.into_sorted_vec(), vec!["kept"]);
  }

  #[test]
  fn never_exceeds_capacity_and_stays_sorted() {
    let mut collector = RankedCollector::new(4, f32::NEG_INFINITY);
    collector.extend((0..100).map(|i| (((i * 37) % 101) as f32 / 101.0, i)));
    let scored = collector.into_scored_vec();
    assert_eq!(scored.len(), 4);
    assert!(scored.windows(2).all(|w| w[0].0 > w[1].0));
  }

  #[test]
  fn ties_keep_earlier_items() {
    let mut collector = RankedCollector::new(2, f32::NEG_INFINITY);
    collector.extend([(0.5, "a"), (0.5, "b"), (0.5, "c")]);
    assert_eq!(collector.into_sorted_vec(), vec!["a", "b"]);
  }

  #[test]
  fn ignores_nan_and_zero_capacity() {
    let mut collector = RankedCollector::new(2, f32::NEG_INFINITY);
    assert!(!collector.push(f32::NAN, 0));
    assert!(collector.is_empty());

    let mut empty = RankedCollector::new(0, f32::NEG_INFINITY);
    assert!(!empty.push(1.0, 0));
    assert!(empty.into_sorted_vec().is_empty());
  }
}
