// 该文件是 Yunjing （云镜） 项目的一部分。
// src/task.rs - 任务驱动与后台推理线程
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
  sync::mpsc,
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{model::Model, output::Render};

/// 带耗时的推理结果
#[derive(Debug, Clone)]
pub struct Timed<T> {
  pub output: T,
  pub elapsed: Duration,
}

impl<T> Timed<T> {
  pub fn measure(f: impl FnOnce() -> T) -> Self {
    let now = Instant::now();
    let output = f();
    Self {
      output,
      elapsed: now.elapsed(),
    }
  }

  /// 展示给用户的耗时文本
  pub fn elapsed_text(&self) -> String {
    format!("Estimated Output Time: {} ms", self.elapsed.as_millis())
  }
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

pub struct OneShotTask;

impl<F, D, RE, I, M, O> Task<I, M, O> for OneShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D>,
  O: Render<F, D, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let result = Timed::measure(|| model.predict(&frame));
    info!("{}", result.elapsed_text());
    output.render_result(&frame, &result.output)?;
    info!("渲染完成");
    Ok(())
  }
}

pub struct RepeatShotTask {
  repeat_times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat_times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }
}

/// 跳过前两次预热后的平均耗时
pub fn mean_after_warmup(times: &[Duration]) -> Option<Duration> {
  const WARMUP: usize = 2;
  let measured = times.get(WARMUP..).filter(|t| !t.is_empty())?;
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<F, D, RE, I, M, O> Task<I, M, O> for RepeatShotTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D>,
  O: Render<F, D, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat_times);
    for i in 0..self.repeat_times {
      let result = Timed::measure(|| model.predict(&frame));
      debug!("({})推理完成，耗时: {:.2?}", i, result.elapsed);
      output.render_result(&frame, &result.output)?;
      times.push(result.elapsed);
    }

    match mean_after_warmup(&times) {
      Some(mean) => warn!("平均推理时间: {:.2?}", mean),
      None => warn!("重复次数过少，无法统计平均推理时间"),
    }
    Ok(())
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<F, D, RE, I, M, O> Task<I, M, O> for ContinuousTask
where
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D>,
  O: Render<F, D, Error = RE>,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, mut model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_index = 0usize;
    let mut now = Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      info!("处理第 {} 帧图像", frame_index);
      let result = model.predict(&frame);
      let elapsed_a = now.elapsed();
      output.render_result(&frame, &result)?;
      let elapsed_b = now.elapsed();
      now = Instant::now();
      info!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，退出");
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("推理线程已关闭")]
  Closed,
  #[error("无法启动推理线程: {0}")]
  SpawnError(#[from] std::io::Error),
}

struct Request<I, O> {
  input: I,
  reply: mpsc::SyncSender<Timed<O>>,
}

/// 只会被解析一次的推理结果
pub struct Pending<T> {
  receiver: mpsc::Receiver<Timed<T>>,
}

impl<T> Pending<T> {
  /// 阻塞等待结果
  pub fn wait(self) -> Result<Timed<T>, WorkerError> {
    self.receiver.recv().map_err(|_| WorkerError::Closed)
  }

  /// 结果未就绪时返回 `Ok(None)`；结果取走后再次调用返回 `Closed`
  pub fn try_get(&self) -> Result<Option<Timed<T>>, WorkerError> {
    match self.receiver.try_recv() {
      Ok(result) => Ok(Some(result)),
      Err(mpsc::TryRecvError::Empty) => Ok(None),
      Err(mpsc::TryRecvError::Disconnected) => Err(WorkerError::Closed),
    }
  }
}

/// 独占模型的后台推理线程，请求按提交顺序处理。
/// 析构时关闭队列，等待已提交的请求完成后释放模型。
pub struct InferenceWorker<M: Model> {
  sender: Option<mpsc::Sender<Request<M::Input, M::Output>>>,
  thread: Option<JoinHandle<()>>,
}

impl<M> InferenceWorker<M>
where
  M: Model + Send + 'static,
  M::Input: Send + 'static,
  M::Output: Send + 'static,
{
  pub fn spawn(mut model: M) -> Result<Self, WorkerError> {
    let (sender, receiver) = mpsc::channel::<Request<M::Input, M::Output>>();
    let thread = thread::Builder::new()
      .name("inference".to_string())
      .spawn(move || {
        for request in receiver {
          let result = Timed::measure(|| model.predict(&request.input));
          debug!("{}", result.elapsed_text());
          if request.reply.send(result).is_err() {
            debug!("请求方已放弃结果");
          }
        }
        drop(model);
        info!("推理线程退出，模型已释放");
      })?;

    Ok(Self {
      sender: Some(sender),
      thread: Some(thread),
    })
  }

  pub fn submit(&self, input: M::Input) -> Result<Pending<M::Output>, WorkerError> {
    let (reply, receiver) = mpsc::sync_channel(1);
    self
      .sender
      .as_ref()
      .ok_or(WorkerError::Closed)?
      .send(Request { input, reply })
      .map_err(|_| WorkerError::Closed)?;
    Ok(Pending { receiver })
  }
}

impl<M: Model> Drop for InferenceWorker<M> {
  fn drop(&mut self) {
    self.sender.take();
    if let Some(thread) = self.thread.take()
      && thread.join().is_err()
    {
      warn!("推理线程异常退出");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    convert::Infallible,
    sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
    },
  };

  struct Doubler {
    dropped: Arc<AtomicUsize>,
  }

  impl Model for Doubler {
    type Input = u32;
    type Output = u32;
    type Error = Infallible;

    fn infer(&mut self, input: &u32) -> Result<u32, Infallible> {
      Ok(input * 2)
    }

    fn fallback(&self, _input: &u32) -> u32 {
      0
    }
  }

  impl Drop for Doubler {
    fn drop(&mut self) {
      self.dropped.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[test]
  fn elapsed_text_in_milliseconds() {
    let timed = Timed {
      output: (),
      elapsed: Duration::from_micros(42_900),
    };
    assert_eq!(timed.elapsed_text(), "Estimated Output Time: 42 ms");
  }

  #[test]
  fn warmup_runs_are_excluded() {
    let ms = Duration::from_millis;
    assert_eq!(
      mean_after_warmup(&[ms(100), ms(50), ms(10), ms(20)]),
      Some(ms(15))
    );
    assert_eq!(mean_after_warmup(&[ms(100), ms(50)]), None);
    assert_eq!(mean_after_warmup(&[]), None);
  }

  #[test]
  fn worker_resolves_each_request_once_in_order() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let worker = InferenceWorker::spawn(Doubler {
      dropped: dropped.clone(),
    })
    .unwrap();

    let pending = (1..=5)
      .map(|i| worker.submit(i).unwrap())
      .collect::<Vec<_>>();
    let first = &pending[0];
    let value = loop {
      if let Some(result) = first.try_get().unwrap() {
        break result.output;
      }
      thread::yield_now();
    };
    assert_eq!(value, 2);

    let mut pending = pending.into_iter();
    let first = pending.next().unwrap();
    let rest = pending.map(|p| p.wait().unwrap().output).collect::<Vec<_>>();
    assert_eq!(rest, vec![4, 6, 8, 10]);
    // 后续请求已处理完，第一个请求的回复通道必然已关闭
    assert!(matches!(first.try_get(), Err(WorkerError::Closed)));

    assert_eq!(dropped.load(Ordering::SeqCst), 0);
    drop(worker);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn dropping_worker_finishes_submitted_work() {
    let dropped = Arc::new(AtomicUsize::new(0));
    let worker = InferenceWorker::spawn(Doubler {
      dropped: dropped.clone(),
    })
    .unwrap();
    let pending = worker.submit(21).unwrap();
    drop(worker);
    assert_eq!(pending.wait().unwrap().output, 42);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
  }
}
