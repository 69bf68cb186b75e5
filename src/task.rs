// 该文件是 Handscope （掌上观） 项目的一部分。
// src/task.rs - 帧循环
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::{Receiver, TryRecvError},
  },
  thread,
  time::{Duration, Instant},
};

use futures::executor::block_on;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
  config::ControlEdit,
  model::{DetectorLoader, EstimatorLoader},
  output::Render,
  pipeline::{FramePipeline, FrameReport},
  session::{Session, Status, StatusSink},
};

/// 收到中断信号后，超过该时间仍未退出则强制结束进程
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 循环的停止信号，一旦置位就保持置位
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
  flag: Arc<AtomicBool>,
}

impl StopSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册 Ctrl-C 处理函数
  pub fn install_ctrlc() -> Result<Self, ctrlc::Error> {
    let signal = Self::new();
    let handle = signal.clone();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      handle.trigger();
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    Ok(signal)
  }

  pub fn trigger(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_set(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }
}

/// 单帧的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
  /// 画面已绘制并交给输出
  Rendered(FrameReport),
  /// 模型推理失败，本帧被跳过
  Skipped,
  /// 输入已经没有新的帧
  Exhausted,
}

/// 逐帧运行的循环：一帧完全结束后才开始下一帧，控制指令只在两帧之间生效
#[derive(Debug, Default)]
pub struct FrameLoop {
  stop: StopSignal,
  frame_limit: Option<usize>,
  controls: Option<Receiver<ControlEdit>>,
}

impl FrameLoop {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
    self.stop = stop;
    self
  }

  /// `None` 或 `Some(0)` 表示不限制帧数
  pub fn with_frame_limit(mut self, frame_limit: Option<usize>) -> Self {
    self.frame_limit = frame_limit.filter(|&n| n > 0);
    self
  }

  pub fn with_controls(mut self, controls: Receiver<ControlEdit>) -> Self {
    self.controls = Some(controls);
    self
  }

  /// 应用所有已到达的控制指令
  fn drain_controls<DL, EL, S>(
    &mut self,
    session: &mut Session<DL, EL>,
    status: &mut S,
  ) -> anyhow::Result<()>
  where
    DL: DetectorLoader,
    EL: EstimatorLoader,
    S: StatusSink,
  {
    let Some(controls) = self.controls.as_ref() else {
      return Ok(());
    };

    loop {
      match controls.try_recv() {
        Ok(edit) => {
          let effect = session.apply(edit, status)?;
          debug!("控制指令 {:?} 已应用: {:?}", edit, effect);
        }
        Err(TryRecvError::Empty) => return Ok(()),
        Err(TryRecvError::Disconnected) => {
          debug!("控制指令通道已关闭");
          self.controls = None;
          return Ok(());
        }
      }
    }
  }

  /// 运行恰好一帧
  pub fn run_once<I, DL, EL, O, S>(
    &mut self,
    input: &mut I,
    session: &mut Session<DL, EL>,
    pipeline: &mut FramePipeline,
    output: &O,
    status: &mut S,
  ) -> anyhow::Result<FrameOutcome>
  where
    I: Iterator<Item = RgbImage>,
    DL: DetectorLoader,
    EL: EstimatorLoader,
    O: Render<RgbImage, FrameReport>,
    O::Error: std::error::Error + Send + Sync + 'static,
    S: StatusSink,
  {
    self.drain_controls(session, status)?;

    let Some(frame) = input.next() else {
      return Ok(FrameOutcome::Exhausted);
    };

    let now = Instant::now();
    let report = match block_on(session.run_frame(pipeline, &frame)) {
      Ok(report) => report,
      Err(e) => {
        warn!("本帧处理失败，跳过: {}", e);
        return Ok(FrameOutcome::Skipped);
      }
    };
    let elapsed_a = now.elapsed();
    output.render_result(pipeline.surface().image(), &report)?;
    let elapsed_b = now.elapsed();
    debug!("推理完成，耗时: {:.2?} / {:.2?}", elapsed_a, elapsed_b);

    Ok(FrameOutcome::Rendered(report))
  }

  /// 一直运行到输入结束、达到帧数限制或收到停止信号，返回处理过的帧数
  pub fn run<I, DL, EL, O, S>(
    mut self,
    mut input: I,
    session: &mut Session<DL, EL>,
    pipeline: &mut FramePipeline,
    output: &O,
    status: &mut S,
  ) -> anyhow::Result<usize>
  where
    I: Iterator<Item = RgbImage>,
    DL: DetectorLoader,
    EL: EstimatorLoader,
    O: Render<RgbImage, FrameReport>,
    O::Error: std::error::Error + Send + Sync + 'static,
    S: StatusSink,
  {
    info!("开始任务...");
    status.show(Status::Running);

    let mut frame_index = 0;
    while !self.stop.is_set() {
      match self.run_once(&mut input, session, pipeline, output, status)? {
        FrameOutcome::Exhausted => {
          info!("输入结束，退出任务循环");
          break;
        }
        FrameOutcome::Rendered(_) | FrameOutcome::Skipped => frame_index += 1,
      }

      if self.frame_limit.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
    }

    if self.stop.is_set() {
      warn!("中断信号接收，退出任务循环");
    }
    info!("任务完成，共处理 {} 帧", frame_index);
    Ok(frame_index)
  }
}
