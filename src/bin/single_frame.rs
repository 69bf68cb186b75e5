// 该文件是 Handscope （掌上观） 项目的一部分。
// src/bin/single_frame.rs - 单帧推理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use handscope::{
  FromUrl,
  config::LiveConfig,
  model::{DetectorParams, ReplayDetectorLoader, ReplayEstimatorLoader},
  output::{OutputWrapper, draw::Renderer},
  session::{LogStatus, Session, SessionError, open_camera},
  task::{FrameLoop, FrameOutcome},
};

/// 对一帧图像运行完整流水线
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 检测框模型
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,
  /// 关键点模型
  #[arg(long, value_name = "MODEL")]
  pub estimator: Url,
  /// 标签字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut session = Session::load(
    LiveConfig::default(),
    DetectorParams::default(),
    ReplayDetectorLoader::from_url(&args.detector).map_err(SessionError::model_load)?,
    ReplayEstimatorLoader::from_url(&args.estimator).map_err(SessionError::model_load)?,
  )?;
  let mut input = open_camera(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let renderer = match &args.font {
    Some(path) => Renderer::with_font_file(path)?,
    None => Renderer::default(),
  };
  let mut pipeline = session.pipeline(renderer);

  let outcome = FrameLoop::new().run_once(
    &mut input,
    &mut session,
    &mut pipeline,
    &output,
    &mut LogStatus::default(),
  )?;
  match outcome {
    FrameOutcome::Rendered(report) => info!(
      "检测框 {} 个, 手部骨架 {} 个",
      report.boxes.len(),
      report.hands.len()
    ),
    FrameOutcome::Skipped => warn!("本帧处理失败"),
    FrameOutcome::Exhausted => anyhow::bail!("没有输入帧"),
  }

  Ok(())
}
