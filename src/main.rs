// 该文件是 Handscope （掌上观） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use handscope::{
  FromUrl,
  config::{LiveConfig, spawn_stdin_controls},
  model::{DetectorParams, ReplayDetectorLoader, ReplayEstimatorLoader},
  output::{OutputWrapper, draw::Renderer},
  session::{LogStatus, Session, SessionError, Status, StatusSink, open_camera},
  task::{FrameLoop, StopSignal},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("检测框模型: {}", args.detector);
  info!("关键点模型: {}", args.estimator);
  info!("图像缩放比例: {}", args.image_scale_factor);

  let config = match &args.config {
    Some(path) => {
      info!("读取参数文件: {}", path.display());
      LiveConfig::load_json(path)?
    }
    None => LiveConfig::default(),
  };
  let base_params = DetectorParams {
    flip_horizontal: !args.no_mirror,
    image_scale_factor: args.image_scale_factor,
    ..DetectorParams::default()
  };

  let mut status = LogStatus::default();
  status.show(Status::Loading("Loading the model...".to_string()));
  let detector_loader =
    ReplayDetectorLoader::from_url(&args.detector).map_err(SessionError::model_load)?;
  let estimator_loader =
    ReplayEstimatorLoader::from_url(&args.estimator).map_err(SessionError::model_load)?;
  let mut session = Session::load(config, base_params, detector_loader, estimator_loader)?;

  let input = match open_camera(&args.input) {
    Ok(input) => input,
    Err(e) => {
      status.show(Status::NoCamera);
      return Err(e.into());
    }
  };
  let output = OutputWrapper::from_url(&args.output)?;

  let renderer = match &args.font {
    Some(path) => Renderer::with_font_file(path)?,
    None => Renderer::default(),
  };
  let mut pipeline = session.pipeline(renderer);

  let frame_loop = FrameLoop::new()
    .with_stop_signal(StopSignal::install_ctrlc()?)
    .with_frame_limit(args.frame_number)
    .with_controls(spawn_stdin_controls());
  frame_loop.run(input, &mut session, &mut pipeline, &output, &mut status)?;

  Ok(())
}
