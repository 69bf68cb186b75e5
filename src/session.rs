// 该文件是 Handscope （掌上观） 项目的一部分。
// src/session.rs - 会话启动与模型重建
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

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl,
  config::{ControlEdit, Effect, LiveConfig},
  input::InputWrapper,
  model::{DetectorLoader, DetectorParams, EstimatorLoader},
  output::draw::{Renderer, Surface},
  pipeline::{FramePipeline, FrameReport, PipelineError},
};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("摄像头不可用: {0}")]
  CameraUnavailable(#[source] BoxedError),
  #[error("模型加载失败: {0}")]
  ModelLoadFailure(#[source] BoxedError),
}

impl SessionError {
  pub fn model_load<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    SessionError::ModelLoadFailure(Box::new(e))
  }
}

/// 界面上可见的会话状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
  /// 正在加载或重建模型，画面隐藏
  Loading(String),
  /// 画面可见
  Running,
  /// 没有可用摄像头，会话不会开始
  NoCamera,
}

pub trait StatusSink {
  fn show(&mut self, status: Status);
}

/// 把状态写入日志
#[derive(Debug, Default)]
pub struct LogStatus {
  current: Option<Status>,
}

impl LogStatus {
  pub fn current(&self) -> Option<&Status> {
    self.current.as_ref()
  }
}

impl StatusSink for LogStatus {
  fn show(&mut self, status: Status) {
    match &status {
      Status::Loading(message) => info!("{}", message),
      Status::Running => info!("画面已恢复"),
      Status::NoCamera => error!("No camera detected!"),
    }
    self.current = Some(status);
  }
}

impl<S: StatusSink + ?Sized> StatusSink for &mut S {
  fn show(&mut self, status: Status) {
    (**self).show(status)
  }
}

/// 打开摄像头输入，任何失败都归为摄像头不可用
pub fn open_camera(url: &Url) -> Result<InputWrapper, SessionError> {
  info!("打开输入源: {}", url);
  InputWrapper::from_url(url).map_err(|e| SessionError::CameraUnavailable(Box::new(e)))
}

/// 一个会话持有参数、两个模型以及它们的构造器
pub struct Session<DL: DetectorLoader, EL: EstimatorLoader> {
  config: LiveConfig,
  base_params: DetectorParams,
  detector_loader: DL,
  estimator_loader: EL,
  detector: DL::Detector,
  estimator: EL::Estimator,
  detector_loads: usize,
}

impl<DL: DetectorLoader, EL: EstimatorLoader> Session<DL, EL> {
  /// 加载两个模型；`base_params` 中与 `config` 重叠的字段以 `config` 为准
  pub fn load(
    config: LiveConfig,
    base_params: DetectorParams,
    detector_loader: DL,
    estimator_loader: EL,
  ) -> Result<Self, SessionError> {
    info!("加载关键点模型 (后端: {})", config.backend);
    let estimator = estimator_loader
      .load(config.backend)
      .map_err(SessionError::model_load)?;

    let params = detector_params(&base_params, &config);
    info!("加载检测框模型: {:?}", params);
    let detector = detector_loader.load(&params).map_err(SessionError::model_load)?;
    info!("模型加载完成");

    Ok(Self {
      config,
      base_params,
      detector_loader,
      estimator_loader,
      detector,
      estimator,
      detector_loads: 1,
    })
  }

  pub fn config(&self) -> &LiveConfig {
    &self.config
  }

  pub fn detector(&self) -> &DL::Detector {
    &self.detector
  }

  pub fn estimator(&self) -> &EL::Estimator {
    &self.estimator
  }

  /// 会话期间检测框模型被构造的次数
  pub fn detector_loads(&self) -> usize {
    self.detector_loads
  }

  pub fn detector_params(&self) -> DetectorParams {
    detector_params(&self.base_params, &self.config)
  }

  /// 应用一次控制操作。需要重建时先显示加载状态，新模型就绪后才替换并恢复画面；
  /// 重建失败时直接返回错误，画面保持在加载状态。
  pub fn apply<S: StatusSink>(
    &mut self,
    edit: ControlEdit,
    status: &mut S,
  ) -> Result<Effect, SessionError> {
    let effect = self.config.apply(edit);
    if !effect.needs_reload() {
      return Ok(effect);
    }

    let message = self
      .config
      .loading_message(&edit)
      .unwrap_or_else(|| "Reloading...".to_string());
    status.show(Status::Loading(message));

    if effect == Effect::ReloadBackend {
      let estimator = self
        .estimator_loader
        .load(self.config.backend)
        .map_err(SessionError::model_load)?;
      self.estimator = estimator;
    }

    let detector = self
      .detector_loader
      .load(&self.detector_params())
      .map_err(SessionError::model_load)?;
    self.detector = detector;
    self.detector_loads += 1;

    status.show(Status::Running);
    Ok(effect)
  }

  pub async fn run_frame(
    &self,
    pipeline: &mut FramePipeline,
    frame: &RgbImage,
  ) -> Result<FrameReport, PipelineError> {
    pipeline
      .run_frame(frame, &self.config, &self.detector, &self.estimator)
      .await
  }

  /// 按当前参数创建流水线
  pub fn pipeline(&self, renderer: Renderer) -> FramePipeline {
    let params = self.detector_params();
    FramePipeline::new(Surface::new(0, 0, params.flip_horizontal), renderer)
  }
}

fn detector_params(base: &DetectorParams, config: &LiveConfig) -> DetectorParams {
  DetectorParams {
    max_num_boxes: config.max_num_boxes,
    iou_threshold: config.iou_threshold,
    score_threshold: config.score_threshold,
    backend: config.backend,
    ..base.clone()
  }
}
