// 该文件是 Handscope （掌上观） 项目的一部分。
// src/model.rs - 模型能力接口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::future::Future;

use image::RgbImage;

use crate::{config::Backend, geometry::DetectionBox, hand::HandPose};

/// 检测框模型的构造参数，修改任何一项都需要重建模型
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
  /// 以镜像后的坐标报告检测框
  pub flip_horizontal: bool,
  /// 推理前对输入图像的缩放比例
  pub image_scale_factor: f32,
  pub max_num_boxes: u32,
  pub iou_threshold: f32,
  pub score_threshold: f32,
  pub backend: Backend,
}

impl Default for DetectorParams {
  fn default() -> Self {
    Self {
      flip_horizontal: true,
      image_scale_factor: 1.0,
      max_num_boxes: 20,
      iou_threshold: 0.5,
      score_threshold: 0.6,
      backend: Backend::Gpu,
    }
  }
}

/// 手部检测框模型
pub trait BoxDetector {
  type Error: std::error::Error + Send + Sync + 'static;

  fn detect(
    &self,
    image: &RgbImage,
  ) -> impl Future<Output = Result<Vec<DetectionBox>, Self::Error>>;
}

/// 手部关键点模型，输入为裁剪后的局部图像，输出为局部坐标
pub trait LandmarkEstimator {
  type Error: std::error::Error + Send + Sync + 'static;

  fn estimate_hands(
    &self,
    image: &RgbImage,
  ) -> impl Future<Output = Result<Vec<HandPose>, Self::Error>>;
}

/// 检测框模型的构造器，重建模型即重新调用 `load`
pub trait DetectorLoader {
  type Detector: BoxDetector;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self, params: &DetectorParams) -> Result<Self::Detector, Self::Error>;
}

pub trait EstimatorLoader {
  type Estimator: LandmarkEstimator;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self, backend: Backend) -> Result<Self::Estimator, Self::Error>;
}

mod replay;
pub use self::replay::{
  ReplayBoxDetector, ReplayDetectorLoader, ReplayEstimatorLoader, ReplayHandEstimator,
  ReplayModelError, non_max_suppression,
};
