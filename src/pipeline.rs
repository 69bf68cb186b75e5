// 该文件是 Handscope （掌上观） 项目的一部分。
// src/pipeline.rs - 单帧处理流水线
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

use futures::future::join_all;
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  config::LiveConfig,
  geometry::DetectionBox,
  hand::HandPose,
  model::{BoxDetector, LandmarkEstimator},
  output::draw::{Renderer, Surface},
};

type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("检测框推理失败: {0}")]
  Detect(#[source] BoxedError),
  #[error("第 {slot} 个检测框的关键点推理失败: {source}")]
  Estimate {
    slot: usize,
    #[source]
    source: BoxedError,
  },
}

/// 某个检测框对应的手部骨架，坐标已平移到全帧
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedHand {
  pub slot: usize,
  pub pose: HandPose,
}

/// 一帧的处理结果，帧结束后即丢弃
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameReport {
  pub boxes: Vec<DetectionBox>,
  pub hands: Vec<TrackedHand>,
}

/// 持有工作画布和绘制器，每帧从头开始：采集、检测、变换、逐框估计、绘制
pub struct FramePipeline {
  surface: Surface,
  renderer: Renderer,
}

impl FramePipeline {
  pub fn new(surface: Surface, renderer: Renderer) -> Self {
    Self { surface, renderer }
  }

  pub fn surface(&self) -> &Surface {
    &self.surface
  }

  pub async fn run_frame<D, E>(
    &mut self,
    frame: &RgbImage,
    config: &LiveConfig,
    detector: &D,
    estimator: &E,
  ) -> Result<FrameReport, PipelineError>
  where
    D: BoxDetector,
    E: LandmarkEstimator,
  {
    self.surface.acquire(frame);

    let mut boxes = detector
      .detect(frame)
      .await
      .map_err(|e| PipelineError::Detect(Box::new(e)))?;

    let (width, height) = (self.surface.width() as f32, self.surface.height() as f32);
    for bbox in boxes.iter_mut() {
      bbox.rescale_and_clamp(
        config.width_scale_factor,
        config.height_scale_factor,
        width,
        height,
      );
    }

    // 先从画布裁出所有区域，再绘制检测框，避免框线进入裁剪图
    let crops = boxes
      .iter()
      .map(|bbox| {
        // 平移量取裁剪区域的整数原点，与估计器实际看到的像素对齐
        let origin = self.surface.region(bbox).map(|(x, y, _, _)| (x as f32, y as f32));
        (origin, self.surface.crop(bbox))
      })
      .collect::<Vec<_>>();

    let estimations = crops
      .iter()
      .enumerate()
      .map(|(slot, (origin, crop))| async move {
        let (Some((dx, dy)), Some(crop)) = (origin, crop) else {
          debug!("检测框 {} 没有有效区域，跳过关键点估计", slot);
          return Ok::<_, PipelineError>(None);
        };
        let hands = estimator
          .estimate_hands(crop)
          .await
          .map_err(|e| PipelineError::Estimate {
            slot,
            source: Box::new(e),
          })?;
        Ok(
          hands
            .into_iter()
            .next()
            .map(|pose| TrackedHand {
              slot,
              pose: pose.translated(*dx, *dy),
            }),
        )
      });
    let pending = join_all(estimations);

    for bbox in boxes.iter() {
      self.renderer.draw_box(&mut self.surface, bbox, config);
    }

    let mut hands = Vec::with_capacity(boxes.len());
    for result in pending.await {
      if let Some(hand) = result? {
        hands.push(hand);
      }
    }

    for hand in hands.iter() {
      self.renderer.draw_skeleton(&mut self.surface, &hand.pose, config);
    }

    debug!("本帧检测框 {} 个, 手部骨架 {} 个", boxes.len(), hands.len());
    Ok(FrameReport { boxes, hands })
  }
}
