// 该文件是 Handscope （掌上观） 项目的一部分。
// src/model/replay.rs - 回放模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! 从 JSON 记录回放推理结果的模型实现。
//!
//! 检测框记录按帧循环回放，并且和真实模型一样遵守阈值、NMS 和数量上限；
//! 关键点记录是一组归一化到 `[0, 1]` 的手部模板，按裁剪图尺寸缩放后返回。

use std::{cell::Cell, path::PathBuf};

use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::Backend,
  geometry::{DetectionBox, Landmark},
  hand::{HandPose, NUM_LANDMARKS},
  model::{BoxDetector, DetectorLoader, DetectorParams, EstimatorLoader, LandmarkEstimator},
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: String, found: String },
  #[error("读取模型记录失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("解析模型记录失败: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("手部模板 {index} 的关键点数量为 {found}, 期望 21")]
  LandmarkCount { index: usize, found: usize },
}

const REPLAY_SCHEME: &str = "replay";

#[derive(Debug, Deserialize)]
struct BoxRecord {
  /// `[x, y, width, height]`
  bbox: [f32; 4],
  score: f32,
}

#[derive(Debug, Deserialize)]
struct BoxReplay {
  frames: Vec<Vec<BoxRecord>>,
}

#[derive(Debug, Deserialize)]
struct HandTemplate {
  landmarks: Vec<Landmark>,
}

#[derive(Debug, Deserialize)]
struct HandReplay {
  hands: Vec<HandTemplate>,
}

fn check_scheme(url: &Url) -> Result<PathBuf, ReplayModelError> {
  if url.scheme() != REPLAY_SCHEME {
    error!(
      "URI scheme mismatch: expected '{}', found '{}'",
      REPLAY_SCHEME,
      url.scheme()
    );
    return Err(ReplayModelError::SchemeMismatch {
      expected: REPLAY_SCHEME.to_string(),
      found: url.scheme().to_string(),
    });
  }
  Ok(PathBuf::from(url.path()))
}

/// 按 IoU 去除重叠框：从最高分开始，丢弃与已保留框 IoU 大于阈值的框
pub fn non_max_suppression(
  mut boxes: Vec<DetectionBox>,
  iou_threshold: f32,
  max_num_boxes: usize,
) -> Vec<DetectionBox> {
  // 升序排列，从尾部取最高分
  boxes.sort_unstable_by(|a, b| a.score.total_cmp(&b.score));

  let mut kept = Vec::new();
  while let Some(seed) = boxes.pop() {
    if kept.len() >= max_num_boxes {
      break;
    }
    boxes.retain(|other| seed.iou(other) <= iou_threshold);
    kept.push(seed);
  }
  kept
}

pub struct ReplayBoxDetector {
  frames: Vec<Vec<DetectionBox>>,
  cursor: Cell<usize>,
  params: DetectorParams,
}

impl ReplayBoxDetector {
  pub fn new(frames: Vec<Vec<DetectionBox>>, params: DetectorParams) -> Self {
    Self {
      frames,
      cursor: Cell::new(0),
      params,
    }
  }

  pub fn params(&self) -> &DetectorParams {
    &self.params
  }

  fn next_frame(&self) -> Vec<DetectionBox> {
    if self.frames.is_empty() {
      return Vec::new();
    }
    let index = self.cursor.get() % self.frames.len();
    self.cursor.set(index + 1);
    self.frames[index].clone()
  }
}

impl BoxDetector for ReplayBoxDetector {
  type Error = ReplayModelError;

  async fn detect(&self, image: &RgbImage) -> Result<Vec<DetectionBox>, Self::Error> {
    let image_width = image.width() as f32;
    let mut boxes = self.next_frame();

    if self.params.flip_horizontal {
      for bbox in boxes.iter_mut() {
        bbox.x = image_width - bbox.x - bbox.width;
      }
    }

    boxes.retain(|bbox| bbox.score >= self.params.score_threshold);
    let boxes = non_max_suppression(
      boxes,
      self.params.iou_threshold,
      self.params.max_num_boxes as usize,
    );
    debug!("回放检测框 {} 个", boxes.len());
    Ok(boxes)
  }
}

/// 每次 `load` 都重新读取记录文件，相当于重建模型
pub struct ReplayDetectorLoader {
  path: PathBuf,
}

impl FromUrlWithScheme for ReplayDetectorLoader {
  const SCHEME: &'static str = REPLAY_SCHEME;
}

impl FromUrl for ReplayDetectorLoader {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(Self {
      path: check_scheme(url)?,
    })
  }
}

impl DetectorLoader for ReplayDetectorLoader {
  type Detector = ReplayBoxDetector;
  type Error = ReplayModelError;

  fn load(&self, params: &DetectorParams) -> Result<Self::Detector, Self::Error> {
    info!("加载检测框记录: {}", self.path.display());
    debug!(
      "回放检测框已是摄像头像素坐标，忽略图像缩放比例 {}",
      params.image_scale_factor
    );
    let text = std::fs::read_to_string(&self.path)?;
    let replay: BoxReplay = serde_json::from_str(&text)?;

    let frames = replay
      .frames
      .into_iter()
      .map(|records| {
        records
          .into_iter()
          .map(|BoxRecord { bbox, score }| {
            DetectionBox::new(bbox[0], bbox[1], bbox[2], bbox[3], score)
          })
          .collect()
      })
      .collect::<Vec<Vec<_>>>();

    debug!(
      "检测框记录共 {} 帧, 参数: {:?}",
      frames.len(),
      params
    );
    Ok(ReplayBoxDetector::new(frames, params.clone()))
  }
}

pub struct ReplayHandEstimator {
  templates: Vec<Vec<Landmark>>,
  backend: Backend,
}

impl ReplayHandEstimator {
  pub fn new(templates: Vec<Vec<Landmark>>, backend: Backend) -> Self {
    Self { templates, backend }
  }

  pub fn backend(&self) -> Backend {
    self.backend
  }
}

impl LandmarkEstimator for ReplayHandEstimator {
  type Error = ReplayModelError;

  async fn estimate_hands(&self, image: &RgbImage) -> Result<Vec<HandPose>, Self::Error> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    if w == 0.0 || h == 0.0 {
      return Ok(Vec::new());
    }

    Ok(
      self
        .templates
        .iter()
        .map(|template| {
          let landmarks = template
            .iter()
            .map(|[u, v, z]| [u * w, v * h, *z])
            .collect();
          HandPose::from_landmarks(landmarks)
        })
        .collect(),
    )
  }
}

pub struct ReplayEstimatorLoader {
  path: PathBuf,
}

impl FromUrlWithScheme for ReplayEstimatorLoader {
  const SCHEME: &'static str = REPLAY_SCHEME;
}

impl FromUrl for ReplayEstimatorLoader {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    Ok(Self {
      path: check_scheme(url)?,
    })
  }
}

impl EstimatorLoader for ReplayEstimatorLoader {
  type Estimator = ReplayHandEstimator;
  type Error = ReplayModelError;

  fn load(&self, backend: Backend) -> Result<Self::Estimator, Self::Error> {
    info!("加载手部模板: {} (后端: {})", self.path.display(), backend);
    let text = std::fs::read_to_string(&self.path)?;
    let replay: HandReplay = serde_json::from_str(&text)?;

    let mut templates = Vec::with_capacity(replay.hands.len());
    for (index, hand) in replay.hands.into_iter().enumerate() {
      if hand.landmarks.len() != NUM_LANDMARKS {
        return Err(ReplayModelError::LandmarkCount {
          index,
          found: hand.landmarks.len(),
        });
      }
      templates.push(hand.landmarks);
    }

    Ok(ReplayHandEstimator::new(templates, backend))
  }
}

#[cfg(test)]
mod tests {
  use futures::executor::block_on;

  use super::*;

  fn params() -> DetectorParams {
    DetectorParams {
      flip_horizontal: false,
      ..DetectorParams::default()
    }
  }

  fn temp_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
      "handscope-{}-{}.json",
      std::process::id(),
      name
    ));
    std::fs::write(&path, contents).unwrap();
    path
  }

  #[test]
  fn nms_drops_overlapping_lower_scores() {
    let boxes = vec![
      DetectionBox::new(0.0, 0.0, 10.0, 10.0, 0.6),
      DetectionBox::new(1.0, 1.0, 10.0, 10.0, 0.9),
      DetectionBox::new(50.0, 50.0, 10.0, 10.0, 0.7),
    ];
    let kept = non_max_suppression(boxes, 0.5, 20);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].score, 0.7);
  }

  #[test]
  fn nms_zero_threshold_keeps_disjoint_boxes() {
    let boxes = vec![
      DetectionBox::new(0.0, 0.0, 10.0, 10.0, 0.9),
      DetectionBox::new(300.0, 300.0, 10.0, 10.0, 0.8),
      DetectionBox::new(5.0, 5.0, 10.0, 10.0, 0.7),
    ];
    let kept = non_max_suppression(boxes, 0.0, 20);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].score, 0.8);
  }

  #[test]
  fn nms_respects_box_limit() {
    let boxes = (0..5)
      .map(|i| DetectionBox::new(i as f32 * 100.0, 0.0, 10.0, 10.0, 0.5 + i as f32 * 0.1))
      .collect();
    let kept = non_max_suppression(boxes, 0.5, 2);
    assert_eq!(kept.len(), 2);
    assert!(kept[0].score > kept[1].score);
  }

  #[test]
  fn detector_filters_by_score_and_cycles_frames() {
    let detector = ReplayBoxDetector::new(
      vec![
        vec![
          DetectionBox::new(10.0, 10.0, 20.0, 20.0, 0.9),
          DetectionBox::new(100.0, 10.0, 20.0, 20.0, 0.3),
        ],
        vec![],
      ],
      params(),
    );
    let image = RgbImage::new(640, 500);

    assert_eq!(block_on(detector.detect(&image)).unwrap().len(), 1);
    assert!(block_on(detector.detect(&image)).unwrap().is_empty());
    assert_eq!(block_on(detector.detect(&image)).unwrap().len(), 1);
  }

  #[test]
  fn detector_mirrors_boxes_when_flipping() {
    let detector = ReplayBoxDetector::new(
      vec![vec![DetectionBox::new(10.0, 5.0, 20.0, 20.0, 0.9)]],
      DetectorParams::default(),
    );
    let boxes = block_on(detector.detect(&RgbImage::new(640, 500))).unwrap();
    assert_eq!(boxes[0].x, 610.0);
    assert_eq!(boxes[0].y, 5.0);
  }

  #[test]
  fn estimator_scales_template_to_crop() {
    let template = (0..NUM_LANDMARKS)
      .map(|i| [i as f32 / 20.0, 0.5, 0.25])
      .collect();
    let estimator = ReplayHandEstimator::new(vec![template], Backend::Cpu);

    let hands = block_on(estimator.estimate_hands(&RgbImage::new(200, 100))).unwrap();
    assert_eq!(hands.len(), 1);
    assert_eq!(hands[0].landmarks[20], [200.0, 50.0, 0.25]);
    assert_eq!(hands[0].annotations.palm_base[0], [0.0, 50.0, 0.25]);

    let none = block_on(estimator.estimate_hands(&RgbImage::new(0, 0))).unwrap();
    assert!(none.is_empty());
  }

  #[test]
  fn loaders_read_json_records() {
    let boxes = temp_file(
      "boxes",
      r#"{"frames": [[{"bbox": [1, 2, 3, 4], "score": 0.95}]]}"#,
    );
    let url = Url::parse(&format!("replay://{}", boxes.display())).unwrap();
    let detector = ReplayDetectorLoader::from_url(&url)
      .unwrap()
      .load(&params())
      .unwrap();
    assert_eq!(detector.params(), &params());
    let found = block_on(detector.detect(&RgbImage::new(10, 10))).unwrap();
    assert_eq!(found, vec![DetectionBox::new(1.0, 2.0, 3.0, 4.0, 0.95)]);

    let landmarks = vec![[0.5f32, 0.5, 0.0]; NUM_LANDMARKS];
    let hand = temp_file(
      "full-hand",
      &format!(r#"{{"hands": [{{"landmarks": {:?}}}]}}"#, landmarks),
    );
    let estimator = ReplayEstimatorLoader { path: hand.clone() }
      .load(Backend::Cpu)
      .unwrap();
    assert_eq!(estimator.backend(), Backend::Cpu);

    let short_hand = temp_file("hand", r#"{"hands": [{"landmarks": [[0, 0, 0]]}]}"#);
    let loader = ReplayEstimatorLoader {
      path: short_hand.clone(),
    };
    assert!(matches!(
      loader.load(Backend::Gpu),
      Err(ReplayModelError::LandmarkCount { found: 1, .. })
    ));

    let _ = std::fs::remove_file(boxes);
    let _ = std::fs::remove_file(short_hand);
    let _ = std::fs::remove_file(hand);
  }

  #[test]
  fn rejects_foreign_scheme() {
    let url = Url::parse("yolo26:///tmp/model.rknn").unwrap();
    assert!(matches!(
      ReplayDetectorLoader::from_url(&url),
      Err(ReplayModelError::SchemeMismatch { .. })
    ));
  }
}
