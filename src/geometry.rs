// 该文件是 Handscope （掌上观） 项目的一部分。
// src/geometry.rs - 检测框缩放、裁剪与坐标平移
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

/// 关键点坐标 `[x, y, z]`，z 为深度分量，平移时保持不变
pub type Landmark = [f32; 3];

/// 全帧像素坐标下的手部检测框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
  pub score: f32,
}

impl DetectionBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32, score: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
      score,
    }
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  pub fn is_empty(&self) -> bool {
    self.width <= 0.0 || self.height <= 0.0
  }

  /// 交并比，任一框为空时返回 0
  pub fn iou(&self, other: &DetectionBox) -> f32 {
    let left = self.x.max(other.x);
    let top = self.y.max(other.y);
    let right = (self.x + self.width).min(other.x + other.width);
    let bottom = (self.y + self.height).min(other.y + other.height);

    let intersection = (right - left).max(0.0) * (bottom - top).max(0.0);
    let union = self.area() + other.area() - intersection;
    if union <= 0.0 {
      return 0.0;
    }
    intersection / union
  }

  /// 以中心为基准按比例放大后限制在画布内，原地修改
  pub fn rescale_and_clamp(
    &mut self,
    width_scale: f32,
    height_scale: f32,
    surface_width: f32,
    surface_height: f32,
  ) {
    *self = rescale_and_clamp(
      *self,
      width_scale,
      height_scale,
      surface_width,
      surface_height,
    );
  }
}

/// 以框中心为基准，按宽高比例因子对称放大检测框，再限制到 `[0, W) x [0, H)`。
///
/// 起点越过下界时直接置 0（不缩小尺寸）；远端越过上界时缩小尺寸使其恰好贴边（不移动起点）。
/// 起点本身已在画布之外的框会退化为零尺寸。
pub fn rescale_and_clamp(
  bbox: DetectionBox,
  width_scale: f32,
  height_scale: f32,
  surface_width: f32,
  surface_height: f32,
) -> DetectionBox {
  let (x, width) = clamp_axis(bbox.x, bbox.width, width_scale, surface_width);
  let (y, height) = clamp_axis(bbox.y, bbox.height, height_scale, surface_height);

  DetectionBox {
    x,
    y,
    width,
    height,
    score: bbox.score,
  }
}

fn clamp_axis(origin: f32, size: f32, scale: f32, bound: f32) -> (f32, f32) {
  let half = size / 2.0;
  let scaled_size = size * scale;

  let expanded = origin + half - half * scale;
  let origin = if expanded > 0.0 { expanded } else { 0.0 };
  let origin = origin.min(bound);

  let size = if origin + scaled_size > bound {
    bound - origin
  } else {
    scaled_size
  };

  (origin, size.max(0.0))
}

/// 对每个点的前两个分量加上固定偏移
pub fn translate_points(points: &[Landmark], dx: f32, dy: f32) -> Vec<Landmark> {
  let mut points = points.to_vec();
  translate_points_mut(&mut points, dx, dy);
  points
}

pub fn translate_points_mut(points: &mut [Landmark], dx: f32, dy: f32) {
  for point in points.iter_mut() {
    point[0] += dx;
    point[1] += dy;
  }
}
