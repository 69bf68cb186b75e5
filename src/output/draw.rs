// 该文件是 Handscope （掌上观） 项目的一部分。
// src/output/draw.rs - 画布与检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage, imageops};
use imageproc::{
  drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
    draw_text_mut,
  },
  rect::Rect,
};
use thiserror::Error;
use tracing::debug;

use crate::{
  config::LiveConfig,
  geometry::{DetectionBox, Landmark},
  hand::{Finger, HandPose},
};

// 标签常量
const LABEL_FONT_SIZE: f32 = 12.0;
const LABEL_STRIP_HEIGHT: i32 = 17;
const LABEL_TEXT_OFFSET_X: i32 = 5;
const LABEL_TOP_MARGIN: f32 = 10.0;
const LABEL_TAG: &str = "  | hand";
const LABEL_STRIP_ALPHA: f32 = 0.6;

const BOX_COLOR: [u8; 3] = [0x00, 0x63, 0xFF];
const STRIP_COLOR: [u8; 3] = [255, 255, 255];
const SKELETON_COLOR: [u8; 3] = [255, 0, 0];
const CENTER_MARKER_SIZE: u32 = 5;
const KEYPOINT_RADIUS: i32 = 3;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 工作画布：保存当前帧（可水平镜像）并提供基本绘图操作
#[derive(Debug, Clone)]
pub struct Surface {
  image: RgbImage,
  mirror: bool,
}

impl Surface {
  pub fn new(width: u32, height: u32, mirror: bool) -> Self {
    Self {
      image: RgbImage::new(width, height),
      mirror,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  /// 把摄像头图像绘制到画布上，画布尺寸跟随图像
  pub fn acquire(&mut self, frame: &RgbImage) {
    if self.mirror {
      self.image = imageops::flip_horizontal(frame);
    } else {
      self.image.clone_from(frame);
    }
  }

  /// 检测框在画布上的整数像素区域 `(x, y, w, h)`，无有效面积时返回 `None`
  pub fn region(&self, bbox: &DetectionBox) -> Option<(u32, u32, u32, u32)> {
    let (sw, sh) = (self.width(), self.height());
    let x = bbox.x.max(0.0).floor() as u32;
    let y = bbox.y.max(0.0).floor() as u32;
    if x >= sw || y >= sh {
      return None;
    }

    let w = (bbox.width.max(0.0).round() as u32).min(sw - x);
    let h = (bbox.height.max(0.0).round() as u32).min(sh - y);
    if w == 0 || h == 0 {
      return None;
    }
    Some((x, y, w, h))
  }

  /// 把检测框区域复制到新的离屏图像
  pub fn crop(&self, bbox: &DetectionBox) -> Option<RgbImage> {
    let (x, y, w, h) = self.region(bbox)?;
    Some(imageops::crop_imm(&self.image, x, y, w, h).to_image())
  }

  pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: [u8; 3]) {
    if width == 0 || height == 0 {
      return;
    }
    draw_filled_rect_mut(
      &mut self.image,
      Rect::at(x, y).of_size(width, height),
      Rgb(color),
    );
  }

  /// 半透明填充，`alpha` 为前景不透明度
  pub fn blend_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: [u8; 3], alpha: f32) {
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = (x as i64 + width as i64).clamp(0, self.width() as i64) as u32;
    let y1 = (y as i64 + height as i64).clamp(0, self.height() as i64) as u32;

    for py in y0..y1 {
      for px in x0..x1 {
        let pixel = self.image.get_pixel_mut(px, py);
        for (channel, target) in pixel.0.iter_mut().zip(color) {
          *channel = (*channel as f32 * (1.0 - alpha) + target as f32 * alpha).round() as u8;
        }
      }
    }
  }

  pub fn stroke_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: [u8; 3]) {
    if width == 0 || height == 0 {
      return;
    }
    draw_hollow_rect_mut(
      &mut self.image,
      Rect::at(x, y).of_size(width, height),
      Rgb(color),
    );
  }

  pub fn fill_circle(&mut self, x: f32, y: f32, radius: i32, color: [u8; 3]) {
    draw_filled_circle_mut(
      &mut self.image,
      (x.round() as i32, y.round() as i32),
      radius,
      Rgb(color),
    );
  }

  /// 绘制不闭合折线，少于两个点时不绘制
  pub fn stroke_path(&mut self, points: &[Landmark], color: [u8; 3]) {
    for pair in points.windows(2) {
      draw_line_segment_mut(
        &mut self.image,
        (pair[0][0], pair[0][1]),
        (pair[1][0], pair[1][1]),
        Rgb(color),
      );
    }
  }

  pub fn draw_text(&mut self, x: i32, y: i32, text: &str, font: &FontArc, size: f32, color: [u8; 3]) {
    draw_text_mut(
      &mut self.image,
      Rgb(color),
      x,
      y,
      PxScale::from(size),
      font,
      text,
    );
  }
}

/// 检测框与手部骨架的绘制器，可见性开关由它自己检查
pub struct Renderer {
  font: Option<FontArc>,
  font_size: f32,
}

impl Default for Renderer {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Renderer {
  pub fn with_font(font: FontArc) -> Self {
    Self {
      font: Some(font),
      ..Self::default()
    }
  }

  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)?;
    Ok(Self::with_font(font))
  }

  pub fn label(bbox: &DetectionBox) -> String {
    format!("{:.3}{}", bbox.score, LABEL_TAG)
  }

  /// 绘制检测框、标签底条、中心标记和分数标签
  pub fn draw_box(&self, surface: &mut Surface, bbox: &DetectionBox, config: &LiveConfig) {
    if !config.show_bounding_boxes || bbox.is_empty() {
      return;
    }

    let x = bbox.x.round() as i32;
    let y = bbox.y.round() as i32;
    let width = bbox.width.round().max(0.0) as u32;
    let height = bbox.height.round().max(0.0) as u32;

    // 框顶离画布顶部太近时，标签放到框内上沿
    let strip_y = if bbox.y > LABEL_TOP_MARGIN {
      y - LABEL_STRIP_HEIGHT
    } else {
      y
    };
    surface.blend_rect(
      x,
      strip_y,
      width,
      LABEL_STRIP_HEIGHT as u32,
      STRIP_COLOR,
      LABEL_STRIP_ALPHA,
    );

    surface.stroke_rect(x, y, width, height, BOX_COLOR);

    let (cx, cy) = bbox.center();
    surface.fill_rect(
      cx.round() as i32,
      cy.round() as i32,
      CENTER_MARKER_SIZE,
      CENTER_MARKER_SIZE,
      BOX_COLOR,
    );

    match &self.font {
      Some(font) => surface.draw_text(
        x + LABEL_TEXT_OFFSET_X,
        strip_y + 2,
        &Self::label(bbox),
        font,
        self.font_size,
        BOX_COLOR,
      ),
      None => debug!("未设置字体，跳过标签绘制"),
    }
  }

  /// 绘制 21 个关键点和五条手指折线
  pub fn draw_skeleton(&self, surface: &mut Surface, pose: &HandPose, config: &LiveConfig) {
    if !config.show_keypoints {
      return;
    }

    for point in pose.landmarks.iter() {
      surface.fill_circle(point[0], point[1], KEYPOINT_RADIUS, SKELETON_COLOR);
    }

    for finger in Finger::ALL {
      surface.stroke_path(&pose.chain_points(finger), SKELETON_COLOR);
    }
  }
}
