// 该文件是 Handscope （掌上观） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, input::query_param};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 用一张静态图片代替摄像头，`repeat=true` 时无限重复
pub struct ImageFileInput {
  image: Option<RgbImage>,
  repeat: bool,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url.path();
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    let repeat = query_param(url, "repeat").unwrap_or(false);
    info!(
      "读取图像文件: {} ({}x{}, 重复: {})",
      path,
      image.width(),
      image.height(),
      repeat
    );

    Ok(Self::new(image, repeat))
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage, repeat: bool) -> Self {
    Self {
      image: Some(image),
      repeat,
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    if self.repeat {
      self.image.clone()
    } else {
      self.image.take()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_shot_yields_once() {
    let mut input = ImageFileInput::new(RgbImage::new(2, 2), false);
    assert!(input.next().is_some());
    assert!(input.next().is_none());
  }

  #[test]
  fn repeat_keeps_yielding() {
    let input = ImageFileInput::new(RgbImage::new(2, 2), true);
    assert_eq!(input.take(3).count(), 3);
  }

  #[test]
  fn missing_file_is_an_error() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }
}
