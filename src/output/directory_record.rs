// 该文件是 Handscope （掌上观） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  fs::File,
  io::BufWriter,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
};

use chrono::Local;
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme, input::query_param, output::Render, pipeline::FrameReport,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 把每一帧按序号写入 `<目录>/<YYYYMMDD>/frame_000001.png`，
/// `record=true` 时同时写出同名的 JSON 结果
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  record: bool,
  frame_counter: AtomicU64,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "dir";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = query_param(uri, "record").unwrap_or(false);
    Ok(DirectoryRecordOutput::new(uri.path(), record))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl AsRef<Path>, record: bool) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
      record,
      frame_counter: AtomicU64::new(0),
    }
  }

  fn frame_id(&self) -> u64 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(Local::now().format("%Y%m%d").to_string());
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!("frame_{:06}.png", self.frame_id())))
  }
}

impl Render<RgbImage, FrameReport> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &FrameReport) -> Result<(), Self::Error> {
    let path = self.frame_path()?;
    frame.save(&path)?;

    if self.record {
      let sidecar = path.with_extension("json");
      let writer = BufWriter::new(File::create(&sidecar)?);
      serde_json::to_writer_pretty(writer, result)?;
    }
    debug!("记录帧: {}", path.display());

    Ok(())
  }
}
