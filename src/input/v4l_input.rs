// 该文件是 Handscope （掌上观） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{VIDEO_HEIGHT, VIDEO_WIDTH, query_param},
};

const RGB3: &[u8; 4] = b"RGB3";
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
}

pub struct V4lInput {
  // 流持有设备句柄，先于设备释放
  stream: Stream<'static>,
  _device: Device,
  width: u32,
  height: u32,
  // 每行字节数，驱动可能在行尾填充
  stride: u32,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    // v4l:///dev/video0?width=640&height=500
    let device_path = if url.path().is_empty() || url.path() == "/" {
      "/dev/video0".to_string()
    } else {
      url.path().to_string()
    };
    let width = query_param(url, "width").unwrap_or(VIDEO_WIDTH);
    let height = query_param(url, "height").unwrap_or(VIDEO_HEIGHT);

    Self::open(&device_path, width, height)
  }
}

impl V4lInput {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4lInputError> {
    info!("打开摄像头 {} ({}x{})", device_path, width, height);
    let device = Device::with_path(device_path)?;

    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(RGB3);
    let format = device.set_format(&format)?;

    if format.fourcc != FourCC::new(RGB3) {
      return Err(V4lInputError::UnsupportedPixelFormat(
        format.fourcc.to_string(),
      ));
    }
    if format.width != width || format.height != height {
      warn!(
        "摄像头不支持 {}x{}, 实际分辨率 {}x{}",
        width, height, format.width, format.height
      );
    }

    let stream = Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)?;

    Ok(V4lInput {
      stream,
      _device: device,
      width: format.width,
      height: format.height,
      stride: format.stride,
    })
  }

  fn capture_frame(&mut self) -> Result<RgbImage, V4lInputError> {
    let (buf, meta) = self.stream.next()?;
    let used = (meta.bytesused as usize).min(buf.len());
    pack_rows(&buf[..used], self.width, self.height, self.stride)
  }
}

/// 按行去掉填充字节，拼成紧凑的 RGB 图像；`stride` 为 0 时视为无填充
fn pack_rows(buf: &[u8], width: u32, height: u32, stride: u32) -> Result<RgbImage, V4lInputError> {
  let row = width as usize * 3;
  let stride = (stride as usize).max(row).max(1);
  let expected = match height as usize {
    0 => 0,
    h => stride * (h - 1) + row,
  };
  if buf.len() < expected {
    return Err(V4lInputError::IoError(std::io::Error::new(
      std::io::ErrorKind::UnexpectedEof,
      format!("帧数据长度 {} 小于期望长度 {}", buf.len(), expected),
    )));
  }

  let mut pixels = Vec::with_capacity(row * height as usize);
  for line in buf.chunks(stride).take(height as usize) {
    pixels.extend_from_slice(&line[..row]);
  }

  RgbImage::from_raw(width, height, pixels)
    .ok_or_else(|| V4lInputError::UnsupportedPixelFormat("无法构造 RGB 图像".to_string()))
}

impl Iterator for V4lInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    match self.capture_frame() {
      Ok(frame) => Some(frame),
      Err(e) => {
        error!("Failed to capture frame: {}", e);
        None
      }
    }
  }
}
