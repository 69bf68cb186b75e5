// 该文件是 Handscope （掌上观） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use handscope::config::parse_image_scale_factor;
use url::Url;

/// Handscope 手部追踪可视化
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源
  /// 支持格式:
  /// - V4L2: v4l:///dev/video0?width=640&height=500
  /// - 图片: image:///path/to/frame.png?repeat=true
  #[arg(long, value_name = "SOURCE", default_value = "v4l:///dev/video0")]
  pub input: Url,

  /// 输出路径
  /// 支持格式:
  /// - 图片: image:///path/to/out.png
  /// - 目录: dir:///path/to/frames?record=true
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 检测框模型，例如 replay:///path/to/boxes.json
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,

  /// 关键点模型，例如 replay:///path/to/hand.json
  #[arg(long, value_name = "MODEL")]
  pub estimator: Url,

  /// 标签字体 (TTF/OTF)，不指定时不绘制标签文字
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 初始参数 (JSON)
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 最大处理帧数，不指定或 0 表示无限制
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 不镜像画面
  #[arg(long)]
  pub no_mirror: bool,

  /// 检测前对输入图像的缩放比例，必须大于 0；
  /// 回放检测框以摄像头像素坐标记录，不受该参数影响
  #[arg(
    long,
    value_name = "SCALE",
    default_value_t = 1.0,
    value_parser = parse_image_scale_factor
  )]
  pub image_scale_factor: f32,
}
