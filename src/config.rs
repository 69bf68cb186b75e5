// 该文件是 Handscope （掌上观） 项目的一部分。
// src/config.rs - 实时可调参数
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

use std::{
  fmt,
  io::BufRead,
  path::Path,
  str::FromStr,
  sync::mpsc::{self, Receiver},
  thread,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("未知参数: {0}")]
  UnknownParameter(String),
  #[error("参数 {name} 的取值无效: {value}")]
  InvalidValue { name: String, value: String },
  #[error("控制指令格式应为 name=value: {0}")]
  MalformedEdit(String),
  #[error("读取配置文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("解析配置文件失败: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 推理所使用的计算后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
  #[default]
  Gpu,
  Cpu,
}

impl fmt::Display for Backend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Backend::Gpu => write!(f, "gpu"),
      Backend::Cpu => write!(f, "cpu"),
    }
  }
}

impl FromStr for Backend {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "gpu" | "webgl" => Ok(Backend::Gpu),
      "cpu" => Ok(Backend::Cpu),
      other => Err(ConfigError::InvalidValue {
        name: "backend".to_string(),
        value: other.to_string(),
      }),
    }
  }
}

/// 带范围和步长的数值参数，行为与滑块一致：先夹到范围内，再吸附到步长网格
#[derive(Debug, Clone, Copy)]
pub struct Range {
  pub min: f32,
  pub max: f32,
  pub step: f32,
}

impl Range {
  pub const fn new(min: f32, max: f32, step: f32) -> Self {
    Self { min, max, step }
  }

  pub fn constrain(&self, value: f32) -> f32 {
    if !value.is_finite() {
      return self.min;
    }
    let value = value.clamp(self.min, self.max);
    let steps = ((value - self.min) / self.step).round();
    let snapped = (self.min + steps * self.step).clamp(self.min, self.max);
    // 已经落在网格上的值原样保留，避免浮点误差改写用户输入
    if (snapped - value).abs() < self.step * 1e-3 {
      value
    } else {
      snapped
    }
  }
}

pub const SCORE_THRESHOLD_RANGE: Range = Range::new(0.0, 1.0, 0.01);
pub const MAX_NUM_BOXES_RANGE: Range = Range::new(1.0, 20.0, 1.0);
pub const IOU_THRESHOLD_RANGE: Range = Range::new(0.0, 1.0, 0.1);
pub const SCALE_FACTOR_RANGE: Range = Range::new(1.0, 5.0, 0.5);

/// 运行期参数集合，只由控制指令修改，流水线每帧只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
  pub score_threshold: f32,
  pub max_num_boxes: u32,
  pub iou_threshold: f32,
  pub width_scale_factor: f32,
  pub height_scale_factor: f32,
  pub show_bounding_boxes: bool,
  pub show_keypoints: bool,
  pub backend: Backend,
}

impl Default for LiveConfig {
  fn default() -> Self {
    Self {
      score_threshold: 0.6,
      max_num_boxes: 2,
      iou_threshold: 0.5,
      width_scale_factor: 2.0,
      height_scale_factor: 2.0,
      show_bounding_boxes: true,
      show_keypoints: true,
      backend: Backend::Gpu,
    }
  }
}

/// 一次参数修改带来的后果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
  /// 下一帧直接生效
  Immediate,
  /// 需要重建检测框模型
  ReloadDetector,
  /// 需要切换计算后端，两个模型都要重建
  ReloadBackend,
}

impl Effect {
  pub fn needs_reload(&self) -> bool {
    !matches!(self, Effect::Immediate)
  }
}

/// 一次用户控制操作
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEdit {
  ScoreThreshold(f32),
  MaxNumBoxes(u32),
  IouThreshold(f32),
  WidthScaleFactor(f32),
  HeightScaleFactor(f32),
  ShowBoundingBoxes(bool),
  ShowKeypoints(bool),
  Backend(Backend),
}

impl ControlEdit {
  pub fn effect(&self) -> Effect {
    match self {
      ControlEdit::ScoreThreshold(_)
      | ControlEdit::MaxNumBoxes(_)
      | ControlEdit::IouThreshold(_) => Effect::ReloadDetector,
      ControlEdit::Backend(_) => Effect::ReloadBackend,
      ControlEdit::WidthScaleFactor(_)
      | ControlEdit::HeightScaleFactor(_)
      | ControlEdit::ShowBoundingBoxes(_)
      | ControlEdit::ShowKeypoints(_) => Effect::Immediate,
    }
  }
}

impl FromStr for ControlEdit {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (name, value) = s
      .split_once('=')
      .ok_or_else(|| ConfigError::MalformedEdit(s.to_string()))?;
    let (name, value) = (name.trim(), value.trim());

    let invalid = || ConfigError::InvalidValue {
      name: name.to_string(),
      value: value.to_string(),
    };
    let float = || value.parse::<f32>().map_err(|_| invalid());
    let flag = || value.parse::<bool>().map_err(|_| invalid());

    match name {
      "score_threshold" => Ok(ControlEdit::ScoreThreshold(float()?)),
      "max_num_boxes" => {
        let boxes = value.parse::<f32>().map_err(|_| invalid())?;
        if !boxes.is_finite() {
          return Err(invalid());
        }
        Ok(ControlEdit::MaxNumBoxes(boxes.max(0.0).round() as u32))
      }
      "iou_threshold" => Ok(ControlEdit::IouThreshold(float()?)),
      "width_scale_factor" => Ok(ControlEdit::WidthScaleFactor(float()?)),
      "height_scale_factor" => Ok(ControlEdit::HeightScaleFactor(float()?)),
      "show_bounding_boxes" => Ok(ControlEdit::ShowBoundingBoxes(flag()?)),
      "show_keypoints" => Ok(ControlEdit::ShowKeypoints(flag()?)),
      "backend" => Ok(ControlEdit::Backend(value.parse()?)),
      other => Err(ConfigError::UnknownParameter(other.to_string())),
    }
  }
}

/// 检测前的图像缩放比例，必须为正的有限数
pub fn parse_image_scale_factor(value: &str) -> Result<f32, ConfigError> {
  let invalid = || ConfigError::InvalidValue {
    name: "image_scale_factor".to_string(),
    value: value.to_string(),
  };
  let scale = value.trim().parse::<f32>().map_err(|_| invalid())?;
  if !scale.is_finite() || scale <= 0.0 {
    return Err(invalid());
  }
  Ok(scale)
}

impl LiveConfig {
  pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let config: LiveConfig = serde_json::from_str(&text)?;
    Ok(config.normalized())
  }

  /// 把所有数值参数约束到各自的范围和步长上
  pub fn normalized(mut self) -> Self {
    self.score_threshold = SCORE_THRESHOLD_RANGE.constrain(self.score_threshold);
    self.max_num_boxes = MAX_NUM_BOXES_RANGE.constrain(self.max_num_boxes as f32) as u32;
    self.iou_threshold = IOU_THRESHOLD_RANGE.constrain(self.iou_threshold);
    self.width_scale_factor = SCALE_FACTOR_RANGE.constrain(self.width_scale_factor);
    self.height_scale_factor = SCALE_FACTOR_RANGE.constrain(self.height_scale_factor);
    self
  }

  /// 应用一次控制操作，返回是否需要重建模型
  pub fn apply(&mut self, edit: ControlEdit) -> Effect {
    match edit {
      ControlEdit::ScoreThreshold(v) => self.score_threshold = SCORE_THRESHOLD_RANGE.constrain(v),
      ControlEdit::MaxNumBoxes(v) => {
        self.max_num_boxes = MAX_NUM_BOXES_RANGE.constrain(v as f32) as u32
      }
      ControlEdit::IouThreshold(v) => self.iou_threshold = IOU_THRESHOLD_RANGE.constrain(v),
      ControlEdit::WidthScaleFactor(v) => self.width_scale_factor = SCALE_FACTOR_RANGE.constrain(v),
      ControlEdit::HeightScaleFactor(v) => {
        self.height_scale_factor = SCALE_FACTOR_RANGE.constrain(v)
      }
      ControlEdit::ShowBoundingBoxes(v) => self.show_bounding_boxes = v,
      ControlEdit::ShowKeypoints(v) => self.show_keypoints = v,
      ControlEdit::Backend(v) => self.backend = v,
    }
    edit.effect()
  }

  /// 重建模型期间显示的提示，取值为应用后的实际值
  pub fn loading_message(&self, edit: &ControlEdit) -> Option<String> {
    match edit {
      ControlEdit::ScoreThreshold(_) => Some(format!(
        "Changing score threshold to {:.2}...",
        self.score_threshold
      )),
      ControlEdit::MaxNumBoxes(_) => Some(format!(
        "Changing maximum number of boxes to {}...",
        self.max_num_boxes
      )),
      ControlEdit::IouThreshold(_) => Some(format!(
        "Changing IoU Threshold to {:.1}...",
        self.iou_threshold
      )),
      ControlEdit::Backend(_) => Some(format!("Changing backend to {}...", self.backend)),
      _ => None,
    }
  }
}

/// 在后台线程读取标准输入中的 `name=value` 控制指令
pub fn spawn_stdin_controls() -> Receiver<ControlEdit> {
  let (tx, rx) = mpsc::channel();

  thread::spawn(move || {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
      let line = match line {
        Ok(line) => line,
        Err(e) => {
          warn!("读取控制指令失败: {}", e);
          break;
        }
      };
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }

      match line.parse::<ControlEdit>() {
        Ok(edit) => {
          info!("收到控制指令: {:?}", edit);
          if tx.send(edit).is_err() {
            break;
          }
        }
        Err(e) => warn!("忽略无效的控制指令 '{}': {}", line, e),
      }
    }
  });

  rx
}
