// 该文件是 Handscope （掌上观） 项目的一部分。
// src/hand.rs - 手部关键点定义
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

use crate::geometry::{Landmark, translate_points_mut};

/// 单只手的关键点数量
pub const NUM_LANDMARKS: usize = 21;

/// 手腕/掌根关键点索引，所有手指链都从这里开始
pub const WRIST: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finger {
  Thumb,
  IndexFinger,
  MiddleFinger,
  RingFinger,
  Pinky,
}

impl Finger {
  pub const ALL: [Finger; 5] = [
    Finger::Thumb,
    Finger::IndexFinger,
    Finger::MiddleFinger,
    Finger::RingFinger,
    Finger::Pinky,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Finger::Thumb => "thumb",
      Finger::IndexFinger => "indexFinger",
      Finger::MiddleFinger => "middleFinger",
      Finger::RingFinger => "ringFinger",
      Finger::Pinky => "pinky",
    }
  }

  /// 该手指折线依次经过的关键点索引
  pub fn chain(&self) -> &'static [usize; 5] {
    &FINGER_CHAINS[*self as usize].1
  }
}

/// 每根手指绘制为一条折线，起点固定为手腕
pub const FINGER_CHAINS: [(Finger, [usize; 5]); 5] = [
  (Finger::Thumb, [WRIST, 1, 2, 3, 4]),
  (Finger::IndexFinger, [WRIST, 5, 6, 7, 8]),
  (Finger::MiddleFinger, [WRIST, 9, 10, 11, 12]),
  (Finger::RingFinger, [WRIST, 13, 14, 15, 16]),
  (Finger::Pinky, [WRIST, 17, 18, 19, 20]),
];

/// 按手指分组的关键点，每根手指四个点（由近及远），外加掌根
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandAnnotations {
  pub thumb: Vec<Landmark>,
  pub index_finger: Vec<Landmark>,
  pub middle_finger: Vec<Landmark>,
  pub ring_finger: Vec<Landmark>,
  pub pinky: Vec<Landmark>,
  pub palm_base: Vec<Landmark>,
}

impl HandAnnotations {
  /// 由 21 个关键点按手指链表生成分组
  pub fn from_landmarks(landmarks: &[Landmark]) -> Self {
    let finger = |finger: Finger| -> Vec<Landmark> {
      finger.chain()[1..]
        .iter()
        .filter_map(|idx| landmarks.get(*idx).copied())
        .collect()
    };

    Self {
      thumb: finger(Finger::Thumb),
      index_finger: finger(Finger::IndexFinger),
      middle_finger: finger(Finger::MiddleFinger),
      ring_finger: finger(Finger::RingFinger),
      pinky: finger(Finger::Pinky),
      palm_base: landmarks.get(WRIST).copied().into_iter().collect(),
    }
  }

  pub fn finger(&self, finger: Finger) -> &[Landmark] {
    match finger {
      Finger::Thumb => &self.thumb,
      Finger::IndexFinger => &self.index_finger,
      Finger::MiddleFinger => &self.middle_finger,
      Finger::RingFinger => &self.ring_finger,
      Finger::Pinky => &self.pinky,
    }
  }

  fn groups_mut(&mut self) -> [&mut Vec<Landmark>; 6] {
    [
      &mut self.thumb,
      &mut self.index_finger,
      &mut self.middle_finger,
      &mut self.ring_finger,
      &mut self.pinky,
      &mut self.palm_base,
    ]
  }
}

/// 关键点估计器对一张裁剪图的单手输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandPose {
  pub landmarks: Vec<Landmark>,
  pub annotations: HandAnnotations,
}

impl HandPose {
  pub fn from_landmarks(landmarks: Vec<Landmark>) -> Self {
    let annotations = HandAnnotations::from_landmarks(&landmarks);
    Self {
      landmarks,
      annotations,
    }
  }

  /// 取出一条手指链上的点，缺失的索引会被跳过
  pub fn chain_points(&self, finger: Finger) -> Vec<Landmark> {
    finger
      .chain()
      .iter()
      .filter_map(|idx| self.landmarks.get(*idx).copied())
      .collect()
  }

  /// 把裁剪图局部坐标平移到全帧坐标，关键点与分组同时平移
  pub fn translate(&mut self, dx: f32, dy: f32) {
    translate_points_mut(&mut self.landmarks, dx, dy);
    for group in self.annotations.groups_mut() {
      translate_points_mut(group, dx, dy);
    }
  }

  pub fn translated(mut self, dx: f32, dy: f32) -> Self {
    self.translate(dx, dy);
    self
  }
}
