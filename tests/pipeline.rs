use std::{
  cell::{Cell, RefCell},
  convert::Infallible,
  sync::mpsc,
};

use futures::executor::block_on;
use image::{Rgb, RgbImage};
use thiserror::Error;
use url::Url;

use handscope::{
  config::{Backend, ControlEdit, LiveConfig},
  geometry::DetectionBox,
  hand::{HandPose, NUM_LANDMARKS},
  model::{BoxDetector, DetectorLoader, DetectorParams, EstimatorLoader, LandmarkEstimator},
  output::{Render, draw::Renderer},
  pipeline::{FrameReport, PipelineError},
  session::{Session, SessionError, Status, StatusSink, open_camera},
  task::{FrameLoop, FrameOutcome, StopSignal},
};

#[derive(Error, Debug)]
#[error("mock failure")]
struct MockError;

/// 每次构造都带上代数，便于确认重建后使用的是新模型
struct MockDetector {
  generation: usize,
  params: DetectorParams,
  boxes: Vec<DetectionBox>,
  fail_on: Vec<usize>,
  calls: Cell<usize>,
}

impl BoxDetector for MockDetector {
  type Error = MockError;

  async fn detect(&self, _image: &RgbImage) -> Result<Vec<DetectionBox>, Self::Error> {
    let call = self.calls.get();
    self.calls.set(call + 1);
    if self.fail_on.contains(&call) {
      return Err(MockError);
    }
    Ok(
      self
        .boxes
        .iter()
        .filter(|b| b.score >= self.params.score_threshold)
        .copied()
        .collect(),
    )
  }
}

struct MockDetectorLoader {
  boxes: Vec<DetectionBox>,
  fail_on: Vec<usize>,
  loads: Cell<usize>,
  fail_above: f32,
}

impl MockDetectorLoader {
  fn new(boxes: Vec<DetectionBox>) -> Self {
    Self {
      boxes,
      fail_on: Vec::new(),
      loads: Cell::new(0),
      fail_above: f32::INFINITY,
    }
  }
}

impl DetectorLoader for MockDetectorLoader {
  type Detector = MockDetector;
  type Error = MockError;

  fn load(&self, params: &DetectorParams) -> Result<Self::Detector, Self::Error> {
    if params.score_threshold > self.fail_above {
      return Err(MockError);
    }
    self.loads.set(self.loads.get() + 1);
    Ok(MockDetector {
      generation: self.loads.get(),
      params: params.clone(),
      boxes: self.boxes.clone(),
      fail_on: self.fail_on.clone(),
      calls: Cell::new(0),
    })
  }
}

/// 裁剪宽度在 `blind` 中的区域不返回任何手；
/// 宽度等于 `fail_width` 的区域在前 `failures` 次调用中报错
struct MockEstimator {
  backend: Backend,
  blind: Vec<u32>,
  fail_width: Option<u32>,
  failures: Cell<usize>,
}

impl LandmarkEstimator for MockEstimator {
  type Error = MockError;

  async fn estimate_hands(&self, image: &RgbImage) -> Result<Vec<HandPose>, Self::Error> {
    if self.fail_width == Some(image.width()) && self.failures.get() > 0 {
      self.failures.set(self.failures.get() - 1);
      return Err(MockError);
    }
    if self.blind.contains(&image.width()) {
      return Ok(Vec::new());
    }
    let landmarks = (0..NUM_LANDMARKS)
      .map(|i| [i as f32, i as f32, 0.0])
      .collect();
    Ok(vec![HandPose::from_landmarks(landmarks)])
  }
}

struct MockEstimatorLoader {
  blind: Vec<u32>,
  fail_width: Option<u32>,
  failures: usize,
  loads: Cell<usize>,
}

impl MockEstimatorLoader {
  fn new(blind: Vec<u32>) -> Self {
    Self {
      blind,
      fail_width: None,
      failures: 0,
      loads: Cell::new(0),
    }
  }

  fn failing(width: u32, failures: usize) -> Self {
    Self {
      fail_width: Some(width),
      failures,
      ..Self::new(Vec::new())
    }
  }
}

impl EstimatorLoader for MockEstimatorLoader {
  type Estimator = MockEstimator;
  type Error = Infallible;

  fn load(&self, backend: Backend) -> Result<Self::Estimator, Self::Error> {
    self.loads.set(self.loads.get() + 1);
    Ok(MockEstimator {
      backend,
      blind: self.blind.clone(),
      fail_width: self.fail_width,
      failures: Cell::new(self.failures),
    })
  }
}

#[derive(Default)]
struct RecordingStatus(Vec<Status>);

impl StatusSink for RecordingStatus {
  fn show(&mut self, status: Status) {
    self.0.push(status);
  }
}

#[derive(Default)]
struct RecordingOutput {
  frames: RefCell<Vec<(RgbImage, FrameReport)>>,
}

impl Render<RgbImage, FrameReport> for RecordingOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &RgbImage, result: &FrameReport) -> Result<(), Self::Error> {
    self.frames.borrow_mut().push((frame.clone(), result.clone()));
    Ok(())
  }
}

fn camera_frame() -> RgbImage {
  RgbImage::from_fn(640, 500, |x, y| Rgb([(x % 251) as u8, (y % 241) as u8, 64]))
}

/// 三个互不重叠的框，放大两倍后裁剪宽度分别为 100、60、40
fn three_boxes() -> Vec<DetectionBox> {
  vec![
    DetectionBox::new(100.0, 100.0, 50.0, 50.0, 0.95),
    DetectionBox::new(300.0, 100.0, 30.0, 30.0, 0.9),
    DetectionBox::new(450.0, 300.0, 20.0, 20.0, 0.65),
  ]
}

fn session(
  detector_loader: MockDetectorLoader,
  estimator_loader: MockEstimatorLoader,
) -> Session<MockDetectorLoader, MockEstimatorLoader> {
  Session::load(
    LiveConfig::default(),
    DetectorParams::default(),
    detector_loader,
    estimator_loader,
  )
  .unwrap()
}

#[test]
fn box_without_hand_contributes_no_skeleton() {
  let session = session(
    MockDetectorLoader::new(three_boxes()),
    MockEstimatorLoader::new(vec![60]),
  );
  let mut pipeline = session.pipeline(Renderer::default());

  let report = block_on(session.run_frame(&mut pipeline, &camera_frame())).unwrap();

  assert_eq!(report.boxes.len(), 3);
  assert_eq!(report.hands.len(), 2);
  assert_eq!(
    report.hands.iter().map(|h| h.slot).collect::<Vec<_>>(),
    vec![0, 2]
  );
  // 第一个框放大后原点为 (75, 75)
  assert_eq!(report.hands[0].pose.landmarks[3], [78.0, 78.0, 0.0]);
  assert_eq!(report.hands[0].pose.annotations.palm_base[0], [75.0, 75.0, 0.0]);
}

#[test]
fn rendered_surface_carries_boxes_and_keypoints() {
  let session = session(
    MockDetectorLoader::new(three_boxes()),
    MockEstimatorLoader::new(Vec::new()),
  );
  let mut pipeline = session.pipeline(Renderer::default());

  block_on(session.run_frame(&mut pipeline, &camera_frame())).unwrap();

  let image = pipeline.surface().image();
  assert_eq!(image.dimensions(), (640, 500));
  // 框线颜色
  assert_eq!(*image.get_pixel(75, 120), Rgb([0x00, 0x63, 0xFF]));
  // 手腕关键点
  assert_eq!(*image.get_pixel(75 + 1, 75 + 1), Rgb([255, 0, 0]));
}

#[test]
fn hidden_layers_leave_the_mirrored_frame() {
  let mut session = session(
    MockDetectorLoader::new(three_boxes()),
    MockEstimatorLoader::new(Vec::new()),
  );
  let mut status = RecordingStatus::default();
  session
    .apply(ControlEdit::ShowBoundingBoxes(false), &mut status)
    .unwrap();
  session
    .apply(ControlEdit::ShowKeypoints(false), &mut status)
    .unwrap();
  assert!(status.0.is_empty());
  assert_eq!(session.detector_loads(), 1);

  let frame = camera_frame();
  let mut pipeline = session.pipeline(Renderer::default());
  let report = block_on(session.run_frame(&mut pipeline, &frame)).unwrap();

  assert_eq!(report.hands.len(), 3);
  assert_eq!(
    *pipeline.surface().image(),
    image::imageops::flip_horizontal(&frame)
  );
}

#[test]
fn score_threshold_edit_reloads_detector_once() {
  let mut session = session(
    MockDetectorLoader::new(three_boxes()),
    MockEstimatorLoader::new(Vec::new()),
  );
  let mut status = RecordingStatus::default();

  let (tx, rx) = mpsc::channel();
  tx.send(ControlEdit::ScoreThreshold(0.7)).unwrap();
  let mut frame_loop = FrameLoop::new().with_controls(rx);
  let mut pipeline = session.pipeline(Renderer::default());
  let output = RecordingOutput::default();
  let mut input = std::iter::repeat(camera_frame());

  let outcome = frame_loop
    .run_once(&mut input, &mut session, &mut pipeline, &output, &mut status)
    .unwrap();

  assert_eq!(session.detector_loads(), 2);
  assert_eq!(session.detector().generation, 2);
  assert_eq!(session.detector().params.score_threshold, 0.7);
  assert_eq!(
    status.0,
    vec![
      Status::Loading("Changing score threshold to 0.70...".to_string()),
      Status::Running
    ]
  );
  // 新阈值过滤掉了 0.65 的框
  let FrameOutcome::Rendered(report) = outcome else {
    panic!("frame was not rendered: {outcome:?}");
  };
  assert_eq!(report.boxes.len(), 2);
  assert_eq!(output.frames.borrow().len(), 1);
}

#[test]
fn backend_edit_reloads_both_models() {
  let mut session = session(
    MockDetectorLoader::new(three_boxes()),
    MockEstimatorLoader::new(Vec::new()),
  );
  let mut status = RecordingStatus::default();

  session
    .apply(ControlEdit::Backend(Backend::Cpu), &mut status)
    .unwrap();

  assert_eq!(session.estimator().backend, Backend::Cpu);
  assert_eq!(session.detector().params.backend, Backend::Cpu);
  assert_eq!(session.detector_loads(), 2);
  assert_eq!(
    status.0.first(),
    Some(&Status::Loading("Changing backend to cpu...".to_string()))
  );
  assert_eq!(status.0.last(), Some(&Status::Running));
}

#[test]
fn reload_failure_stays_loading() {
  let mut detector_loader = MockDetectorLoader::new(three_boxes());
  detector_loader.fail_above = 0.9;
  let mut session = session(detector_loader, MockEstimatorLoader::new(Vec::new()));
  let mut status = RecordingStatus::default();

  let result = session.apply(ControlEdit::ScoreThreshold(0.95), &mut status);

  assert!(matches!(result, Err(SessionError::ModelLoadFailure(_))));
  assert_eq!(status.0.len(), 1);
  assert!(matches!(status.0[0], Status::Loading(_)));
}

#[test]
fn detector_failure_skips_frame_and_loop_continues() {
  let mut detector_loader = MockDetectorLoader::new(three_boxes());
  detector_loader.fail_on = vec![1];
  let mut session = session(detector_loader, MockEstimatorLoader::new(Vec::new()));
  let mut pipeline = session.pipeline(Renderer::default());
  let output = RecordingOutput::default();
  let mut status = RecordingStatus::default();

  let frames = FrameLoop::new()
    .with_frame_limit(Some(3))
    .run(
      std::iter::repeat(camera_frame()),
      &mut session,
      &mut pipeline,
      &output,
      &mut status,
    )
    .unwrap();

  assert_eq!(frames, 3);
  assert_eq!(output.frames.borrow().len(), 2);
  assert_eq!(status.0, vec![Status::Running]);
}

#[test]
fn estimator_failure_names_its_slot() {
  let session = session(
    MockDetectorLoader::new(three_boxes()),
    MockEstimatorLoader::failing(60, 1),
  );
  let mut pipeline = session.pipeline(Renderer::default());

  let result = block_on(session.run_frame(&mut pipeline, &camera_frame()));
  assert!(matches!(result, Err(PipelineError::Estimate { slot: 1, .. })));

  let report = block_on(session.run_frame(&mut pipeline, &camera_frame())).unwrap();
  assert_eq!(report.hands.len(), 3);
}

#[test]
fn estimator_failure_skips_frame_and_loop_continues() {
  let mut session = session(
    MockDetectorLoader::new(three_boxes()),
    MockEstimatorLoader::failing(40, 1),
  );
  let mut pipeline = session.pipeline(Renderer::default());
  let output = RecordingOutput::default();
  let mut status = RecordingStatus::default();
  let mut input = std::iter::repeat(camera_frame());
  let mut frame_loop = FrameLoop::new();

  let first = frame_loop
    .run_once(&mut input, &mut session, &mut pipeline, &output, &mut status)
    .unwrap();
  assert_eq!(first, FrameOutcome::Skipped);
  assert!(output.frames.borrow().is_empty());

  let frames = frame_loop
    .with_frame_limit(Some(2))
    .run(input, &mut session, &mut pipeline, &output, &mut status)
    .unwrap();
  assert_eq!(frames, 2);
  let rendered = output.frames.borrow();
  assert_eq!(rendered.len(), 2);
  assert!(rendered.iter().all(|(_, report)| report.hands.len() == 3));
}

#[test]
fn loop_ends_with_input_or_stop_signal() {
  let mut session = session(
    MockDetectorLoader::new(three_boxes()),
    MockEstimatorLoader::new(Vec::new()),
  );
  let mut pipeline = session.pipeline(Renderer::default());
  let output = RecordingOutput::default();
  let mut status = RecordingStatus::default();

  let frames = FrameLoop::new()
    .run(
      std::iter::repeat(camera_frame()).take(2),
      &mut session,
      &mut pipeline,
      &output,
      &mut status,
    )
    .unwrap();
  assert_eq!(frames, 2);

  let stop = StopSignal::new();
  stop.trigger();
  let frames = FrameLoop::new()
    .with_stop_signal(stop)
    .run(
      std::iter::repeat(camera_frame()),
      &mut session,
      &mut pipeline,
      &output,
      &mut status,
    )
    .unwrap();
  assert_eq!(frames, 0);
  assert_eq!(output.frames.borrow().len(), 2);
}

#[test]
fn run_once_is_deterministic() {
  let render = || {
    let mut session = session(
      MockDetectorLoader::new(three_boxes()),
      MockEstimatorLoader::new(vec![40]),
    );
    let mut pipeline = session.pipeline(Renderer::default());
    let output = RecordingOutput::default();
    let outcome = FrameLoop::new()
      .run_once(
        &mut std::iter::once(camera_frame()),
        &mut session,
        &mut pipeline,
        &output,
        &mut RecordingStatus::default(),
      )
      .unwrap();
    (outcome, output.frames.into_inner())
  };

  let (first_outcome, first_frames) = render();
  let (second_outcome, second_frames) = render();
  assert_eq!(first_outcome, second_outcome);
  assert_eq!(first_frames, second_frames);
}

#[test]
fn exhausted_input_is_reported() {
  let mut session = session(
    MockDetectorLoader::new(three_boxes()),
    MockEstimatorLoader::new(Vec::new()),
  );
  let mut pipeline = session.pipeline(Renderer::default());

  let outcome = FrameLoop::new()
    .run_once(
      &mut std::iter::empty(),
      &mut session,
      &mut pipeline,
      &RecordingOutput::default(),
      &mut RecordingStatus::default(),
    )
    .unwrap();

  assert_eq!(outcome, FrameOutcome::Exhausted);
}

#[test]
fn unusable_camera_is_reported() {
  for url in ["http://example.com/stream", "image:///no/such/frame.png"] {
    let url = Url::parse(url).unwrap();
    assert!(matches!(
      open_camera(&url),
      Err(SessionError::CameraUnavailable(_))
    ));
  }
}
