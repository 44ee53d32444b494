//! Controllable fake device and compositor backends for exercising the
//! runtime core without hardware. Tests poke state in through the setters
//! and read back what the core did through the logs each fake keeps.

use cortexr::compositor::{
    CompositorBackend, CompositorCreateInfo, CompositorEvent, CompositorFactory,
    EnvironmentBlendMode, FrameTiming, SubmittedLayer, SubmittedLayerData, SwapchainBackend,
    SwapchainCreateInfo,
};
use cortexr::device::{
    Device, DeviceProber, HapticEvent, InputState, InputValue, ProbedDevices, ViewPose,
};
use cortexr::error::{XrError, XrResult};
use cortexr::math::{Fov, Pose, Relation, XrDuration, XrTime};
use crossbeam_utils::atomic::AtomicCell;
use glam::{Vec2, Vec3};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub struct FakeDevice {
    name: String,
    hand_tracking: bool,
    outputs: Vec<&'static str>,
    blend_modes: Vec<EnvironmentBlendMode>,
    inputs: Mutex<HashMap<String, InputState>>,
    relation: AtomicCell<Relation>,
    origin_offset: AtomicCell<Pose>,
    haptic_log: Mutex<Vec<(String, HapticEvent)>>,
    stop_log: Mutex<Vec<String>>,
}

impl FakeDevice {
    pub fn hmd(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            hand_tracking: false,
            outputs: Vec::new(),
            blend_modes: vec![EnvironmentBlendMode::Opaque, EnvironmentBlendMode::Additive],
            inputs: Mutex::default(),
            relation: AtomicCell::new(Relation::IDENTITY),
            origin_offset: AtomicCell::new(Pose::IDENTITY),
            haptic_log: Mutex::default(),
            stop_log: Mutex::default(),
        })
    }

    pub fn controller(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            hand_tracking: false,
            outputs: vec!["haptic", "haptic_left", "haptic_right"],
            blend_modes: vec![EnvironmentBlendMode::Opaque],
            inputs: Mutex::default(),
            relation: AtomicCell::new(Relation::IDENTITY),
            origin_offset: AtomicCell::new(Pose::IDENTITY),
            haptic_log: Mutex::default(),
            stop_log: Mutex::default(),
        })
    }

    pub fn set_input(&self, input: &str, value: impl Into<InputValue>) {
        self.inputs.lock().unwrap().insert(
            input.to_owned(),
            InputState {
                active: true,
                timestamp: cortexr::monotonic_time_ns(),
                value: value.into(),
            },
        );
    }

    pub fn set_bool(&self, input: &str, value: bool) {
        self.set_input(input, value);
    }

    pub fn set_float(&self, input: &str, value: f32) {
        self.set_input(input, value);
    }

    pub fn set_vec2(&self, input: &str, value: Vec2) {
        self.set_input(input, value);
    }

    pub fn set_pose(&self, input: &str, relation: Relation) {
        self.set_input(input, relation);
    }

    pub fn deactivate(&self, input: &str) {
        if let Some(state) = self.inputs.lock().unwrap().get_mut(input) {
            state.active = false;
        }
    }

    pub fn set_relation(&self, relation: Relation) {
        self.relation.store(relation);
    }

    pub fn set_origin_offset(&self, pose: Pose) {
        self.origin_offset.store(pose);
    }

    pub fn haptic_events(&self) -> Vec<(String, HapticEvent)> {
        self.haptic_log.lock().unwrap().clone()
    }

    pub fn stop_events(&self) -> Vec<String> {
        self.stop_log.lock().unwrap().clone()
    }
}

impl Device for FakeDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_hand_tracking(&self) -> bool {
        self.hand_tracking
    }

    fn input_state(&self, input: &str) -> Option<InputState> {
        self.inputs.lock().unwrap().get(input).copied()
    }

    fn has_output(&self, output: &str) -> bool {
        self.outputs.contains(&output)
    }

    fn apply_haptic(&self, output: &str, event: HapticEvent) {
        self.haptic_log
            .lock()
            .unwrap()
            .push((output.to_owned(), event));
    }

    fn stop_haptic(&self, output: &str) {
        self.stop_log.lock().unwrap().push(output.to_owned());
    }

    fn relation_at(&self, _time: XrTime) -> Relation {
        self.relation.load()
    }

    fn view_relations(&self, eye_relation: Pose, time: XrTime) -> (Relation, [ViewPose; 2]) {
        let head = self.relation_at(time);
        let half_ipd = eye_relation.position.x / 2.0;
        let fov = Fov {
            angle_left: -0.8,
            angle_right: 0.8,
            angle_up: 0.8,
            angle_down: -0.8,
        };
        let eye = |x: f32| ViewPose {
            pose: Pose::from_translation(Vec3::new(x, 0.0, 0.0)),
            fov,
        };
        (head, [eye(-half_ipd), eye(half_ipd)])
    }

    fn tracking_origin_offset(&self) -> Pose {
        self.origin_offset.load()
    }

    fn supported_blend_modes(&self) -> Vec<EnvironmentBlendMode> {
        self.blend_modes.clone()
    }
}

#[derive(Clone)]
pub struct FakeProber {
    pub head: Arc<FakeDevice>,
    pub left: Option<Arc<FakeDevice>>,
    pub right: Option<Arc<FakeDevice>>,
    pub gamepad: Option<Arc<FakeDevice>>,
}

impl DeviceProber for FakeProber {
    fn probe(&self) -> XrResult<ProbedDevices> {
        fn erase(device: Arc<FakeDevice>) -> Arc<dyn Device> {
            device
        }
        Ok(ProbedDevices {
            head: self.head.clone(),
            left: self.left.clone().map(erase),
            right: self.right.clone().map(erase),
            gamepad: self.gamepad.clone().map(erase),
            hand_left: None,
            hand_right: None,
        })
    }
}

pub struct FakeSwapchain {
    image_count: usize,
    cursor: AtomicUsize,
    pub acquired: Mutex<Vec<u32>>,
    pub released: Mutex<Vec<u32>>,
    time_out_waits: AtomicBool,
}

impl FakeSwapchain {
    fn new(image_count: usize) -> Arc<Self> {
        Arc::new(Self {
            image_count,
            cursor: AtomicUsize::new(0),
            acquired: Mutex::default(),
            released: Mutex::default(),
            time_out_waits: AtomicBool::new(false),
        })
    }

    pub fn time_out_waits(&self) {
        self.time_out_waits.store(true, Ordering::Relaxed);
    }
}

impl SwapchainBackend for FakeSwapchain {
    fn image_count(&self) -> usize {
        self.image_count
    }

    fn acquire(&self) -> XrResult<u32> {
        let index = (self.cursor.fetch_add(1, Ordering::Relaxed) % self.image_count) as u32;
        self.acquired.lock().unwrap().push(index);
        Ok(index)
    }

    fn wait(&self, _index: u32, _timeout: XrDuration) -> XrResult<()> {
        if self.time_out_waits.load(Ordering::Relaxed) {
            return Err(XrError::TimeoutExpired);
        }
        Ok(())
    }

    fn release(&self, index: u32) -> XrResult<()> {
        self.released.lock().unwrap().push(index);
        Ok(())
    }
}

/// One-line summaries of everything submitted, for assertions.
fn describe_layer(layer: &SubmittedLayer) -> String {
    let kind = match &layer.data {
        SubmittedLayerData::Projection { .. } => "projection",
        SubmittedLayerData::Quad { .. } => "quad",
        SubmittedLayerData::Cube { .. } => "cube",
        SubmittedLayerData::Cylinder { .. } => "cylinder",
        SubmittedLayerData::Equirect { .. } => "equirect",
        SubmittedLayerData::Equirect2 { .. } => "equirect2",
    };
    if layer.view_space {
        format!("{kind}@view")
    } else {
        format!("{kind}@world")
    }
}

#[derive(Default)]
pub struct FakeCompositor {
    next_frame_id: AtomicI64,
    pub display_period_ns: AtomicI64,
    events: Mutex<VecDeque<CompositorEvent>>,
    session_active: AtomicBool,
    fail_next_wait: AtomicBool,
    pub begun: Mutex<Vec<i64>>,
    pub discarded: Mutex<Vec<i64>>,
    pub committed: Mutex<Vec<i64>>,
    pub submitted: Mutex<Vec<String>>,
    pub swapchains: Mutex<Vec<Arc<FakeSwapchain>>>,
}

impl FakeCompositor {
    pub fn new() -> Arc<Self> {
        let compositor = Self::default();
        compositor.display_period_ns.store(11_111_111, Ordering::Relaxed);
        compositor.next_frame_id.store(1, Ordering::Relaxed);
        Arc::new(compositor)
    }

    pub fn push_event(&self, event: CompositorEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    pub fn fail_next_wait(&self) {
        self.fail_next_wait.store(true, Ordering::Relaxed);
    }

    pub fn session_active(&self) -> bool {
        self.session_active.load(Ordering::Relaxed)
    }
}

impl CompositorBackend for FakeCompositor {
    fn begin_session(&self) -> XrResult<()> {
        self.session_active.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn end_session(&self) {
        self.session_active.store(false, Ordering::Relaxed);
    }

    fn wait_frame(&self) -> XrResult<FrameTiming> {
        if self.fail_next_wait.swap(false, Ordering::Relaxed) {
            return Err(XrError::InstanceLost);
        }
        let period = self.display_period_ns.load(Ordering::Relaxed);
        Ok(FrameTiming {
            frame_id: self.next_frame_id.fetch_add(1, Ordering::Relaxed),
            display_time_ns: cortexr::monotonic_time_ns() + period,
            display_period_ns: period,
        })
    }

    fn begin_frame(&self, frame_id: i64) -> XrResult<()> {
        self.begun.lock().unwrap().push(frame_id);
        Ok(())
    }

    fn discard_frame(&self, frame_id: i64) {
        self.discarded.lock().unwrap().push(frame_id);
    }

    fn layer_begin(&self, _frame_id: i64, _blend_mode: EnvironmentBlendMode) {}

    fn submit_layer(&self, layer: &SubmittedLayer) {
        self.submitted.lock().unwrap().push(describe_layer(layer));
    }

    fn layer_commit(&self, frame_id: i64, _sync: cortexr::compositor::CommitSync) -> XrResult<()> {
        self.committed.lock().unwrap().push(frame_id);
        Ok(())
    }

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> XrResult<Arc<dyn SwapchainBackend>> {
        let image_count = if info.is_static { 1 } else { 3 };
        let swapchain = FakeSwapchain::new(image_count);
        self.swapchains.lock().unwrap().push(swapchain.clone());
        Ok(swapchain)
    }

    fn poll_event(&self) -> Option<CompositorEvent> {
        self.events.lock().unwrap().pop_front()
    }
}

pub struct FakeCompositorFactory {
    pub compositor: Arc<FakeCompositor>,
    pub seen_create_info: Mutex<Option<CompositorCreateInfo>>,
}

impl FakeCompositorFactory {
    pub fn new(compositor: Arc<FakeCompositor>) -> Arc<Self> {
        Arc::new(Self {
            compositor,
            seen_create_info: Mutex::default(),
        })
    }
}

impl CompositorFactory for FakeCompositorFactory {
    fn create_native_compositor(
        &self,
        info: &CompositorCreateInfo,
    ) -> XrResult<Arc<dyn CompositorBackend>> {
        *self.seen_create_info.lock().unwrap() = Some(*info);
        Ok(self.compositor.clone())
    }
}

/// A full rig: HMD, two hand controllers, a gamepad, and a compositor.
pub struct Rig {
    pub prober: FakeProber,
    pub head: Arc<FakeDevice>,
    pub left: Arc<FakeDevice>,
    pub right: Arc<FakeDevice>,
    pub gamepad: Arc<FakeDevice>,
    pub compositor: Arc<FakeCompositor>,
    pub factory: Arc<FakeCompositorFactory>,
}

impl Rig {
    pub fn new() -> Self {
        let head = FakeDevice::hmd("Fake HMD");
        let left = FakeDevice::controller("Fake Index Controller (Left)");
        let right = FakeDevice::controller("Fake Index Controller (Right)");
        let gamepad = FakeDevice::controller("Fake Xbox Gamepad");
        let compositor = FakeCompositor::new();
        Self {
            prober: FakeProber {
                head: head.clone(),
                left: Some(left.clone()),
                right: Some(right.clone()),
                gamepad: Some(gamepad.clone()),
            },
            head,
            left,
            right,
            gamepad,
            compositor: compositor.clone(),
            factory: FakeCompositorFactory::new(compositor),
        }
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}
