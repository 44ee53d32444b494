//! End-to-end scenarios driven through the fake device and compositor
//! backends.

use cortexr::compositor::{
    CompositorEvent, EnvironmentBlendMode, SwapchainCreateInfo, SwapchainUsageFlags,
};
use cortexr::events::Event;
use cortexr::input::{
    ActionCreateInfo, ActionSetCreateInfo, ActionType, ActiveActionSet, SubactionPath,
    SuggestedBinding,
};
use cortexr::math::{Extent2Di, Fov, Offset2Di, Rect2Di, Relation};
use cortexr::session::{
    FrameBeginOutcome, GraphicsBinding, Layer, ProjectionView, SessionCreateInfo, SessionState,
    SwapchainSubImage,
};
use cortexr::session::FrameEndInfo;
use cortexr::spaces::{ReferenceSpaceType, SpaceLocationFlags};
use cortexr::system::ViewConfigurationType;
use cortexr::{
    ApplicationInfo, ExtensionSet, Instance, InstanceCreateInfo, Pose, XrError,
};
use fakedev::Rig;
use glam::{Quat, Vec3};
use std::sync::Arc;

fn create_instance(rig: &Rig, extensions: ExtensionSet) -> Arc<Instance> {
    Instance::create(
        &InstanceCreateInfo {
            application_info: ApplicationInfo {
                application_name: "runtime-tests".to_owned(),
                application_version: 1,
                engine_name: "none".to_owned(),
                engine_version: 0,
            },
            enabled_extensions: extensions,
        },
        &rig.prober,
        rig.factory.clone(),
    )
    .unwrap()
}

struct Harness {
    rig: Rig,
    instance: Arc<Instance>,
    session: cortexr::Handle<cortexr::session::Session>,
}

impl Harness {
    fn new() -> Self {
        let rig = Rig::new();
        let instance = create_instance(&rig, ExtensionSet::default());
        let session = instance
            .create_session(&SessionCreateInfo {
                graphics: GraphicsBinding::Native,
            })
            .unwrap();
        Self {
            rig,
            instance,
            session,
        }
    }

    fn begin(&self) {
        self.instance
            .begin_session(self.session, ViewConfigurationType::PrimaryStereo)
            .unwrap();
    }

    fn drive_to(&self, visible: bool, focused: bool) -> Vec<SessionState> {
        self.rig
            .compositor
            .push_event(CompositorEvent::StateChange { visible, focused });
        self.drain_states()
    }

    fn drain_states(&self) -> Vec<SessionState> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                Event::SessionStateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    fn drain_events(&self) -> Vec<Event> {
        std::iter::from_fn(|| self.instance.poll_event()).collect()
    }

    fn make_swapchain(&self, is_static: bool) -> cortexr::Handle<cortexr::swapchain::Swapchain> {
        self.instance
            .create_swapchain(
                self.session,
                &SwapchainCreateInfo {
                    usage: SwapchainUsageFlags::COLOR_ATTACHMENT,
                    format: 43,
                    sample_count: 1,
                    width: 1600,
                    height: 1600,
                    face_count: 1,
                    array_size: 1,
                    mip_count: 1,
                    is_static,
                },
            )
            .unwrap()
    }

    /// Acquire/wait/release one full cycle so the swapchain has a released
    /// image for layer validation.
    fn cycle_swapchain(&self, swapchain: cortexr::Handle<cortexr::swapchain::Swapchain>) {
        self.instance.acquire_swapchain_image(swapchain).unwrap();
        self.instance
            .wait_swapchain_image(swapchain, 1_000_000_000)
            .unwrap();
        self.instance.release_swapchain_image(swapchain).unwrap();
    }
}

fn projection_view(
    swapchain: cortexr::Handle<cortexr::swapchain::Swapchain>,
    orientation: Quat,
) -> ProjectionView {
    ProjectionView {
        pose: Pose::new(orientation, Vec3::ZERO),
        fov: Fov {
            angle_left: -0.8,
            angle_right: 0.8,
            angle_up: 0.8,
            angle_down: -0.8,
        },
        sub_image: SwapchainSubImage {
            swapchain,
            image_rect: Rect2Di {
                offset: Offset2Di { x: 0, y: 0 },
                extent: Extent2Di {
                    width: 1600,
                    height: 1600,
                },
            },
            image_array_index: 0,
        },
        depth: None,
    }
}

#[test]
fn path_interning_is_stable_and_byte_exact() {
    let rig = Rig::new();
    let instance = create_instance(&rig, ExtensionSet::default());

    let path = "/user/hand/left/input/select/click";
    let a = instance.string_to_path(path).unwrap();
    let b = instance.string_to_path(path).unwrap();
    assert_eq!(a, b);

    let needed = instance.path_to_string(a, None).unwrap();
    assert_eq!(needed, path.len());

    let mut too_small = vec![0u8; needed - 1];
    assert_eq!(
        instance.path_to_string(a, Some(&mut too_small)),
        Err(XrError::SizeInsufficient)
    );

    let mut buf = vec![0u8; needed];
    instance.path_to_string(a, Some(&mut buf)).unwrap();
    assert_eq!(&buf, path.as_bytes());
}

#[test]
fn headless_wait_frame_predicts_monotonically_without_rendering() {
    let rig = Rig::new();
    let instance = create_instance(
        &rig,
        ExtensionSet {
            mnd_headless: true,
            ..Default::default()
        },
    );
    let session = instance
        .create_session(&SessionCreateInfo {
            graphics: GraphicsBinding::Headless,
        })
        .unwrap();
    instance
        .begin_session(session, ViewConfigurationType::PrimaryStereo)
        .unwrap();

    let first = instance.wait_frame(session).unwrap();
    instance.begin_frame(session).unwrap();
    let second = instance.wait_frame(session).unwrap();

    assert!(!first.should_render);
    assert!(!second.should_render);
    assert!(first.predicted_display_time > 0);
    assert!(second.predicted_display_time > first.predicted_display_time);
}

#[test]
fn headless_sessions_require_the_extension() {
    let rig = Rig::new();
    let instance = create_instance(&rig, ExtensionSet::default());
    assert_eq!(
        instance
            .create_session(&SessionCreateInfo {
                graphics: GraphicsBinding::Headless,
            })
            .unwrap_err(),
        XrError::GraphicsDeviceInvalid
    );
}

#[test]
fn suggest_attach_sync_reads_device_state() {
    let h = Harness::new();
    let set = h
        .instance
        .create_action_set(&ActionSetCreateInfo {
            name: "gameplay",
            localized_name: "Gameplay",
            priority: 0,
        })
        .unwrap();
    let left_path = h.instance.string_to_path("/user/hand/left").unwrap();
    let action = h
        .instance
        .create_action(
            set,
            &ActionCreateInfo {
                name: "select",
                localized_name: "Select",
                ty: ActionType::Boolean,
                subaction_paths: &[left_path],
            },
        )
        .unwrap();

    let profile = h
        .instance
        .string_to_path("/interaction_profiles/khr/simple_controller")
        .unwrap();
    let binding = h
        .instance
        .string_to_path("/user/hand/left/input/select/click")
        .unwrap();
    h.instance
        .suggest_interaction_profile_bindings(profile, &[SuggestedBinding { action, binding }])
        .unwrap();
    h.instance
        .attach_session_action_sets(h.session, &[set])
        .unwrap();

    h.begin();
    h.drive_to(true, true);

    h.rig.left.set_bool("select_click", true);
    let active = [ActiveActionSet {
        set,
        subaction: SubactionPath::User,
    }];
    h.instance.sync_actions(h.session, &active).unwrap();

    let state = h
        .instance
        .action_state_bool(h.session, action, SubactionPath::LeftHand)
        .unwrap();
    assert!(state.current_state);
    assert!(state.changed_since_last_sync);
    assert!(state.is_active);

    h.instance.sync_actions(h.session, &active).unwrap();
    let state = h
        .instance
        .action_state_bool(h.session, action, SubactionPath::LeftHand)
        .unwrap();
    assert!(state.current_state);
    assert!(!state.changed_since_last_sync);
}

#[test]
fn projection_layer_validation_rejects_bad_view_counts_and_poses() {
    let h = Harness::new();
    h.begin();
    h.drive_to(true, true);

    let swapchain = h.make_swapchain(false);
    h.cycle_swapchain(swapchain);
    let space = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::Local, Pose::IDENTITY)
        .unwrap();

    let wait = h.instance.wait_frame(h.session).unwrap();
    h.instance.begin_frame(h.session).unwrap();

    let three_views = Layer::Projection {
        space,
        views: vec![projection_view(swapchain, Quat::IDENTITY); 3],
    };
    assert!(matches!(
        h.instance.end_frame(
            h.session,
            &FrameEndInfo {
                display_time: wait.predicted_display_time,
                environment_blend_mode: EnvironmentBlendMode::Opaque,
                layers: &[three_views],
            }
        ),
        Err(XrError::ValidationFailure(_))
    ));

    let bad_quat = Layer::Projection {
        space,
        views: vec![
            projection_view(swapchain, Quat::IDENTITY),
            projection_view(swapchain, Quat::from_xyzw(1.0, 1.0, 1.0, 1.0)),
        ],
    };
    assert_eq!(
        h.instance.end_frame(
            h.session,
            &FrameEndInfo {
                display_time: wait.predicted_display_time,
                environment_blend_mode: EnvironmentBlendMode::Opaque,
                layers: &[bad_quat],
            }
        ),
        Err(XrError::PoseInvalid)
    );

    // The rejected frame is still open; submit it properly.
    let good = Layer::Projection {
        space,
        views: vec![projection_view(swapchain, Quat::IDENTITY); 2],
    };
    h.instance
        .end_frame(
            h.session,
            &FrameEndInfo {
                display_time: wait.predicted_display_time,
                environment_blend_mode: EnvironmentBlendMode::Opaque,
                layers: &[good],
            },
        )
        .unwrap();
    assert_eq!(h.rig.compositor.submitted.lock().unwrap().len(), 1);
    assert_eq!(h.rig.compositor.committed.lock().unwrap().len(), 1);
}

#[test]
fn unsupported_blend_mode_is_rejected() {
    let h = Harness::new();
    h.begin();
    let wait = h.instance.wait_frame(h.session).unwrap();
    h.instance.begin_frame(h.session).unwrap();
    assert_eq!(
        h.instance.end_frame(
            h.session,
            &FrameEndInfo {
                display_time: wait.predicted_display_time,
                environment_blend_mode: EnvironmentBlendMode::AlphaBlend,
                layers: &[],
            }
        ),
        Err(XrError::EnvironmentBlendModeUnsupported)
    );
}

#[test]
fn frame_pacing_enforces_ordering_and_discard() {
    let h = Harness::new();
    h.begin();

    // beginFrame before any waitFrame.
    assert_eq!(
        h.instance.begin_frame(h.session).unwrap_err(),
        XrError::CallOrderInvalid
    );

    h.instance.wait_frame(h.session).unwrap();
    assert_eq!(
        h.instance.begin_frame(h.session).unwrap(),
        FrameBeginOutcome::Started
    );
    h.instance.wait_frame(h.session).unwrap();

    // Second begin without ending the first: the first frame is discarded.
    assert_eq!(
        h.instance.begin_frame(h.session).unwrap(),
        FrameBeginOutcome::Discarded
    );
    assert_eq!(h.rig.compositor.discarded.lock().unwrap().as_slice(), &[1]);

    // A third begin with nothing waited is misuse again.
    assert_eq!(
        h.instance.begin_frame(h.session).unwrap_err(),
        XrError::CallOrderInvalid
    );

    h.instance
        .end_frame(
            h.session,
            &FrameEndInfo {
                display_time: 1,
                environment_blend_mode: EnvironmentBlendMode::Opaque,
                layers: &[],
            },
        )
        .unwrap();
}

#[test]
fn frame_ids_flow_in_order_through_a_pipelined_loop() {
    const FRAMES: i64 = 32;
    let h = Harness::new();
    h.begin();

    let instance = h.instance.clone();
    let session = h.session;
    let waiter = std::thread::spawn(move || {
        for _ in 0..FRAMES {
            instance.wait_frame(session).unwrap();
        }
    });

    for _ in 0..FRAMES {
        // The gate guarantees a waited frame exists by the time begin runs
        // on this thread... once the waiter has gotten that far.
        loop {
            match h.instance.begin_frame(h.session) {
                Ok(FrameBeginOutcome::Started) => break,
                Ok(FrameBeginOutcome::Discarded) => panic!("nothing should be discarded"),
                Err(XrError::CallOrderInvalid) => std::thread::yield_now(),
                Err(other) => panic!("{other}"),
            }
        }
        h.instance
            .end_frame(
                h.session,
                &FrameEndInfo {
                    display_time: 1,
                    environment_blend_mode: EnvironmentBlendMode::Opaque,
                    layers: &[],
                },
            )
            .unwrap();
    }
    waiter.join().unwrap();

    let begun = h.rig.compositor.begun.lock().unwrap().clone();
    let expected: Vec<i64> = (1..=FRAMES).collect();
    assert_eq!(begun, expected);
}

#[test]
fn static_swapchain_allows_exactly_one_cycle() {
    let h = Harness::new();
    let swapchain = h.make_swapchain(true);

    h.instance.acquire_swapchain_image(swapchain).unwrap();
    h.instance
        .wait_swapchain_image(swapchain, 1_000_000_000)
        .unwrap();
    h.instance.release_swapchain_image(swapchain).unwrap();

    assert_eq!(
        h.instance.acquire_swapchain_image(swapchain).unwrap_err(),
        XrError::CallOrderInvalid
    );
}

#[test]
fn swapchain_images_move_through_a_fifo() {
    let h = Harness::new();
    let swapchain = h.make_swapchain(false);

    let first = h.instance.acquire_swapchain_image(swapchain).unwrap();
    let second = h.instance.acquire_swapchain_image(swapchain).unwrap();
    assert_ne!(first, second);

    // Waiting twice without a release is out of order.
    h.instance
        .wait_swapchain_image(swapchain, 1_000_000_000)
        .unwrap();
    assert_eq!(
        h.instance
            .wait_swapchain_image(swapchain, 1_000_000_000)
            .unwrap_err(),
        XrError::CallOrderInvalid
    );
    h.instance.release_swapchain_image(swapchain).unwrap();

    // The second acquired image waits next, in acquire order.
    h.instance
        .wait_swapchain_image(swapchain, 1_000_000_000)
        .unwrap();
    h.instance.release_swapchain_image(swapchain).unwrap();

    let backend = h.rig.compositor.swapchains.lock().unwrap()[0].clone();
    assert_eq!(backend.released.lock().unwrap().as_slice(), &[first, second]);

    // Releasing with nothing waited is out of order.
    assert_eq!(
        h.instance.release_swapchain_image(swapchain).unwrap_err(),
        XrError::CallOrderInvalid
    );
}

#[test]
fn session_lifecycle_walks_the_ladder_in_order() {
    let h = Harness::new();
    assert_eq!(
        h.drain_states(),
        vec![SessionState::Idle, SessionState::Ready]
    );

    // beginSession is only legal from Ready.
    assert_eq!(
        h.instance.end_session(h.session).unwrap_err(),
        XrError::SessionNotStopping
    );
    h.begin();
    assert_eq!(
        h.instance
            .begin_session(h.session, ViewConfigurationType::PrimaryStereo)
            .unwrap_err(),
        XrError::SessionRunning
    );

    assert_eq!(h.drive_to(true, false), vec![
        SessionState::Synchronized,
        SessionState::Visible,
    ]);
    assert_eq!(h.drive_to(true, true), vec![SessionState::Focused]);
    assert_eq!(h.drive_to(true, false), vec![SessionState::Visible]);
    assert_eq!(h.drive_to(false, false), vec![SessionState::Synchronized]);
    assert_eq!(h.drive_to(true, true), vec![
        SessionState::Visible,
        SessionState::Focused,
    ]);

    h.instance.request_exit_session(h.session).unwrap();
    assert_eq!(h.drain_states(), vec![
        SessionState::Visible,
        SessionState::Synchronized,
        SessionState::Stopping,
    ]);

    h.instance.end_session(h.session).unwrap();
    assert_eq!(h.drain_states(), vec![
        SessionState::Idle,
        SessionState::Exiting,
    ]);
    assert!(!h.rig.compositor.session_active());
}

#[test]
fn end_session_requires_stopping_state() {
    let h = Harness::new();
    h.begin();
    h.drive_to(true, false);

    // Hidden is not stopped; ending here is premature.
    h.drive_to(false, false);
    assert_eq!(
        h.instance.end_session(h.session).unwrap_err(),
        XrError::SessionNotStopping
    );

    h.instance.request_exit_session(h.session).unwrap();
    h.instance.end_session(h.session).unwrap();
    let states = h.drain_states();
    assert_eq!(states.last(), Some(&SessionState::Exiting));
}

#[test]
fn destroying_a_session_invalidates_its_descendants() {
    let h = Harness::new();
    let swapchain = h.make_swapchain(false);
    let space = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::Stage, Pose::IDENTITY)
        .unwrap();

    h.instance.destroy_session(h.session).unwrap();
    assert_eq!(
        h.instance.acquire_swapchain_image(swapchain).unwrap_err(),
        XrError::HandleInvalid
    );
    assert_eq!(
        h.instance
            .locate_space(space, space, 1)
            .unwrap_err(),
        XrError::HandleInvalid
    );
    assert_eq!(
        h.instance.begin_frame(h.session).unwrap_err(),
        XrError::HandleInvalid
    );
}

#[test]
fn stale_session_events_are_dropped_on_poll() {
    let h = Harness::new();
    // Idle/Ready events are still queued when the session dies.
    h.instance.destroy_session(h.session).unwrap();
    assert_eq!(h.drain_events(), vec![]);
}

#[test]
fn child_slots_are_bounded() {
    let h = Harness::new();
    let mut result = Ok(());
    for _ in 0..300 {
        result = h
            .instance
            .create_reference_space(h.session, ReferenceSpaceType::Stage, Pose::IDENTITY)
            .map(|_| ());
        if result.is_err() {
            break;
        }
    }
    assert_eq!(result.unwrap_err(), XrError::LimitReached);
}

#[test]
fn locate_space_is_identity_for_matching_reference_spaces() {
    let h = Harness::new();
    let a = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::Stage, Pose::IDENTITY)
        .unwrap();
    let b = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::Stage, Pose::IDENTITY)
        .unwrap();

    let location = h.instance.locate_space(a, b, h.instance.now()).unwrap();
    assert!(location.flags.contains(SpaceLocationFlags::ORIENTATION_VALID));
    assert!(location.flags.contains(SpaceLocationFlags::POSITION_VALID));
    assert_eq!(location.pose, Pose::IDENTITY);
}

#[test]
fn view_space_tracks_the_head_device() {
    let h = Harness::new();
    let head_pose = Pose::new(Quat::from_rotation_y(0.5), Vec3::new(0.1, 1.6, -0.2));
    h.rig.head.set_relation(Relation {
        pose: head_pose,
        ..Relation::IDENTITY
    });

    let view = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::View, Pose::IDENTITY)
        .unwrap();
    let stage = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::Stage, Pose::IDENTITY)
        .unwrap();

    let location = h.instance.locate_space(view, stage, h.instance.now()).unwrap();
    assert!(location.flags.contains(SpaceLocationFlags::POSITION_TRACKED));
    assert!(location.pose.position.abs_diff_eq(head_pose.position, 1e-5));

    // Quaternions survive the round trip normalized.
    assert!((location.pose.orientation.length() - 1.0).abs() < 0.01);
}

#[test]
fn local_space_anchors_to_first_head_pose_yaw_only() {
    let h = Harness::new();
    // Head looking 90 degrees left with some pitch, standing at x=1.
    let orientation = Quat::from_rotation_y(std::f32::consts::FRAC_PI_2) * Quat::from_rotation_x(0.3);
    h.rig.head.set_relation(Relation {
        pose: Pose::new(orientation, Vec3::new(1.0, 1.7, 0.0)),
        ..Relation::IDENTITY
    });

    let local = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::Local, Pose::IDENTITY)
        .unwrap();
    let stage = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::Stage, Pose::IDENTITY)
        .unwrap();

    let location = h.instance.locate_space(local, stage, h.instance.now()).unwrap();
    // The anchor keeps the yaw but drops the pitch.
    assert_eq!(location.pose.orientation.x, 0.0);
    assert_eq!(location.pose.orientation.z, 0.0);
    assert!(location.pose.position.abs_diff_eq(Vec3::new(1.0, 1.7, 0.0), 1e-5));

    // LocalFloor is the same anchor dropped to the stage floor.
    let local_floor = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::LocalFloor, Pose::IDENTITY)
        .unwrap();
    let location = h
        .instance
        .locate_space(local_floor, stage, h.instance.now())
        .unwrap();
    assert_eq!(location.pose.position.y, 0.0);
}

#[test]
fn locate_views_splits_the_ipd_across_eyes() {
    let h = Harness::new();
    let stage = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::Stage, Pose::IDENTITY)
        .unwrap();

    let (flags, views) = h
        .instance
        .locate_views(
            h.session,
            ViewConfigurationType::PrimaryStereo,
            h.instance.now(),
            stage,
        )
        .unwrap();
    assert!(flags.contains(cortexr::session::ViewStateFlags::ORIENTATION_VALID));
    let left = views[0].pose.position;
    let right = views[1].pose.position;
    assert!(left.x < right.x);
    assert!((right.x - left.x - 0.063).abs() < 1e-4);
}

#[test]
fn compositor_loss_marks_the_session_loss_pending() {
    let h = Harness::new();
    h.begin();
    h.drain_events();

    h.rig.compositor.fail_next_wait();
    assert_eq!(
        h.instance.wait_frame(h.session).unwrap_err(),
        XrError::InstanceLost
    );
    assert_eq!(h.drain_states(), vec![SessionState::LossPending]);
}

#[test]
fn overlay_changes_surface_as_main_session_visibility() {
    let h = Harness::new();
    h.begin();
    h.drain_events();
    h.rig
        .compositor
        .push_event(CompositorEvent::OverlayChange { visible: true });
    assert_eq!(
        h.drain_events(),
        vec![Event::MainSessionVisibilityChanged { visible: true }]
    );
}

#[test]
fn action_spaces_follow_their_bound_pose_source() {
    let h = Harness::new();
    let set = h
        .instance
        .create_action_set(&ActionSetCreateInfo {
            name: "hands",
            localized_name: "Hands",
            priority: 0,
        })
        .unwrap();
    let left_path = h.instance.string_to_path("/user/hand/left").unwrap();
    let grip = h
        .instance
        .create_action(
            set,
            &ActionCreateInfo {
                name: "grip",
                localized_name: "Grip",
                ty: ActionType::Pose,
                subaction_paths: &[left_path],
            },
        )
        .unwrap();
    let profile = h
        .instance
        .string_to_path("/interaction_profiles/khr/simple_controller")
        .unwrap();
    let binding = h
        .instance
        .string_to_path("/user/hand/left/input/grip/pose")
        .unwrap();
    h.instance
        .suggest_interaction_profile_bindings(
            profile,
            &[SuggestedBinding {
                action: grip,
                binding,
            }],
        )
        .unwrap();
    h.instance
        .attach_session_action_sets(h.session, &[set])
        .unwrap();

    let space = h
        .instance
        .create_action_space(h.session, grip, SubactionPath::LeftHand, Pose::IDENTITY)
        .unwrap();
    let stage = h
        .instance
        .create_reference_space(h.session, ReferenceSpaceType::Stage, Pose::IDENTITY)
        .unwrap();

    // Nothing bound and active yet: the location carries no flags.
    let location = h.instance.locate_space(space, stage, h.instance.now()).unwrap();
    assert!(location.flags.is_empty());

    let hand = Vec3::new(0.2, 1.0, -0.3);
    h.rig.left.set_pose(
        "grip_pose",
        Relation {
            pose: Pose::from_translation(hand),
            ..Relation::IDENTITY
        },
    );
    let location = h.instance.locate_space(space, stage, h.instance.now()).unwrap();
    assert!(location.flags.contains(SpaceLocationFlags::POSITION_VALID));
    assert!(location.pose.position.abs_diff_eq(hand, 1e-5));

    // The inverse direction loses velocity validity but keeps the pose.
    let location = h.instance.locate_space(stage, space, h.instance.now()).unwrap();
    assert!(location.pose.position.abs_diff_eq(-hand, 1e-5));
    assert!(location.velocity.flags.is_empty());
}

#[test]
fn reset_local_space_announces_a_pending_change() {
    let h = Harness::new();
    h.drain_events();
    h.rig.head.set_relation(Relation {
        pose: Pose::from_translation(Vec3::new(0.0, 1.6, 0.0)),
        ..Relation::IDENTITY
    });

    h.instance.reset_local_space(h.session).unwrap();
    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ReferenceSpaceChangePending {
            reference: ReferenceSpaceType::Local,
            ..
        }
    )));
}

#[test]
fn debug_messengers_filter_and_detach() {
    use cortexr::instance::{DebugMessage, DebugSeverityFlags, DebugTypeFlags};

    let rig = Rig::new();
    let instance = create_instance(
        &rig,
        ExtensionSet {
            ext_debug_utils: true,
            ..Default::default()
        },
    );

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let messenger = instance
        .create_debug_messenger(
            DebugSeverityFlags::WARNING | DebugSeverityFlags::ERROR,
            DebugTypeFlags::GENERAL,
            move |message| sink.lock().unwrap().push(message.message.to_owned()),
        )
        .unwrap();

    let error = DebugMessage {
        severity: DebugSeverityFlags::ERROR,
        ty: DebugTypeFlags::GENERAL,
        message: "device lost",
        function_name: Some("wait_frame"),
    };
    instance.submit_debug_message(&error).unwrap();
    instance
        .submit_debug_message(&DebugMessage {
            severity: DebugSeverityFlags::VERBOSE,
            ..error
        })
        .unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), &["device lost".to_owned()]);

    // Destroying the messenger detaches it from the dispatch list.
    instance.destroy_debug_messenger(messenger).unwrap();
    instance.submit_debug_message(&error).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    // The whole surface is extension gated.
    let ungated = create_instance(&Rig::new(), ExtensionSet::default());
    assert!(matches!(
        ungated.submit_debug_message(&error),
        Err(XrError::ValidationFailure(_))
    ));
}

#[test]
fn instance_destroy_tears_down_the_whole_tree() {
    let h = Harness::new();
    let set = h
        .instance
        .create_action_set(&ActionSetCreateInfo {
            name: "teardown",
            localized_name: "Teardown",
            priority: 0,
        })
        .unwrap();
    let swapchain = h.make_swapchain(false);

    h.instance.destroy().unwrap();
    assert_eq!(
        h.instance.acquire_swapchain_image(swapchain).unwrap_err(),
        XrError::HandleInvalid
    );
    assert_eq!(
        h.instance
            .attach_session_action_sets(h.session, &[set])
            .unwrap_err(),
        XrError::HandleInvalid
    );
    assert_eq!(h.instance.destroy().unwrap_err(), XrError::HandleInvalid);
}
