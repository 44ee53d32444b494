//! Binding-engine scenarios: suggest, attach, sync, state queries, and
//! haptics against the fake devices.

use cortexr::compositor::CompositorEvent;
use cortexr::device::HapticEvent;
use cortexr::events::Event;
use cortexr::input::profiles::{index_controller, simple_controller};
use cortexr::input::{
    ActionCreateInfo, ActionSetCreateInfo, ActionType, ActiveActionSet, SubactionPath,
    SuggestedBinding, SyncResult,
};
use cortexr::input::{Action, ActionSet};
use cortexr::session::{GraphicsBinding, Session, SessionCreateInfo, SessionState};
use cortexr::system::ViewConfigurationType;
use cortexr::{
    ApplicationInfo, ExtensionSet, Handle, Instance, InstanceCreateInfo, XrError,
};
use fakedev::Rig;
use glam::Vec2;
use std::sync::Arc;

struct Fixture {
    instance: Arc<Instance>,
    session: Handle<Session>,
    rig: Rig,
}

impl Fixture {
    fn new() -> Self {
        let rig = Rig::new();
        let instance = Instance::create(
            &InstanceCreateInfo {
                application_info: ApplicationInfo {
                    application_name: "input-tests".to_owned(),
                    ..Default::default()
                },
                enabled_extensions: ExtensionSet::default(),
            },
            &rig.prober,
            rig.factory.clone(),
        )
        .unwrap();
        let session = instance
            .create_session(&SessionCreateInfo {
                graphics: GraphicsBinding::Native,
            })
            .unwrap();
        Self {
            instance,
            session,
            rig,
        }
    }

    /// Begins the session and drives it to Focused through compositor
    /// events.
    fn focus(&self) {
        self.instance
            .begin_session(self.session, ViewConfigurationType::PrimaryStereo)
            .unwrap();
        self.rig.compositor.push_event(CompositorEvent::StateChange {
            visible: true,
            focused: true,
        });
        let mut last_state = None;
        while let Some(event) = self.instance.poll_event() {
            if let Event::SessionStateChanged { state, .. } = event {
                last_state = Some(state);
            }
        }
        assert_eq!(last_state, Some(SessionState::Focused));
    }

    fn create_set(&self, name: &str) -> Handle<ActionSet> {
        self.instance
            .create_action_set(&ActionSetCreateInfo {
                name,
                localized_name: name,
                priority: 0,
            })
            .unwrap()
    }

    fn create_action(
        &self,
        set: Handle<ActionSet>,
        name: &str,
        ty: ActionType,
        subactions: &[SubactionPath],
    ) -> Handle<Action> {
        let paths: Vec<_> = subactions
            .iter()
            .map(|s| self.instance.string_to_path(s.path_str()).unwrap())
            .collect();
        self.instance
            .create_action(
                set,
                &ActionCreateInfo {
                    name,
                    localized_name: name,
                    ty,
                    subaction_paths: &paths,
                },
            )
            .unwrap()
    }

    fn suggest(&self, profile: &str, bindings: &[(Handle<Action>, &str)]) {
        let profile = self.instance.string_to_path(profile).unwrap();
        let suggested: Vec<_> = bindings
            .iter()
            .map(|(action, path)| SuggestedBinding {
                action: *action,
                binding: self.instance.string_to_path(path).unwrap(),
            })
            .collect();
        self.instance
            .suggest_interaction_profile_bindings(profile, &suggested)
            .unwrap();
    }

    fn attach(&self, sets: &[Handle<ActionSet>]) {
        self.instance
            .attach_session_action_sets(self.session, sets)
            .unwrap();
    }

    fn sync(&self, sets: &[Handle<ActionSet>]) -> SyncResult {
        let active: Vec<_> = sets
            .iter()
            .map(|set| ActiveActionSet {
                set: *set,
                subaction: SubactionPath::User,
            })
            .collect();
        self.instance.sync_actions(self.session, &active).unwrap()
    }

    #[track_caller]
    fn verify_bool(
        &self,
        action: Handle<Action>,
        subaction: SubactionPath,
        current: bool,
        changed: bool,
        active: bool,
    ) {
        let state = self
            .instance
            .action_state_bool(self.session, action, subaction)
            .unwrap();
        assert_eq!(state.current_state, current, "current_state");
        assert_eq!(state.changed_since_last_sync, changed, "changed_since_last_sync");
        assert_eq!(state.is_active, active, "is_active");
    }

    fn drain_events(&self) -> Vec<Event> {
        std::iter::from_fn(|| self.instance.poll_event()).collect()
    }
}

#[test]
fn bool_action_reports_value_and_change_flag() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let select = f.create_action(
        set,
        "select",
        ActionType::Boolean,
        &[SubactionPath::LeftHand, SubactionPath::RightHand],
    );
    f.suggest(
        simple_controller::PROFILE_PATH,
        &[(select, "/user/hand/left/input/select/click")],
    );
    f.attach(&[set]);
    f.focus();

    f.rig.left.set_bool("select_click", true);
    f.sync(&[set]);
    f.verify_bool(select, SubactionPath::LeftHand, true, true, true);

    // Same value again: no change reported.
    f.sync(&[set]);
    f.verify_bool(select, SubactionPath::LeftHand, true, false, true);

    f.rig.left.set_bool("select_click", false);
    f.sync(&[set]);
    f.verify_bool(select, SubactionPath::LeftHand, false, true, true);
}

#[test]
fn deactivated_sources_go_inactive_without_reporting_a_change() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let select = f.create_action(set, "select", ActionType::Boolean, &[SubactionPath::LeftHand]);
    f.suggest(
        simple_controller::PROFILE_PATH,
        &[(select, "/user/hand/left/input/select/click")],
    );
    f.attach(&[set]);
    f.focus();

    f.rig.left.set_bool("select_click", true);
    f.sync(&[set]);
    f.verify_bool(select, SubactionPath::LeftHand, true, true, true);

    // The source drops out entirely: the state resets to the default value
    // but an inactive action never reports a change.
    f.rig.left.deactivate("select_click");
    f.sync(&[set]);
    f.verify_bool(select, SubactionPath::LeftHand, false, false, false);
    f.sync(&[set]);
    f.verify_bool(select, SubactionPath::LeftHand, false, false, false);

    // Back online: the first active sync compares against the default the
    // deactivation left behind.
    f.rig.left.set_bool("select_click", true);
    f.sync(&[set]);
    f.verify_bool(select, SubactionPath::LeftHand, true, true, true);
}

#[test]
fn bool_aggregation_is_logical_or() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let action = f.create_action(set, "either", ActionType::Boolean, &[SubactionPath::LeftHand]);
    // Two bindings on the same device: both feed the same cache.
    f.suggest(
        simple_controller::PROFILE_PATH,
        &[
            (action, "/user/hand/left/input/select/click"),
            (action, "/user/hand/left/input/menu/click"),
        ],
    );
    f.attach(&[set]);
    f.focus();

    f.rig.left.set_bool("select_click", false);
    f.rig.left.set_bool("menu_click", true);
    f.sync(&[set]);
    f.verify_bool(action, SubactionPath::LeftHand, true, true, true);

    f.rig.left.set_bool("menu_click", false);
    f.sync(&[set]);
    f.verify_bool(action, SubactionPath::LeftHand, false, true, true);
}

#[test]
fn float_aggregation_picks_largest_magnitude() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let squeeze = f.create_action(set, "squeeze", ActionType::Float, &[SubactionPath::LeftHand]);
    f.suggest(
        index_controller::PROFILE_PATH,
        &[
            (squeeze, "/user/hand/left/input/trigger/value"),
            (squeeze, "/user/hand/left/input/squeeze/value"),
        ],
    );
    f.attach(&[set]);
    f.focus();

    f.rig.left.set_float("trigger_value", 0.3);
    f.rig.left.set_float("squeeze_value", -0.8);
    f.sync(&[set]);
    let state = f
        .instance
        .action_state_float(f.session, squeeze, SubactionPath::LeftHand)
        .unwrap();
    assert!(state.is_active);
    assert_eq!(state.current_state, -0.8);
}

#[test]
fn vector2_aggregation_picks_largest_vector() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let stick = f.create_action(set, "move", ActionType::Vector2, &[SubactionPath::RightHand]);
    f.suggest(
        index_controller::PROFILE_PATH,
        &[
            (stick, "/user/hand/right/input/thumbstick"),
            (stick, "/user/hand/right/input/trackpad"),
        ],
    );
    f.attach(&[set]);
    f.focus();

    f.rig.right.set_vec2("thumbstick", Vec2::new(0.1, 0.1));
    f.rig.right.set_vec2("trackpad", Vec2::new(-0.7, 0.2));
    f.sync(&[set]);
    let state = f
        .instance
        .action_state_vector2(f.session, stick, SubactionPath::RightHand)
        .unwrap();
    assert_eq!(state.current_state, Vec2::new(-0.7, 0.2));
}

#[test]
fn unfiltered_selector_aggregates_both_hands() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let select = f.create_action(
        set,
        "select",
        ActionType::Boolean,
        &[SubactionPath::LeftHand, SubactionPath::RightHand],
    );
    f.suggest(
        simple_controller::PROFILE_PATH,
        &[
            (select, "/user/hand/left/input/select/click"),
            (select, "/user/hand/right/input/select/click"),
        ],
    );
    f.attach(&[set]);
    f.focus();

    f.rig.right.set_bool("select_click", true);
    f.rig.left.set_bool("select_click", false);
    f.sync(&[set]);
    f.verify_bool(select, SubactionPath::LeftHand, false, false, true);
    f.verify_bool(select, SubactionPath::RightHand, true, true, true);
    f.verify_bool(select, SubactionPath::User, true, true, true);
}

#[test]
fn sync_without_focus_deactivates_everything() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let select = f.create_action(set, "select", ActionType::Boolean, &[SubactionPath::LeftHand]);
    f.suggest(
        simple_controller::PROFILE_PATH,
        &[(select, "/user/hand/left/input/select/click")],
    );
    f.attach(&[set]);

    // Begun but never made visible: not Focused.
    f.instance
        .begin_session(f.session, ViewConfigurationType::PrimaryStereo)
        .unwrap();
    f.rig.left.set_bool("select_click", true);
    let result = f.sync(&[set]);
    assert_eq!(result, SyncResult::NotFocused);
    f.verify_bool(select, SubactionPath::LeftHand, false, false, false);
}

#[test]
fn sync_requires_attachment() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    f.instance
        .begin_session(f.session, ViewConfigurationType::PrimaryStereo)
        .unwrap();
    let result = f.instance.sync_actions(
        f.session,
        &[ActiveActionSet {
            set,
            subaction: SubactionPath::User,
        }],
    );
    assert_eq!(result, Err(XrError::ActionsetNotAttached));
}

#[test]
fn attach_freezes_action_sets() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    f.create_action(set, "select", ActionType::Boolean, &[]);
    f.attach(&[set]);

    let err = f.instance.create_action(
        set,
        &ActionCreateInfo {
            name: "late",
            localized_name: "late",
            ty: ActionType::Boolean,
            subaction_paths: &[],
        },
    );
    assert_eq!(err.unwrap_err(), XrError::ActionsetsAlreadyAttached);

    let err = f
        .instance
        .attach_session_action_sets(f.session, &[set])
        .unwrap_err();
    assert_eq!(err, XrError::ActionsetsAlreadyAttached);
}

#[test]
fn action_names_are_validated_and_unique() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    f.create_action(set, "select", ActionType::Boolean, &[]);

    let dup = f.instance.create_action(
        set,
        &ActionCreateInfo {
            name: "select",
            localized_name: "Select",
            ty: ActionType::Float,
            subaction_paths: &[],
        },
    );
    assert_eq!(dup.unwrap_err(), XrError::NameDuplicated);

    let bad = f.instance.create_action(
        set,
        &ActionCreateInfo {
            name: "Bad Name",
            localized_name: "Bad",
            ty: ActionType::Boolean,
            subaction_paths: &[],
        },
    );
    assert_eq!(bad.unwrap_err(), XrError::NameInvalid);

    let dup_set = f.instance.create_action_set(&ActionSetCreateInfo {
        name: "gameplay",
        localized_name: "Gameplay",
        priority: 0,
    });
    assert_eq!(dup_set.unwrap_err(), XrError::NameDuplicated);
}

#[test]
fn device_preference_selects_best_scoring_profile() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let select = f.create_action(set, "select", ActionType::Boolean, &[SubactionPath::LeftHand]);
    let trigger = f.create_action(set, "fire", ActionType::Float, &[SubactionPath::LeftHand]);

    f.suggest(
        simple_controller::PROFILE_PATH,
        &[(select, "/user/hand/left/input/select/click")],
    );
    f.suggest(
        index_controller::PROFILE_PATH,
        &[
            (select, "/user/hand/left/input/a/click"),
            (trigger, "/user/hand/left/input/trigger/value"),
        ],
    );
    f.attach(&[set]);

    // The left device is an Index controller and the index profile scored
    // two actions against simple's one.
    let left_path = f.instance.string_to_path("/user/hand/left").unwrap();
    let bound = f
        .instance
        .current_interaction_profile(f.session, left_path)
        .unwrap();
    let expected = f
        .instance
        .string_to_path(index_controller::PROFILE_PATH)
        .unwrap();
    assert_eq!(bound, expected);

    assert!(f
        .drain_events()
        .iter()
        .any(|e| matches!(e, Event::InteractionProfileChanged { session } if *session == f.session)));
}

#[test]
fn late_suggest_rebinds_on_next_sync() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let select = f.create_action(set, "select", ActionType::Boolean, &[SubactionPath::LeftHand]);
    f.suggest(
        simple_controller::PROFILE_PATH,
        &[(select, "/user/hand/left/input/select/click")],
    );
    f.attach(&[set]);
    f.focus();
    f.drain_events();

    // Re-suggest after attach: picked up by the generation check on sync.
    f.suggest(
        simple_controller::PROFILE_PATH,
        &[(select, "/user/hand/left/input/menu/click")],
    );
    f.rig.left.set_bool("menu_click", true);
    f.sync(&[set]);
    f.verify_bool(select, SubactionPath::LeftHand, true, true, true);
}

#[test]
fn haptic_feedback_reaches_the_device_and_expires() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let rumble = f.create_action(set, "rumble", ActionType::Haptic, &[SubactionPath::LeftHand]);
    f.suggest(
        simple_controller::PROFILE_PATH,
        &[(rumble, "/user/hand/left/output/haptic")],
    );
    f.attach(&[set]);
    f.focus();

    f.instance
        .apply_haptic_feedback(
            f.session,
            rumble,
            SubactionPath::LeftHand,
            &HapticEvent {
                duration: 1,
                frequency: 160.0,
                amplitude: 0.75,
            },
        )
        .unwrap();
    let events = f.rig.left.haptic_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "haptic");
    assert_eq!(events[0].1.amplitude, 0.75);

    // The clamped deadline passes, and the next sync sends the stop.
    std::thread::sleep(std::time::Duration::from_millis(5));
    f.sync(&[set]);
    assert_eq!(f.rig.left.stop_events(), vec!["haptic".to_owned()]);

    f.instance
        .apply_haptic_feedback(
            f.session,
            rumble,
            SubactionPath::LeftHand,
            &HapticEvent {
                duration: 1_000_000_000,
                frequency: 160.0,
                amplitude: 0.5,
            },
        )
        .unwrap();
    f.instance
        .stop_haptic_feedback(f.session, rumble, SubactionPath::LeftHand)
        .unwrap();
    assert_eq!(f.rig.left.stop_events().len(), 2);
}

#[test]
fn wrong_type_and_undeclared_subaction_are_rejected() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let select = f.create_action(set, "select", ActionType::Boolean, &[SubactionPath::LeftHand]);
    f.suggest(
        simple_controller::PROFILE_PATH,
        &[(select, "/user/hand/left/input/select/click")],
    );
    f.attach(&[set]);

    assert_eq!(
        f.instance
            .action_state_float(f.session, select, SubactionPath::LeftHand)
            .unwrap_err(),
        XrError::ActionTypeMismatch
    );
    assert_eq!(
        f.instance
            .action_state_bool(f.session, select, SubactionPath::RightHand)
            .unwrap_err(),
        XrError::PathUnsupported
    );
}

#[test]
fn suggest_rejects_unknown_profiles_and_empty_lists() {
    let f = Fixture::new();
    let set = f.create_set("gameplay");
    let select = f.create_action(set, "select", ActionType::Boolean, &[]);
    let path = f
        .instance
        .string_to_path("/user/hand/left/input/select/click")
        .unwrap();

    let unknown = f
        .instance
        .string_to_path("/interaction_profiles/nobody/nothing")
        .unwrap();
    assert_eq!(
        f.instance
            .suggest_interaction_profile_bindings(
                unknown,
                &[SuggestedBinding {
                    action: select,
                    binding: path,
                }]
            )
            .unwrap_err(),
        XrError::PathUnsupported
    );

    let profile = f
        .instance
        .string_to_path(simple_controller::PROFILE_PATH)
        .unwrap();
    assert_eq!(
        f.instance
            .suggest_interaction_profile_bindings(profile, &[])
            .unwrap_err(),
        XrError::ValidationFailure("no suggested bindings")
    );
}
