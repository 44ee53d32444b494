use super::{both_hands, both_hands_output, BindingRow, InteractionProfile};

pub const PROFILE_PATH: &str = "/interaction_profiles/valve/index_controller";

pub struct IndexController;

impl InteractionProfile for IndexController {
    fn profile_path(&self) -> &'static str {
        PROFILE_PATH
    }

    fn rows(&self) -> Vec<BindingRow> {
        let mut rows = Vec::new();
        both_hands(&mut rows, &["input/system/click", "input/system"], "system_click");
        both_hands(&mut rows, &["input/a/click", "input/a"], "a_click");
        both_hands(&mut rows, &["input/a/touch"], "a_touch");
        both_hands(&mut rows, &["input/b/click", "input/b"], "b_click");
        both_hands(&mut rows, &["input/b/touch"], "b_touch");
        both_hands(&mut rows, &["input/trigger/value", "input/trigger"], "trigger_value");
        both_hands(&mut rows, &["input/trigger/click"], "trigger_click");
        both_hands(&mut rows, &["input/trigger/touch"], "trigger_touch");
        both_hands(&mut rows, &["input/squeeze/value", "input/squeeze"], "squeeze_value");
        both_hands(&mut rows, &["input/squeeze/force"], "squeeze_force");
        both_hands(
            &mut rows,
            &["input/thumbstick", "input/thumbstick/x", "input/thumbstick/y"],
            "thumbstick",
        );
        both_hands(&mut rows, &["input/thumbstick/click"], "thumbstick_click");
        both_hands(&mut rows, &["input/thumbstick/touch"], "thumbstick_touch");
        both_hands(&mut rows, &["input/trackpad", "input/trackpad/x", "input/trackpad/y"], "trackpad");
        both_hands(&mut rows, &["input/trackpad/force"], "trackpad_force");
        both_hands(&mut rows, &["input/trackpad/touch"], "trackpad_touch");
        both_hands(&mut rows, &["input/grip/pose", "input/grip"], "grip_pose");
        both_hands(&mut rows, &["input/aim/pose", "input/aim"], "aim_pose");
        both_hands_output(&mut rows, &["output/haptic"], "haptic");
        rows
    }
}
