use super::{both_hands, both_hands_output, BindingRow, InteractionProfile};

pub const PROFILE_PATH: &str = "/interaction_profiles/htc/vive_controller";

pub struct ViveWands;

impl InteractionProfile for ViveWands {
    fn profile_path(&self) -> &'static str {
        PROFILE_PATH
    }

    fn rows(&self) -> Vec<BindingRow> {
        let mut rows = Vec::new();
        both_hands(&mut rows, &["input/system/click", "input/system"], "system_click");
        both_hands(&mut rows, &["input/squeeze/click", "input/squeeze"], "squeeze_click");
        both_hands(&mut rows, &["input/menu/click", "input/menu"], "menu_click");
        both_hands(&mut rows, &["input/trigger/value", "input/trigger"], "trigger_value");
        both_hands(&mut rows, &["input/trigger/click"], "trigger_click");
        both_hands(&mut rows, &["input/trackpad", "input/trackpad/x", "input/trackpad/y"], "trackpad");
        both_hands(&mut rows, &["input/trackpad/click"], "trackpad_click");
        both_hands(&mut rows, &["input/trackpad/touch"], "trackpad_touch");
        both_hands(&mut rows, &["input/grip/pose", "input/grip"], "grip_pose");
        both_hands(&mut rows, &["input/aim/pose", "input/aim"], "aim_pose");
        both_hands_output(&mut rows, &["output/haptic"], "haptic");
        rows
    }
}
