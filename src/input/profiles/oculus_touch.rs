use super::{both_hands, both_hands_output, BindingRow, InteractionProfile};
use crate::input::SubactionPath;

pub const PROFILE_PATH: &str = "/interaction_profiles/oculus/touch_controller";

pub struct Touch;

impl InteractionProfile for Touch {
    fn profile_path(&self) -> &'static str {
        PROFILE_PATH
    }

    fn rows(&self) -> Vec<BindingRow> {
        let mut rows = vec![
            // The face buttons differ between the two controllers.
            BindingRow::input(SubactionPath::LeftHand, &["input/x/click"], "x_click"),
            BindingRow::input(SubactionPath::LeftHand, &["input/x/touch"], "x_touch"),
            BindingRow::input(SubactionPath::LeftHand, &["input/y/click"], "y_click"),
            BindingRow::input(SubactionPath::LeftHand, &["input/y/touch"], "y_touch"),
            BindingRow::input(SubactionPath::LeftHand, &["input/menu/click"], "menu_click"),
            BindingRow::input(SubactionPath::RightHand, &["input/a/click"], "a_click"),
            BindingRow::input(SubactionPath::RightHand, &["input/a/touch"], "a_touch"),
            BindingRow::input(SubactionPath::RightHand, &["input/b/click"], "b_click"),
            BindingRow::input(SubactionPath::RightHand, &["input/b/touch"], "b_touch"),
            BindingRow::input(SubactionPath::RightHand, &["input/system/click"], "system_click"),
        ];
        both_hands(&mut rows, &["input/squeeze/value", "input/squeeze"], "squeeze_value");
        both_hands(&mut rows, &["input/trigger/value", "input/trigger"], "trigger_value");
        both_hands(&mut rows, &["input/trigger/touch"], "trigger_touch");
        both_hands(
            &mut rows,
            &["input/thumbstick", "input/thumbstick/x", "input/thumbstick/y"],
            "thumbstick",
        );
        both_hands(&mut rows, &["input/thumbstick/click"], "thumbstick_click");
        both_hands(&mut rows, &["input/thumbstick/touch"], "thumbstick_touch");
        both_hands(&mut rows, &["input/grip/pose", "input/grip"], "grip_pose");
        both_hands(&mut rows, &["input/aim/pose", "input/aim"], "aim_pose");
        both_hands_output(&mut rows, &["output/haptic"], "haptic");
        rows
    }
}
