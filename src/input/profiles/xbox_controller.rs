use super::{BindingRow, InteractionProfile};
use crate::input::SubactionPath;

pub const PROFILE_PATH: &str = "/interaction_profiles/microsoft/xbox_controller";

pub struct XboxController;

impl InteractionProfile for XboxController {
    fn profile_path(&self) -> &'static str {
        PROFILE_PATH
    }

    fn rows(&self) -> Vec<BindingRow> {
        const PAD: SubactionPath = SubactionPath::Gamepad;
        vec![
            BindingRow::input(PAD, &["input/menu/click", "input/menu"], "menu_click"),
            BindingRow::input(PAD, &["input/view/click", "input/view"], "view_click"),
            BindingRow::input(PAD, &["input/a/click", "input/a"], "a_click"),
            BindingRow::input(PAD, &["input/b/click", "input/b"], "b_click"),
            BindingRow::input(PAD, &["input/x/click", "input/x"], "x_click"),
            BindingRow::input(PAD, &["input/y/click", "input/y"], "y_click"),
            BindingRow::input(PAD, &["input/dpad_up/click"], "dpad_up"),
            BindingRow::input(PAD, &["input/dpad_down/click"], "dpad_down"),
            BindingRow::input(PAD, &["input/dpad_left/click"], "dpad_left"),
            BindingRow::input(PAD, &["input/dpad_right/click"], "dpad_right"),
            BindingRow::input(PAD, &["input/shoulder_left/click"], "shoulder_left"),
            BindingRow::input(PAD, &["input/shoulder_right/click"], "shoulder_right"),
            BindingRow::input(
                PAD,
                &["input/trigger_left/value", "input/trigger_left"],
                "trigger_left",
            ),
            BindingRow::input(
                PAD,
                &["input/trigger_right/value", "input/trigger_right"],
                "trigger_right",
            ),
            BindingRow::input(
                PAD,
                &[
                    "input/thumbstick_left",
                    "input/thumbstick_left/x",
                    "input/thumbstick_left/y",
                ],
                "thumbstick_left",
            ),
            BindingRow::input(PAD, &["input/thumbstick_left/click"], "thumbstick_left_click"),
            BindingRow::input(
                PAD,
                &[
                    "input/thumbstick_right",
                    "input/thumbstick_right/x",
                    "input/thumbstick_right/y",
                ],
                "thumbstick_right",
            ),
            BindingRow::input(PAD, &["input/thumbstick_right/click"], "thumbstick_right_click"),
            BindingRow::output(PAD, &["output/haptic_left"], "haptic_left"),
            BindingRow::output(PAD, &["output/haptic_right"], "haptic_right"),
        ]
    }
}
