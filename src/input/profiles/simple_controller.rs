use super::{both_hands, both_hands_output, BindingRow, InteractionProfile};

pub const PROFILE_PATH: &str = "/interaction_profiles/khr/simple_controller";

pub struct SimpleController;

impl InteractionProfile for SimpleController {
    fn profile_path(&self) -> &'static str {
        PROFILE_PATH
    }

    fn rows(&self) -> Vec<BindingRow> {
        let mut rows = Vec::new();
        both_hands(&mut rows, &["input/select/click", "input/select"], "select_click");
        both_hands(&mut rows, &["input/menu/click", "input/menu"], "menu_click");
        both_hands(&mut rows, &["input/grip/pose", "input/grip"], "grip_pose");
        both_hands(&mut rows, &["input/aim/pose", "input/aim"], "aim_pose");
        both_hands_output(&mut rows, &["output/haptic"], "haptic");
        rows
    }
}
