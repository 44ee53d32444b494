pub mod index_controller;
pub mod oculus_touch;
pub mod simple_controller;
pub mod vive_controller;
pub mod xbox_controller;

use super::SubactionPath;
use index_controller::IndexController;
use oculus_touch::Touch;
use simple_controller::SimpleController;
use vive_controller::ViveWands;
use xbox_controller::XboxController;

/// A shipped interaction-profile template: the canonical description of how
/// one controller model exposes inputs and outputs.
pub trait InteractionProfile: Sync + Send {
    fn profile_path(&self) -> &'static str;

    /// The profile's binding rows. Each row covers one component on one
    /// sub-action path: the paths applications may suggest against, the
    /// device inputs they read, and the device outputs they drive.
    fn rows(&self) -> Vec<BindingRow>;
}

pub struct BindingRow {
    pub subaction: SubactionPath,
    /// Path suffixes under the sub-action path, most specific first.
    pub sub_paths: Vec<&'static str>,
    pub inputs: Vec<&'static str>,
    pub outputs: Vec<&'static str>,
}

impl BindingRow {
    pub fn input(subaction: SubactionPath, sub_paths: &[&'static str], input: &'static str) -> Self {
        Self {
            subaction,
            sub_paths: sub_paths.to_vec(),
            inputs: vec![input],
            outputs: Vec::new(),
        }
    }

    pub fn output(
        subaction: SubactionPath,
        sub_paths: &[&'static str],
        output: &'static str,
    ) -> Self {
        Self {
            subaction,
            sub_paths: sub_paths.to_vec(),
            inputs: Vec::new(),
            outputs: vec![output],
        }
    }
}

/// Pushes the same input row for both hands.
pub(super) fn both_hands(rows: &mut Vec<BindingRow>, sub_paths: &[&'static str], input: &'static str) {
    rows.push(BindingRow::input(SubactionPath::LeftHand, sub_paths, input));
    rows.push(BindingRow::input(SubactionPath::RightHand, sub_paths, input));
}

pub(super) fn both_hands_output(
    rows: &mut Vec<BindingRow>,
    sub_paths: &[&'static str],
    output: &'static str,
) {
    rows.push(BindingRow::output(SubactionPath::LeftHand, sub_paths, output));
    rows.push(BindingRow::output(SubactionPath::RightHand, sub_paths, output));
}

pub struct Profiles {
    list: &'static [&'static dyn InteractionProfile],
}

impl Profiles {
    #[inline]
    pub fn get() -> &'static Self {
        // Add supported interaction profiles here.
        static P: Profiles = Profiles {
            list: &[
                &SimpleController,
                &ViveWands,
                &Touch,
                &IndexController,
                &XboxController,
            ],
        };
        &P
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'static dyn InteractionProfile> {
        self.list.iter().copied()
    }

    pub fn profile_from_path(&self, path: &str) -> Option<&'static dyn InteractionProfile> {
        self.list
            .iter()
            .find_map(|p| (p.profile_path() == path).then_some(*p))
    }
}

/// Which profiles a device prefers, best match first. Scoring against the
/// suggested bindings picks among these; unknown devices fall back to
/// trying everything hand-shaped.
pub(super) fn preferred_profiles(device_name: &str) -> &'static [&'static str] {
    if device_name.contains("Index") || device_name.contains("Knuckles") {
        &[
            index_controller::PROFILE_PATH,
            simple_controller::PROFILE_PATH,
        ]
    } else if device_name.contains("Touch") || device_name.contains("Quest") {
        &[oculus_touch::PROFILE_PATH, simple_controller::PROFILE_PATH]
    } else if device_name.contains("Vive") {
        &[
            vive_controller::PROFILE_PATH,
            simple_controller::PROFILE_PATH,
        ]
    } else if device_name.contains("Xbox") || device_name.contains("Gamepad") {
        &[xbox_controller::PROFILE_PATH]
    } else {
        &[
            simple_controller::PROFILE_PATH,
            vive_controller::PROFILE_PATH,
            oculus_touch::PROFILE_PATH,
            index_controller::PROFILE_PATH,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_paths_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for profile in Profiles::get().iter() {
            assert!(
                seen.insert(profile.profile_path()),
                "duplicate profile path {}",
                profile.profile_path()
            );
        }
    }

    #[test]
    fn every_row_names_an_input_or_output() {
        for profile in Profiles::get().iter() {
            for row in profile.rows() {
                assert!(
                    !row.sub_paths.is_empty(),
                    "{}: row without sub paths",
                    profile.profile_path()
                );
                assert!(
                    !(row.inputs.is_empty() && row.outputs.is_empty()),
                    "{}: row with neither inputs nor outputs",
                    profile.profile_path()
                );
            }
        }
    }

    #[test]
    fn preference_table_only_names_shipped_profiles() {
        for name in ["Valve Index", "Oculus Touch", "Vive Wand", "Xbox Gamepad", "Unknown"] {
            for path in preferred_profiles(name) {
                assert!(
                    Profiles::get().profile_from_path(path).is_some(),
                    "{path} is not shipped"
                );
            }
        }
    }
}
