//! Canonical humanoid bone slots and the classifier that assigns them.

pub mod classify;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declares the slot enum, its wire names and [`ALL_BONES`] from one list.
/// The serde name and [`HumanoidBone::as_str`] are the same string.
macro_rules! humanoid_bones {
    ($($variant:ident => $name:literal,)*) => {
        /// Canonical humanoid skeleton slot, named after the VRM 0.x humanoid table.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum HumanoidBone {
            $(#[serde(rename = $name)] $variant,)*
        }

        pub const ALL_BONES: [HumanoidBone; 55] = [$(HumanoidBone::$variant),*];

        impl HumanoidBone {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(HumanoidBone::$variant => $name,)*
                }
            }
        }
    };
}

humanoid_bones! {
    Hips => "hips",
    Spine => "spine",
    Chest => "chest",
    UpperChest => "upperChest",
    Neck => "neck",
    Head => "head",
    LeftEye => "leftEye",
    RightEye => "rightEye",
    Jaw => "jaw",
    LeftShoulder => "leftShoulder",
    LeftUpperArm => "leftUpperArm",
    LeftLowerArm => "leftLowerArm",
    LeftHand => "leftHand",
    RightShoulder => "rightShoulder",
    RightUpperArm => "rightUpperArm",
    RightLowerArm => "rightLowerArm",
    RightHand => "rightHand",
    LeftUpperLeg => "leftUpperLeg",
    LeftLowerLeg => "leftLowerLeg",
    LeftFoot => "leftFoot",
    LeftToes => "leftToes",
    RightUpperLeg => "rightUpperLeg",
    RightLowerLeg => "rightLowerLeg",
    RightFoot => "rightFoot",
    RightToes => "rightToes",
    LeftThumbProximal => "leftThumbProximal",
    LeftThumbIntermediate => "leftThumbIntermediate",
    LeftThumbDistal => "leftThumbDistal",
    LeftIndexProximal => "leftIndexProximal",
    LeftIndexIntermediate => "leftIndexIntermediate",
    LeftIndexDistal => "leftIndexDistal",
    LeftMiddleProximal => "leftMiddleProximal",
    LeftMiddleIntermediate => "leftMiddleIntermediate",
    LeftMiddleDistal => "leftMiddleDistal",
    LeftRingProximal => "leftRingProximal",
    LeftRingIntermediate => "leftRingIntermediate",
    LeftRingDistal => "leftRingDistal",
    LeftLittleProximal => "leftLittleProximal",
    LeftLittleIntermediate => "leftLittleIntermediate",
    LeftLittleDistal => "leftLittleDistal",
    RightThumbProximal => "rightThumbProximal",
    RightThumbIntermediate => "rightThumbIntermediate",
    RightThumbDistal => "rightThumbDistal",
    RightIndexProximal => "rightIndexProximal",
    RightIndexIntermediate => "rightIndexIntermediate",
    RightIndexDistal => "rightIndexDistal",
    RightMiddleProximal => "rightMiddleProximal",
    RightMiddleIntermediate => "rightMiddleIntermediate",
    RightMiddleDistal => "rightMiddleDistal",
    RightRingProximal => "rightRingProximal",
    RightRingIntermediate => "rightRingIntermediate",
    RightRingDistal => "rightRingDistal",
    RightLittleProximal => "rightLittleProximal",
    RightLittleIntermediate => "rightLittleIntermediate",
    RightLittleDistal => "rightLittleDistal",
}

use HumanoidBone::*;

// ─── Slot tables ──────────────────────────────────────────────────────────────

/// Slots a usable humanoid must map. Absence is reported, never fatal.
pub const REQUIRED_BONES: [HumanoidBone; 15] = [
    Hips,
    Spine,
    Head,
    LeftUpperArm,
    LeftLowerArm,
    LeftHand,
    RightUpperArm,
    RightLowerArm,
    RightHand,
    LeftUpperLeg,
    LeftLowerLeg,
    LeftFoot,
    RightUpperLeg,
    RightLowerLeg,
    RightFoot,
];

/// VRM 1.0 renamed the thumb chain one segment down.
const VRM1_THUMB_NAMES: [(&str, HumanoidBone); 6] = [
    ("leftThumbMetacarpal", LeftThumbProximal),
    ("leftThumbProximal", LeftThumbIntermediate),
    ("leftThumbDistal", LeftThumbDistal),
    ("rightThumbMetacarpal", RightThumbProximal),
    ("rightThumbProximal", RightThumbIntermediate),
    ("rightThumbDistal", RightThumbDistal),
];

impl HumanoidBone {
    /// Looks up a VRM 0.x `humanBones[].bone` value.
    pub fn from_vrm0_name(name: &str) -> Option<Self> {
        ALL_BONES.iter().copied().find(|bone| bone.as_str() == name)
    }

    /// Looks up a VRM 1.0 `humanBones` key.
    pub fn from_vrm1_name(name: &str) -> Option<Self> {
        if let Some((_, bone)) = VRM1_THUMB_NAMES.iter().find(|(key, _)| *key == name) {
            return Some(*bone);
        }
        match Self::from_vrm0_name(name)? {
            // VRM 1.0 has no thumb intermediate; its thumbs are handled above.
            LeftThumbIntermediate | RightThumbIntermediate => None,
            bone => Some(bone),
        }
    }
}

impl fmt::Display for HumanoidBone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
