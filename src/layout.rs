//! Semantic roles of network inputs and outputs.
//!
//! A [`BodyLayout`] tells the genome builders and the domain-specific
//! operators which inputs carry the gait phase and torso angle, and which
//! outputs drive legs, hips and mirrored joint pairs.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Input and output indices of the six-joint biped.
pub mod biped {
    /// Actuated joints in declared output order.
    pub const JOINTS: [&str; 6] = [
        "left_hip",
        "left_knee",
        "left_ankle",
        "right_hip",
        "right_knee",
        "right_ankle",
    ];
    /// Number of actuated joints.
    pub const JOINT_COUNT: usize = JOINTS.len();

    /// First joint-angle input; angles occupy `JOINT_COUNT` slots.
    pub const ANGLE_BASE: usize = 0;
    /// First joint-velocity input; velocities occupy `JOINT_COUNT` slots.
    pub const VELOCITY_BASE: usize = JOINT_COUNT;
    pub const TORSO_TILT: usize = 2 * JOINT_COUNT;
    pub const TORSO_SPIN: usize = TORSO_TILT + 1;
    pub const LEFT_FOOT_CONTACT: usize = TORSO_TILT + 2;
    pub const RIGHT_FOOT_CONTACT: usize = TORSO_TILT + 3;
    /// Centre-of-mass height relative to standing height.
    pub const COM_HEIGHT: usize = TORSO_TILT + 4;
    /// Centre-of-mass forward velocity relative to the target speed.
    pub const COM_VELOCITY: usize = TORSO_TILT + 5;
    pub const PHASE_SIN: usize = TORSO_TILT + 6;
    pub const PHASE_COS: usize = TORSO_TILT + 7;
    /// Total number of inputs.
    pub const INPUT_COUNT: usize = PHASE_COS + 1;

    pub const LEFT_HIP: usize = 0;
    pub const LEFT_KNEE: usize = 1;
    pub const LEFT_ANKLE: usize = 2;
    pub const RIGHT_HIP: usize = 3;
    pub const RIGHT_KNEE: usize = 4;
    pub const RIGHT_ANKLE: usize = 5;
}

/// Roles of the controller's inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyLayout {
    /// Number of input nodes (excluding bias).
    pub input_count: usize,
    /// Number of output nodes, one per actuated joint.
    pub output_count: usize,
    /// The sinusoidal phase pair.
    pub phase_inputs: [usize; 2],
    /// Torso tilt input.
    pub torso_angle_input: usize,
    /// Outputs that drive leg joints; phase inputs are seeded onto these.
    pub leg_outputs: Vec<usize>,
    /// Hip outputs; the torso angle input is seeded onto these.
    pub hip_outputs: Vec<usize>,
    /// `(left, right)` output pairs used by mirror mutation and walking bias.
    pub mirror_pairs: Vec<(usize, usize)>,
}

impl Default for BodyLayout {
    fn default() -> Self {
        Self::biped()
    }
}

impl BodyLayout {
    /// The six-joint biped.
    #[must_use]
    pub fn biped() -> Self {
        use biped::*;
        Self {
            input_count: INPUT_COUNT,
            output_count: JOINT_COUNT,
            phase_inputs: [PHASE_SIN, PHASE_COS],
            torso_angle_input: TORSO_TILT,
            leg_outputs: (0..JOINT_COUNT).collect(),
            hip_outputs: vec![LEFT_HIP, RIGHT_HIP],
            mirror_pairs: vec![
                (LEFT_HIP, RIGHT_HIP),
                (LEFT_KNEE, RIGHT_KNEE),
                (LEFT_ANKLE, RIGHT_ANKLE),
            ],
        }
    }

    /// Check that every index refers to an existing input or output.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for empty node sets or indices
    /// outside the declared counts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_count == 0 {
            return Err(ConfigError::out_of_range("layout.input_count", "must be positive"));
        }
        if self.output_count == 0 {
            return Err(ConfigError::out_of_range("layout.output_count", "must be positive"));
        }

        let inputs_ok = self
            .phase_inputs
            .iter()
            .chain(std::iter::once(&self.torso_angle_input))
            .all(|&i| i < self.input_count);
        if !inputs_ok {
            return Err(ConfigError::out_of_range(
                "layout.phase_inputs",
                format!("phase and torso inputs must be below {}", self.input_count),
            ));
        }

        let outputs_ok = self
            .leg_outputs
            .iter()
            .chain(&self.hip_outputs)
            .chain(self.mirror_pairs.iter().flat_map(|(l, r)| [l, r]))
            .all(|&o| o < self.output_count);
        if !outputs_ok {
            return Err(ConfigError::out_of_range(
                "layout.leg_outputs",
                format!("output roles must be below {}", self.output_count),
            ));
        }

        if self.mirror_pairs.iter().any(|(l, r)| l == r) {
            return Err(ConfigError::out_of_range(
                "layout.mirror_pairs",
                "a joint cannot mirror itself",
            ));
        }
        Ok(())
    }
}
