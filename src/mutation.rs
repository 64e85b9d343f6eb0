//! Mutation operators.
//!
//! Every operator acts in place and draws randomness from the caller's RNG.
//! Structural operators that find nothing legal to do return `false` and
//! leave the genome untouched.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{check_non_negative, check_probability, ConfigError};
use crate::gene::{clamp_weight, NodeKey, NodeType};
use crate::genome::{uniform, Genome};
use crate::innovation::InnovationTracker;
use crate::layout::BodyLayout;

/// Rejection-sampling budget for add-connection.
pub const ADD_CONNECTION_ATTEMPTS: usize = 30;

/// Chance of a toggle mutation when the toggle gate is open.
pub const TOGGLE_CHANCE: f32 = 0.02;

/// Chance of a mirror mutation when the mirror gate is open.
pub const MIRROR_CHANCE: f32 = 0.08;

/// One parameter set for [`Genome::mutate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Per-connection probability of a weight mutation.
    pub weight_rate: f32,
    /// When set, the per-connection rate becomes `min(1, target / connection_count)`.
    pub target_mutations_per_genome: Option<f32>,
    /// Probability that a weight mutation perturbs instead of resetting.
    pub perturb_chance: f32,
    /// Perturbations are uniform in `[-perturb_scale, perturb_scale]`.
    pub perturb_scale: f32,
    /// Resets are uniform in `[-reset_scale, reset_scale]`.
    pub reset_scale: f32,
    /// Weights of new connections are uniform in `[-new_connection_scale, new_connection_scale]`.
    pub new_connection_scale: f32,
    /// Probability of an add-connection mutation when its gate is open.
    pub add_connection_chance: f32,
    /// Probability of an add-node mutation when its gate is open.
    pub add_node_chance: f32,
    /// Fraction of the gap to the mirrored target closed by one mirror step.
    pub mirror_step: f32,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self::refinement()
    }
}

impl MutationConfig {
    /// Moderate weight search with rare structural change.
    #[must_use]
    pub fn refinement() -> Self {
        Self {
            weight_rate: 0.8,
            target_mutations_per_genome: None,
            perturb_chance: 0.9,
            perturb_scale: 0.3,
            reset_scale: 2.0,
            new_connection_scale: 0.5,
            add_connection_chance: 0.05,
            add_node_chance: 0.03,
            mirror_step: 0.3,
        }
    }

    /// Aggressive weight and structural search.
    #[must_use]
    pub fn exploration() -> Self {
        Self {
            weight_rate: 0.9,
            perturb_chance: 0.7,
            perturb_scale: 0.8,
            reset_scale: 3.0,
            new_connection_scale: 1.0,
            add_connection_chance: 0.3,
            add_node_chance: 0.15,
            mirror_step: 0.5,
            ..Self::refinement()
        }
    }

    /// Small perturbations on a bounded number of weights, no resets.
    #[must_use]
    pub fn local_search() -> Self {
        Self {
            weight_rate: 1.0,
            target_mutations_per_genome: Some(3.0),
            perturb_chance: 1.0,
            perturb_scale: 0.1,
            add_connection_chance: 0.0,
            add_node_chance: 0.0,
            ..Self::refinement()
        }
    }

    /// Per-connection weight mutation rate for a genome with `connection_count` genes.
    #[must_use]
    pub fn effective_rate(&self, connection_count: usize) -> f32 {
        match self.target_mutations_per_genome {
            Some(target) if connection_count > 0 => (target / connection_count as f32).min(1.0),
            _ => self.weight_rate,
        }
    }

    /// Check all rates and scales.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for negative scales or rates outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_probability("mutation.weight_rate", self.weight_rate)?;
        check_probability("mutation.perturb_chance", self.perturb_chance)?;
        check_probability("mutation.add_connection_chance", self.add_connection_chance)?;
        check_probability("mutation.add_node_chance", self.add_node_chance)?;
        check_probability("mutation.mirror_step", self.mirror_step)?;
        check_non_negative("mutation.perturb_scale", self.perturb_scale)?;
        check_non_negative("mutation.reset_scale", self.reset_scale)?;
        check_non_negative("mutation.new_connection_scale", self.new_connection_scale)?;
        if let Some(target) = self.target_mutations_per_genome {
            check_non_negative("mutation.target_mutations_per_genome", target)?;
        }
        Ok(())
    }
}

/// Which optional operators [`Genome::mutate`] may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationGates {
    /// Allow [`Genome::mutate_add_connection`].
    pub add_connection: bool,
    /// Allow [`Genome::mutate_add_node`].
    pub add_node: bool,
    /// Allow [`Genome::mutate_toggle`].
    pub toggle: bool,
    /// Allow [`Genome::mutate_mirror`].
    pub mirror: bool,
}

impl MutationGates {
    /// Weights only.
    pub const WEIGHTS_ONLY: Self = Self {
        add_connection: false,
        add_node: false,
        toggle: false,
        mirror: false,
    };

    /// Fine-tuning lane: no new structure.
    pub const REFINEMENT: Self = Self {
        add_connection: false,
        add_node: false,
        toggle: true,
        mirror: true,
    };

    /// Everything enabled.
    pub const EXPLORATION: Self = Self {
        add_connection: true,
        add_node: true,
        toggle: true,
        mirror: true,
    };
}

impl Genome {
    /// Perturb or reset connection weights.
    pub fn mutate_weights<R: Rng>(&mut self, config: &MutationConfig, rng: &mut R) {
        let rate = config.effective_rate(self.connections.len());
        for conn in self.connections.values_mut() {
            if rng.random::<f32>() >= rate {
                continue;
            }
            let weight = if rng.random::<f32>() < config.perturb_chance {
                conn.weight + uniform(rng, config.perturb_scale)
            } else {
                uniform(rng, config.reset_scale)
            };
            conn.weight = clamp_weight(weight);
        }
    }

    /// Flip `enabled` on one random connection.
    pub fn mutate_toggle<R: Rng>(&mut self, rng: &mut R) -> bool {
        if self.connections.is_empty() {
            return false;
        }
        let keys: Vec<_> = self.connections.keys().collect();
        let key = keys[rng.random_range(0..keys.len())];
        let conn = &mut self.connections[key];
        conn.enabled = !conn.enabled;
        true
    }

    /// Try to add a connection between two unconnected nodes.
    ///
    /// Samples up to [`ADD_CONNECTION_ATTEMPTS`] pairs. A pair is legal when
    /// the source is not an output, the target is not an input or bias, the
    /// source layer is below the target layer, and no connection joins them.
    pub fn mutate_add_connection<R: Rng>(
        &mut self,
        tracker: &mut InnovationTracker,
        config: &MutationConfig,
        rng: &mut R,
    ) -> bool {
        let keys: Vec<NodeKey> = self.nodes.keys().collect();
        if keys.len() < 2 {
            return false;
        }

        for _ in 0..ADD_CONNECTION_ATTEMPTS {
            let from = keys[rng.random_range(0..keys.len())];
            let to = keys[rng.random_range(0..keys.len())];
            let (from_node, to_node) = (&self.nodes[from], &self.nodes[to]);
            if from_node.node_type == NodeType::Output
                || to_node.node_type.is_source()
                || from_node.layer >= to_node.layer
                || self.connection_between(from, to).is_some()
            {
                continue;
            }

            let weight = uniform(rng, config.new_connection_scale);
            return self.connect(from, to, weight, tracker).is_some();
        }
        false
    }

    /// Split a random enabled connection.
    pub fn mutate_add_node<R: Rng>(
        &mut self,
        tracker: &mut InnovationTracker,
        rng: &mut R,
    ) -> bool {
        match self.random_enabled_connection(rng) {
            Some(conn) => self.split_connection(conn, tracker).is_some(),
            None => false,
        }
    }

    /// Nudge right-side weights toward the negation of their left-side twins.
    ///
    /// For every mirrored output pair and every source feeding both sides,
    /// the right weight moves `step` of the way toward `-left`.
    pub fn mutate_mirror(&mut self, layout: &BodyLayout, step: f32) {
        for &(left, right) in &layout.mirror_pairs {
            let (Some(&left_out), Some(&right_out)) =
                (self.output_ids.get(left), self.output_ids.get(right))
            else {
                continue;
            };

            let pairs: Vec<_> = self
                .connections
                .iter()
                .filter(|(_, c)| c.output == left_out)
                .filter_map(|(_, c)| {
                    self.connection_between(c.input, right_out)
                        .map(|twin| (twin, c.weight))
                })
                .collect();

            for (twin, left_weight) in pairs {
                let conn = &mut self.connections[twin];
                conn.weight = clamp_weight(conn.weight + step * (-left_weight - conn.weight));
            }
        }
    }

    /// Composite mutation.
    ///
    /// Always mutates weights; then applies each gated operator with its
    /// probability: add-connection and add-node from `config`, toggle at
    /// [`TOGGLE_CHANCE`], mirror at [`MIRROR_CHANCE`].
    pub fn mutate<R: Rng>(
        &mut self,
        tracker: &mut InnovationTracker,
        layout: &BodyLayout,
        config: &MutationConfig,
        gates: MutationGates,
        rng: &mut R,
    ) {
        self.mutate_weights(config, rng);

        if gates.add_connection && rng.random::<f32>() < config.add_connection_chance {
            self.mutate_add_connection(tracker, config, rng);
        }
        if gates.add_node && rng.random::<f32>() < config.add_node_chance {
            self.mutate_add_node(tracker, rng);
        }
        if gates.toggle && rng.random::<f32>() < TOGGLE_CHANCE {
            self.mutate_toggle(rng);
        }
        if gates.mirror && rng.random::<f32>() < MIRROR_CHANCE {
            self.mutate_mirror(layout, config.mirror_step);
        }
    }
}
