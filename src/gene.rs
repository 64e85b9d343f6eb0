//! Gene types for gait controller genomes.
//!
//! This module defines the building blocks of a genome:
//! - [`NodeGene`]: a neuron with a topological layer coordinate
//! - [`ConnectionGene`]: a weighted link carrying its historical marker

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

/// Connection weights are always kept inside `[-WEIGHT_LIMIT, WEIGHT_LIMIT]`.
pub const WEIGHT_LIMIT: f32 = 5.0;

/// Layer coordinate of input and bias nodes.
pub const INPUT_LAYER: f32 = 0.0;

/// Layer coordinate of output nodes.
pub const OUTPUT_LAYER: f32 = 1.0;

new_key_type! {
    /// Arena key of a node within one genome.
    ///
    /// Keys are local to a genome; use [`NodeGene::id`] to compare nodes
    /// across genomes.
    pub struct NodeKey;

    /// Arena key of a connection within one genome.
    pub struct ConnectionKey;
}

/// The role of a node in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Receives one sensor value per activation.
    Input,
    /// Always outputs 1.0.
    Bias,
    /// Internal node created by splitting a connection.
    Hidden,
    /// Produces one motor command.
    Output,
}

impl NodeType {
    /// Whether this node's value is supplied from outside rather than computed.
    #[inline]
    #[must_use]
    pub const fn is_source(self) -> bool {
        matches!(self, Self::Input | Self::Bias)
    }
}

/// A node gene.
///
/// `layer` orders evaluation: every enabled or disabled connection goes from
/// a strictly lower layer to a strictly higher one, so the graph is acyclic
/// by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeGene {
    /// Historical node id, stable across the whole population.
    pub id: u64,
    /// The role of this node.
    pub node_type: NodeType,
    /// Topological coordinate in `[0, 1]`.
    pub layer: f32,
}

impl NodeGene {
    /// Create an input node.
    #[must_use]
    pub fn input(id: u64) -> Self {
        Self {
            id,
            node_type: NodeType::Input,
            layer: INPUT_LAYER,
        }
    }

    /// Create the bias node.
    #[must_use]
    pub fn bias(id: u64) -> Self {
        Self {
            id,
            node_type: NodeType::Bias,
            layer: INPUT_LAYER,
        }
    }

    /// Create an output node.
    #[must_use]
    pub fn output(id: u64) -> Self {
        Self {
            id,
            node_type: NodeType::Output,
            layer: OUTPUT_LAYER,
        }
    }

    /// Create a hidden node at the given layer.
    #[must_use]
    pub fn hidden(id: u64, layer: f32) -> Self {
        Self {
            id,
            node_type: NodeType::Hidden,
            layer,
        }
    }
}

/// A weighted connection between two nodes of the same genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionGene {
    /// Historical marker shared by every `(from, to)` connection in the run.
    pub innovation: u64,
    /// Source node.
    pub input: NodeKey,
    /// Target node.
    pub output: NodeKey,
    /// Weight in `[-WEIGHT_LIMIT, WEIGHT_LIMIT]`.
    pub weight: f32,
    /// Disabled connections are skipped by the network but kept for crossover.
    pub enabled: bool,
}

impl ConnectionGene {
    /// Create a new enabled connection. The weight is clamped into range.
    #[must_use]
    pub fn new(innovation: u64, input: NodeKey, output: NodeKey, weight: f32) -> Self {
        Self {
            innovation,
            input,
            output,
            weight: clamp_weight(weight),
            enabled: true,
        }
    }
}

/// Clamp a weight into `[-WEIGHT_LIMIT, WEIGHT_LIMIT]`.
#[inline]
#[must_use]
pub fn clamp_weight(weight: f32) -> f32 {
    weight.clamp(-WEIGHT_LIMIT, WEIGHT_LIMIT)
}
