//! Gait controller genome with arena-allocated graph storage.
//!
//! The [`Genome`] keeps nodes and connections in `SlotMap` arenas. Every
//! connection goes from a lower to a higher node layer, so the graph stays
//! acyclic by construction and compiles into a single forward pass.

use std::cmp::Ordering;
use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::gene::{ConnectionGene, ConnectionKey, NodeGene, NodeKey, NodeType};
use crate::innovation::InnovationTracker;
use crate::layout::BodyLayout;

/// Initial connection weights are drawn from `[-INITIAL_WEIGHT_RANGE, INITIAL_WEIGHT_RANGE]`.
pub const INITIAL_WEIGHT_RANGE: f32 = 1.0;

/// Chance that a matching gene whose parents disagree on `enabled` comes out enabled.
pub const REENABLE_CHANCE: f32 = 0.25;

/// Chance that a gene present only in the less-fit parent is inherited.
pub const FOREIGN_GENE_CHANCE: f32 = 0.1;

/// Draw uniformly from `[-scale, scale]`.
#[inline]
pub(crate) fn uniform<R: Rng>(rng: &mut R, scale: f32) -> f32 {
    (rng.random::<f32>() * 2.0 - 1.0) * scale
}

/// A variable-topology controller genome.
///
/// Genomes are independent values: `clone` deep-copies both arenas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genome {
    /// Arena storage for nodes.
    pub nodes: SlotMap<NodeKey, NodeGene>,
    /// Arena storage for connections.
    pub connections: SlotMap<ConnectionKey, ConnectionGene>,
    /// Input nodes in declared order.
    pub input_ids: Vec<NodeKey>,
    /// Output nodes in declared order.
    pub output_ids: Vec<NodeKey>,
    /// The bias node.
    pub bias_id: NodeKey,
    /// Fitness from the most recent evaluation.
    #[serde(default)]
    pub fitness: f32,
}

impl Genome {
    /// Bias, inputs and outputs with no connections.
    ///
    /// Node ids follow the fixed scheme shared by the whole run: bias `0`,
    /// inputs `1..=input_count`, then outputs.
    fn skeleton(input_count: usize, output_count: usize) -> Self {
        let mut nodes: SlotMap<NodeKey, NodeGene> = SlotMap::with_key();
        let bias_id = nodes.insert(NodeGene::bias(0));

        let input_ids = (0..input_count)
            .map(|i| nodes.insert(NodeGene::input((i + 1) as u64)))
            .collect();

        let output_start = input_count + 1;
        let output_ids = (0..output_count)
            .map(|i| nodes.insert(NodeGene::output((output_start + i) as u64)))
            .collect();

        Self {
            nodes,
            connections: SlotMap::with_key(),
            input_ids,
            output_ids,
            bias_id,
            fitness: 0.0,
        }
    }

    /// Create a sparsely wired starting genome.
    ///
    /// Wiring: bias to every output, both phase inputs to every leg output,
    /// and the torso angle input to every hip output. Everything else is left
    /// for structural mutation to discover.
    pub fn minimal<R: Rng>(
        layout: &BodyLayout,
        tracker: &mut InnovationTracker,
        rng: &mut R,
    ) -> Self {
        let mut genome = Self::skeleton(layout.input_count, layout.output_count);

        let outputs = genome.output_ids.clone();
        for &output in &outputs {
            genome.connect(genome.bias_id, output, uniform(rng, INITIAL_WEIGHT_RANGE), tracker);
        }

        for &phase in &layout.phase_inputs {
            let Some(&input) = genome.input_ids.get(phase) else {
                continue;
            };
            for &leg in &layout.leg_outputs {
                if let Some(&output) = outputs.get(leg) {
                    genome.connect(input, output, uniform(rng, INITIAL_WEIGHT_RANGE), tracker);
                }
            }
        }

        if let Some(&torso) = genome.input_ids.get(layout.torso_angle_input) {
            for &hip in &layout.hip_outputs {
                if let Some(&output) = outputs.get(hip) {
                    genome.connect(torso, output, uniform(rng, INITIAL_WEIGHT_RANGE), tracker);
                }
            }
        }

        genome
    }

    /// Create a minimal genome and apply `hidden_count` node splits to it.
    pub fn with_hidden_nodes<R: Rng>(
        layout: &BodyLayout,
        tracker: &mut InnovationTracker,
        hidden_count: usize,
        rng: &mut R,
    ) -> Self {
        let mut genome = Self::minimal(layout, tracker, rng);
        for _ in 0..hidden_count {
            if let Some(conn) = genome.random_enabled_connection(rng) {
                genome.split_connection(conn, tracker);
            }
        }
        genome
    }

    /// Add a connection `from -> to`, registering its innovation.
    ///
    /// Returns `None` when either node is missing, the pair violates the
    /// layer ordering or node roles, or a connection between them already
    /// exists (enabled or not).
    pub fn connect(
        &mut self,
        from: NodeKey,
        to: NodeKey,
        weight: f32,
        tracker: &mut InnovationTracker,
    ) -> Option<ConnectionKey> {
        let from_node = self.nodes.get(from)?;
        let to_node = self.nodes.get(to)?;

        if from_node.node_type == NodeType::Output || to_node.node_type.is_source() {
            return None;
        }
        if from_node.layer >= to_node.layer {
            return None;
        }
        if self.connection_between(from, to).is_some() {
            return None;
        }

        let innovation = tracker.get_innovation(from_node.id, to_node.id);
        Some(
            self.connections
                .insert(ConnectionGene::new(innovation, from, to, weight)),
        )
    }

    /// Split a connection by inserting a hidden node at its midpoint layer.
    ///
    /// The original connection is disabled and replaced by `from -> new`
    /// (weight 1.0) and `new -> to` (original weight), so the network computes
    /// the same function immediately after the split. The node and the
    /// replacement connections come from the tracker's memoized split record
    /// and are only added if this genome does not already carry them.
    ///
    /// Returns `None` if the connection does not exist or is disabled.
    pub fn split_connection(
        &mut self,
        conn_id: ConnectionKey,
        tracker: &mut InnovationTracker,
    ) -> Option<NodeKey> {
        let conn = self.connections.get(conn_id)?;
        if !conn.enabled {
            return None;
        }
        let (from, to, weight, innovation) =
            (conn.input, conn.output, conn.weight, conn.innovation);
        let from_node = self.nodes.get(from)?;
        let to_node = self.nodes.get(to)?;
        let layer = (from_node.layer + to_node.layer) * 0.5;
        let record = tracker.get_split_record(innovation, from_node.id, to_node.id);

        self.connections[conn_id].enabled = false;

        let new_node = match self.find_node_by_id(record.new_node_id) {
            Some(existing) => existing,
            None => self
                .nodes
                .insert(NodeGene::hidden(record.new_node_id, layer)),
        };

        if self.find_connection_by_innovation(record.in_innovation).is_none() {
            self.connections.insert(ConnectionGene::new(
                record.in_innovation,
                from,
                new_node,
                1.0,
            ));
        }
        if self.find_connection_by_innovation(record.out_innovation).is_none() {
            self.connections.insert(ConnectionGene::new(
                record.out_innovation,
                new_node,
                to,
                weight,
            ));
        }

        Some(new_node)
    }

    /// Pick a random enabled connection.
    pub fn random_enabled_connection<R: Rng>(&self, rng: &mut R) -> Option<ConnectionKey> {
        let enabled: Vec<ConnectionKey> = self
            .connections
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(id, _)| id)
            .collect();
        if enabled.is_empty() {
            return None;
        }
        Some(enabled[rng.random_range(0..enabled.len())])
    }

    /// Number of input nodes (excluding bias).
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.input_ids.len()
    }

    /// Number of output nodes.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.output_ids.len()
    }

    /// Number of hidden nodes.
    #[must_use]
    pub fn hidden_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.node_type == NodeType::Hidden)
            .count()
    }

    /// Get the number of enabled connections.
    #[must_use]
    pub fn num_enabled_connections(&self) -> usize {
        self.connections.values().filter(|c| c.enabled).count()
    }

    /// Find a connection by its innovation number.
    #[must_use]
    pub fn find_connection_by_innovation(&self, innovation: u64) -> Option<ConnectionKey> {
        self.connections
            .iter()
            .find(|(_, c)| c.innovation == innovation)
            .map(|(id, _)| id)
    }

    /// Find a node by its historical id.
    #[must_use]
    pub fn find_node_by_id(&self, id: u64) -> Option<NodeKey> {
        self.nodes
            .iter()
            .find(|(_, n)| n.id == id)
            .map(|(key, _)| key)
    }

    /// The connection from `from` to `to`, enabled or not.
    #[must_use]
    pub fn connection_between(&self, from: NodeKey, to: NodeKey) -> Option<ConnectionKey> {
        self.connections
            .iter()
            .find(|(_, c)| c.input == from && c.output == to)
            .map(|(id, _)| id)
    }

    /// Connections ordered by innovation number.
    #[must_use]
    pub fn sorted_connections(&self) -> Vec<&ConnectionGene> {
        let mut conns: Vec<&ConnectionGene> = self.connections.values().collect();
        conns.sort_by_key(|c| c.innovation);
        conns
    }

    /// `(innovation, weight)` of every enabled connection, by innovation.
    #[must_use]
    pub fn enabled_genes(&self) -> Vec<(u64, f32)> {
        self.sorted_connections()
            .into_iter()
            .filter(|c| c.enabled)
            .map(|c| (c.innovation, c.weight))
            .collect()
    }

    /// Whether two genomes carry identical genes (fitness is ignored).
    #[must_use]
    pub fn same_genes(&self, other: &Self) -> bool {
        let mut a: Vec<&NodeGene> = self.nodes.values().collect();
        let mut b: Vec<&NodeGene> = other.nodes.values().collect();
        a.sort_by_key(|n| n.id);
        b.sort_by_key(|n| n.id);
        let same_connections = self
            .sorted_connections()
            .iter()
            .zip(other.sorted_connections())
            .all(|(x, y)| {
                x.innovation == y.innovation && x.weight == y.weight && x.enabled == y.enabled
            });
        a == b && self.connections.len() == other.connections.len() && same_connections
    }

    /// Seed an antiphase stepping pattern onto the phase-input connections.
    ///
    /// For each mirrored joint pair the left joint follows the phase with a
    /// random amplitude and the right joint follows its negation. The second
    /// phase input is applied at half amplitude. Only existing connections are
    /// changed.
    pub fn apply_walking_bias<R: Rng>(&mut self, layout: &BodyLayout, rng: &mut R) {
        for &(left, right) in &layout.mirror_pairs {
            let amplitude = 0.8 + rng.random::<f32>() * 0.8;
            let (Some(&left_out), Some(&right_out)) =
                (self.output_ids.get(left), self.output_ids.get(right))
            else {
                continue;
            };

            for (k, &phase) in layout.phase_inputs.iter().enumerate() {
                let Some(&input) = self.input_ids.get(phase) else {
                    continue;
                };
                let scale = if k == 0 { 1.0 } else { 0.5 };
                if let Some(conn) = self.connection_between(input, left_out) {
                    let gene = &mut self.connections[conn];
                    gene.weight = amplitude * scale;
                    gene.enabled = true;
                }
                if let Some(conn) = self.connection_between(input, right_out) {
                    let gene = &mut self.connections[conn];
                    gene.weight = -amplitude * scale;
                    gene.enabled = true;
                }
            }
        }
    }

    /// NEAT crossover. `self` must be the fitter parent.
    ///
    /// Matching genes take either parent's weight at random. They stay enabled
    /// or disabled when the parents agree, and are enabled with
    /// [`REENABLE_CHANCE`] when they disagree. Genes only in the fitter parent
    /// are inherited unchanged; genes only in `other` are inherited with
    /// [`FOREIGN_GENE_CHANCE`]. The child's fitness is zero.
    #[must_use]
    pub fn crossover<R: Rng>(&self, other: &Self, rng: &mut R) -> Self {
        let mut child = Self::skeleton(self.input_ids.len(), self.output_ids.len());
        let mut node_map: HashMap<u64, NodeKey> =
            child.nodes.iter().map(|(key, n)| (n.id, key)).collect();

        let self_conns = self.sorted_connections();
        let other_conns = other.sorted_connections();
        let mut i = 0;
        let mut j = 0;

        while i < self_conns.len() || j < other_conns.len() {
            match (self_conns.get(i), other_conns.get(j)) {
                (Some(sc), Some(oc)) if sc.innovation == oc.innovation => {
                    let weight = if rng.random::<bool>() { sc.weight } else { oc.weight };
                    let enabled = if sc.enabled == oc.enabled {
                        sc.enabled
                    } else {
                        rng.random::<f32>() < REENABLE_CHANCE
                    };
                    child.inherit(self, sc, weight, enabled, &mut node_map);
                    i += 1;
                    j += 1;
                }
                (Some(sc), Some(oc)) if sc.innovation < oc.innovation => {
                    child.inherit(self, sc, sc.weight, sc.enabled, &mut node_map);
                    i += 1;
                }
                (Some(sc), None) => {
                    child.inherit(self, sc, sc.weight, sc.enabled, &mut node_map);
                    i += 1;
                }
                (_, Some(oc)) => {
                    if rng.random::<f32>() < FOREIGN_GENE_CHANCE {
                        child.inherit(other, oc, oc.weight, oc.enabled, &mut node_map);
                    }
                    j += 1;
                }
                (None, None) => break,
            }
        }

        child
    }

    /// Copy `conn` from `parent` into `self`, pulling in its endpoint nodes.
    fn inherit(
        &mut self,
        parent: &Self,
        conn: &ConnectionGene,
        weight: f32,
        enabled: bool,
        node_map: &mut HashMap<u64, NodeKey>,
    ) {
        let mut endpoint = |key: NodeKey| -> NodeKey {
            let node = &parent.nodes[key];
            *node_map
                .entry(node.id)
                .or_insert_with(|| self.nodes.insert(node.clone()))
        };
        let input = endpoint(conn.input);
        let output = endpoint(conn.output);

        let mut gene = ConnectionGene::new(conn.innovation, input, output, weight);
        gene.enabled = enabled;
        self.connections.insert(gene);
    }
}

/// Order genomes by descending fitness.
#[must_use]
pub fn by_fitness_desc(a: &Genome, b: &Genome) -> Ordering {
    b.fitness.total_cmp(&a.fitness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::biped;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn setup() -> (BodyLayout, InnovationTracker) {
        let layout = BodyLayout::biped();
        let tracker = InnovationTracker::new(layout.input_count, layout.output_count);
        (layout, tracker)
    }

    #[test]
    fn test_minimal_genome_wiring() {
        let (layout, mut tracker) = setup();
        let genome = Genome::minimal(&layout, &mut tracker, &mut test_rng());

        assert_eq!(genome.input_count(), 20);
        assert_eq!(genome.output_count(), 6);
        assert_eq!(genome.hidden_count(), 0);
        // bias -> 6 outputs, 2 phase inputs -> 6 legs, torso -> 2 hips
        assert_eq!(genome.connections.len(), 6 + 12 + 2);

        let torso = genome.input_ids[biped::TORSO_TILT];
        let left_hip = genome.output_ids[biped::LEFT_HIP];
        let left_knee = genome.output_ids[biped::LEFT_KNEE];
        assert!(genome.connection_between(torso, left_hip).is_some());
        assert!(genome.connection_between(torso, left_knee).is_none());
    }

    #[test]
    fn test_minimal_genomes_share_innovations() {
        let (layout, mut tracker) = setup();
        let a = Genome::minimal(&layout, &mut tracker, &mut ChaCha8Rng::seed_from_u64(1));
        let b = Genome::minimal(&layout, &mut tracker, &mut ChaCha8Rng::seed_from_u64(2));

        let inn_a: Vec<u64> = a.sorted_connections().iter().map(|c| c.innovation).collect();
        let inn_b: Vec<u64> = b.sorted_connections().iter().map(|c| c.innovation).collect();
        assert_eq!(inn_a, inn_b);
        assert_eq!(tracker.innovation_count(), 20);
    }

    #[test]
    fn test_connect_rejects_invalid_pairs() {
        let (layout, mut tracker) = setup();
        let mut genome = Genome::minimal(&layout, &mut tracker, &mut test_rng());

        let input = genome.input_ids[0];
        let other_input = genome.input_ids[1];
        let output = genome.output_ids[0];

        // output -> input violates both roles and layering
        assert!(genome.connect(output, input, 0.5, &mut tracker).is_none());
        // same layer
        assert!(genome.connect(input, other_input, 0.5, &mut tracker).is_none());
        // valid, then duplicate
        assert!(genome.connect(input, output, 0.5, &mut tracker).is_some());
        assert!(genome.connect(input, output, 0.5, &mut tracker).is_none());
    }

    #[test]
    fn test_split_connection_preserves_structure() {
        let (layout, mut tracker) = setup();
        let mut genome = Genome::minimal(&layout, &mut tracker, &mut test_rng());
        let initial_conns = genome.connections.len();

        let conn_id = genome.connections.keys().next().unwrap();
        let original = genome.connections[conn_id].clone();
        let node = genome.split_connection(conn_id, &mut tracker).unwrap();

        assert_eq!(genome.hidden_count(), 1);
        assert_eq!(genome.connections.len(), initial_conns + 2);
        assert_eq!(genome.num_enabled_connections(), initial_conns + 1);
        assert!(!genome.connections[conn_id].enabled);

        let hidden = &genome.nodes[node];
        let from_layer = genome.nodes[original.input].layer;
        let to_layer = genome.nodes[original.output].layer;
        assert!((hidden.layer - (from_layer + to_layer) / 2.0).abs() < 1e-6);

        let in_conn = genome.connection_between(original.input, node).unwrap();
        let out_conn = genome.connection_between(node, original.output).unwrap();
        assert_eq!(genome.connections[in_conn].weight, 1.0);
        assert_eq!(genome.connections[out_conn].weight, original.weight);
    }

    #[test]
    fn test_split_disabled_connection_is_noop() {
        let (layout, mut tracker) = setup();
        let mut genome = Genome::minimal(&layout, &mut tracker, &mut test_rng());
        let conn_id = genome.connections.keys().next().unwrap();
        genome.connections[conn_id].enabled = false;

        assert!(genome.split_connection(conn_id, &mut tracker).is_none());
        assert_eq!(genome.hidden_count(), 0);
    }

    #[test]
    fn test_resplit_after_reenable_is_idempotent() {
        let (layout, mut tracker) = setup();
        let mut genome = Genome::minimal(&layout, &mut tracker, &mut test_rng());
        let conn_id = genome.connections.keys().next().unwrap();

        genome.split_connection(conn_id, &mut tracker).unwrap();
        let conns_after_first = genome.connections.len();
        genome.connections[conn_id].enabled = true;
        genome.split_connection(conn_id, &mut tracker).unwrap();

        assert_eq!(genome.hidden_count(), 1);
        assert_eq!(genome.connections.len(), conns_after_first);
    }

    #[test]
    fn test_with_hidden_nodes() {
        let (layout, mut tracker) = setup();
        let genome = Genome::with_hidden_nodes(&layout, &mut tracker, 3, &mut test_rng());
        assert!(genome.hidden_count() >= 1 && genome.hidden_count() <= 3);
        for conn in genome.connections.values() {
            assert!(genome.nodes[conn.input].layer < genome.nodes[conn.output].layer);
        }
    }

    #[test]
    fn test_clone_is_deep() {
        let (layout, mut tracker) = setup();
        let genome = Genome::minimal(&layout, &mut tracker, &mut test_rng());
        let mut copy = genome.clone();
        let key = copy.connections.keys().next().unwrap();
        copy.connections[key].weight = 4.5;
        assert_ne!(genome.connections[key].weight, 4.5);
    }

    #[test]
    fn test_crossover_with_self_reproduces_genes() {
        let (layout, mut tracker) = setup();
        let mut rng = test_rng();
        let mut genome = Genome::with_hidden_nodes(&layout, &mut tracker, 4, &mut rng);
        genome.fitness = 12.0;

        let child = genome.crossover(&genome, &mut rng);
        assert_eq!(child.enabled_genes(), genome.enabled_genes());
        assert_eq!(child.hidden_count(), genome.hidden_count());
        assert_eq!(child.fitness, 0.0);
    }

    #[test]
    fn test_crossover_keeps_fitter_structure() {
        let (layout, mut tracker) = setup();
        let mut rng = test_rng();
        let fitter = Genome::with_hidden_nodes(&layout, &mut tracker, 2, &mut rng);
        let weaker = Genome::minimal(&layout, &mut tracker, &mut rng);

        let child = fitter.crossover(&weaker, &mut rng);
        assert_eq!(child.connections.len(), fitter.connections.len());
        assert_eq!(child.hidden_count(), fitter.hidden_count());
        assert_eq!(child.input_count(), 20);
        assert_eq!(child.output_count(), 6);
    }

    #[test]
    fn test_walking_bias_is_antiphase() {
        let (layout, mut tracker) = setup();
        let mut genome = Genome::minimal(&layout, &mut tracker, &mut test_rng());
        genome.apply_walking_bias(&layout, &mut test_rng());

        let phase = genome.input_ids[biped::PHASE_SIN];
        let left = genome.output_ids[biped::LEFT_HIP];
        let right = genome.output_ids[biped::RIGHT_HIP];
        let lw = genome.connections[genome.connection_between(phase, left).unwrap()].weight;
        let rw = genome.connections[genome.connection_between(phase, right).unwrap()].weight;
        assert!(lw > 0.0);
        assert!((lw + rw).abs() < 1e-6);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let (layout, mut tracker) = setup();
        let genome = Genome::with_hidden_nodes(&layout, &mut tracker, 2, &mut test_rng());

        let json = serde_json::to_string(&genome).expect("Serialization failed");
        let restored: Genome = serde_json::from_str(&json).expect("Deserialization failed");

        assert!(genome.same_genes(&restored));
        assert_eq!(genome.input_ids.len(), restored.input_ids.len());
    }
}
