//! Feed-forward network compiled from a [`Genome`].
//!
//! Nodes are ordered by `(layer, id)`. Since every connection goes from a
//! lower to a strictly higher layer, one pass over that order evaluates the
//! whole network. Incoming edges are stored in Compressed Sparse Row (CSR)
//! form, sorted by innovation so summation order (and therefore the exact
//! floating-point result) does not depend on mutation history.

use std::collections::HashMap;

use crate::error::NetworkError;
use crate::gene::{NodeKey, NodeType};
use crate::genome::Genome;

/// A compiled, evaluation-ready controller.
#[derive(Debug, Clone)]
pub struct Network {
    /// Node values in evaluation order. Scratch space reused across calls.
    values: Vec<f32>,
    /// CSR: source node index of every incoming edge.
    csr_sources: Vec<usize>,
    /// CSR: weights, parallel to `csr_sources`.
    csr_weights: Vec<f32>,
    /// CSR: for node i, incoming edges live at `[csr_offsets[i], csr_offsets[i + 1])`.
    csr_offsets: Vec<usize>,
    input_indices: Vec<usize>,
    output_indices: Vec<usize>,
    bias_index: usize,
    /// Hidden and output nodes in evaluation order.
    eval_order: Vec<usize>,
}

impl Network {
    /// Compile a genome.
    #[must_use]
    pub fn new(genome: &Genome) -> Self {
        let mut order: Vec<(NodeKey, f32, u64, NodeType)> = genome
            .nodes
            .iter()
            .map(|(key, n)| (key, n.layer, n.id, n.node_type))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.2.cmp(&b.2)));

        let index: HashMap<NodeKey, usize> = order
            .iter()
            .enumerate()
            .map(|(i, (key, ..))| (*key, i))
            .collect();

        let eval_order = order
            .iter()
            .enumerate()
            .filter(|(_, (.., node_type))| !node_type.is_source())
            .map(|(i, _)| i)
            .collect();

        let mut edges: Vec<(usize, usize, f32, u64)> = genome
            .connections
            .values()
            .filter(|c| c.enabled)
            .filter_map(|c| {
                let from = *index.get(&c.input)?;
                let to = *index.get(&c.output)?;
                Some((from, to, c.weight, c.innovation))
            })
            .collect();
        edges.sort_by_key(|&(.., innovation)| innovation);

        let node_count = order.len();
        let mut counts = vec![0usize; node_count];
        for &(_, to, ..) in &edges {
            counts[to] += 1;
        }

        let mut csr_offsets = Vec::with_capacity(node_count + 1);
        csr_offsets.push(0);
        let mut running = 0;
        for &count in &counts {
            running += count;
            csr_offsets.push(running);
        }

        let mut csr_sources = vec![0usize; edges.len()];
        let mut csr_weights = vec![0.0f32; edges.len()];
        let mut write_pos = csr_offsets[..node_count].to_vec();
        for (from, to, weight, _) in edges {
            let pos = write_pos[to];
            csr_sources[pos] = from;
            csr_weights[pos] = weight;
            write_pos[to] += 1;
        }

        // Declared order, not arena order.
        let input_indices = genome
            .input_ids
            .iter()
            .filter_map(|k| index.get(k).copied())
            .collect();
        let output_indices = genome
            .output_ids
            .iter()
            .filter_map(|k| index.get(k).copied())
            .collect();
        let bias_index = index.get(&genome.bias_id).copied().unwrap_or(0);

        Self {
            values: vec![0.0; node_count],
            csr_sources,
            csr_weights,
            csr_offsets,
            input_indices,
            output_indices,
            bias_index,
            eval_order,
        }
    }

    /// Evaluate the network, writing one value per output into `outputs`.
    ///
    /// This is the allocation-free version used inside the control loop.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InputArityMismatch`] or
    /// [`NetworkError::OutputArityMismatch`] if a slice has the wrong length.
    pub fn activate_into(
        &mut self,
        inputs: &[f32],
        outputs: &mut [f32],
    ) -> Result<(), NetworkError> {
        if inputs.len() != self.input_indices.len() {
            return Err(NetworkError::InputArityMismatch {
                expected: self.input_indices.len(),
                actual: inputs.len(),
            });
        }
        if outputs.len() != self.output_indices.len() {
            return Err(NetworkError::OutputArityMismatch {
                expected: self.output_indices.len(),
                actual: outputs.len(),
            });
        }

        self.values.fill(0.0);
        for (&idx, &value) in self.input_indices.iter().zip(inputs) {
            self.values[idx] = value;
        }
        self.values[self.bias_index] = 1.0;

        for &node in &self.eval_order {
            let start = self.csr_offsets[node];
            let end = self.csr_offsets[node + 1];
            let sum: f32 = self.csr_sources[start..end]
                .iter()
                .zip(&self.csr_weights[start..end])
                .map(|(&from, &weight)| self.values[from] * weight)
                .sum();
            self.values[node] = sum.tanh();
        }

        for (out, &idx) in outputs.iter_mut().zip(&self.output_indices) {
            *out = self.values[idx];
        }
        Ok(())
    }

    /// Evaluate the network.
    ///
    /// Returns the output values in the genome's declared output order, each
    /// in `[-1, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InputArityMismatch`] if `inputs` has the wrong length.
    pub fn activate(&mut self, inputs: &[f32]) -> Result<Vec<f32>, NetworkError> {
        let mut outputs = vec![0.0; self.output_indices.len()];
        self.activate_into(inputs, &mut outputs)?;
        Ok(outputs)
    }

    /// Get the number of input nodes.
    #[must_use]
    pub fn num_inputs(&self) -> usize {
        self.input_indices.len()
    }

    /// Get the number of output nodes.
    #[must_use]
    pub fn num_outputs(&self) -> usize {
        self.output_indices.len()
    }

    /// Number of enabled connections compiled into the network.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.csr_sources.len()
    }
}

impl Genome {
    /// Compile this genome into an executable [`Network`].
    #[must_use]
    pub fn build_network(&self) -> Network {
        Network::new(self)
    }
}
