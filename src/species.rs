//! Compatibility distance and speciation.
//!
//! Genomes are grouped by a NEAT compatibility distance extended with a
//! hidden-node-count term. The distance threshold adapts every generation to
//! keep the species count inside a target band.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{check_non_negative, ConfigError};
use crate::genome::Genome;

/// Coefficients of the compatibility distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityConfig {
    /// Coefficient for excess genes.
    pub excess_coeff: f32,
    /// Coefficient for disjoint genes.
    pub disjoint_coeff: f32,
    /// Coefficient for the average weight difference of matching genes.
    pub weight_coeff: f32,
    /// Coefficient for the absolute difference in hidden-node counts.
    pub hidden_node_coeff: f32,
    /// Excess and disjoint counts are divided by the gene count only from this size up.
    pub normalize_min_genes: usize,
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            excess_coeff: 1.0,
            disjoint_coeff: 1.0,
            weight_coeff: 0.4,
            hidden_node_coeff: 0.2,
            normalize_min_genes: 20,
        }
    }
}

/// Compatibility distance between two genomes.
///
/// Connections are aligned by innovation with a merge scan. Non-matching
/// genes below both genomes' maximum innovation are disjoint, the rest are
/// excess.
#[must_use]
pub fn compatibility_distance(a: &Genome, b: &Genome, config: &CompatibilityConfig) -> f32 {
    let a_conns = a.sorted_connections();
    let b_conns = b.sorted_connections();

    let a_max = a_conns.last().map_or(0, |c| c.innovation);
    let b_max = b_conns.last().map_or(0, |c| c.innovation);
    let shared_max = a_max.min(b_max);

    let mut matching = 0usize;
    let mut disjoint = 0usize;
    let mut excess = 0usize;
    let mut weight_diff_sum = 0.0f32;

    let mut classify = |innovation: u64| {
        if innovation > shared_max {
            excess += 1;
        } else {
            disjoint += 1;
        }
    };

    let (mut i, mut j) = (0, 0);
    loop {
        match (a_conns.get(i), b_conns.get(j)) {
            (Some(x), Some(y)) if x.innovation == y.innovation => {
                matching += 1;
                weight_diff_sum += (x.weight - y.weight).abs();
                i += 1;
                j += 1;
            }
            (Some(x), Some(y)) if x.innovation < y.innovation => {
                classify(x.innovation);
                i += 1;
            }
            (Some(x), None) => {
                classify(x.innovation);
                i += 1;
            }
            (_, Some(y)) => {
                classify(y.innovation);
                j += 1;
            }
            (None, None) => break,
        }
    }

    let gene_count = a_conns.len().max(b_conns.len());
    let norm = if gene_count >= config.normalize_min_genes {
        gene_count.max(1) as f32
    } else {
        1.0
    };
    let avg_weight_diff = if matching > 0 {
        weight_diff_sum / matching as f32
    } else {
        0.0
    };
    let hidden_diff = a.hidden_count().abs_diff(b.hidden_count()) as f32;

    config.excess_coeff * excess as f32 / norm
        + config.disjoint_coeff * disjoint as f32 / norm
        + config.weight_coeff * avg_weight_diff
        + config.hidden_node_coeff * hidden_diff
}

/// Adaptive threshold control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciationConfig {
    /// Starting compatibility threshold.
    pub initial_threshold: f32,
    /// Lowest threshold the controller may reach.
    pub min_threshold: f32,
    /// Highest threshold the controller may reach.
    pub max_threshold: f32,
    /// Below this many species the threshold shrinks.
    pub min_species: usize,
    /// Above this many species the threshold grows.
    pub max_species: usize,
    /// Threshold change per generation (per species of overshoot when growing).
    pub threshold_step: f32,
    /// Distance coefficients.
    pub compatibility: CompatibilityConfig,
}

impl Default for SpeciationConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 2.0,
            min_threshold: 0.5,
            max_threshold: 5.0,
            min_species: 4,
            max_species: 12,
            threshold_step: 0.1,
            compatibility: CompatibilityConfig::default(),
        }
    }
}

impl SpeciationConfig {
    /// Check threshold bounds and the species band.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] when bounds are inverted or negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("speciation.min_threshold", self.min_threshold)?;
        check_non_negative("speciation.threshold_step", self.threshold_step)?;
        if self.min_threshold > self.max_threshold {
            return Err(ConfigError::out_of_range(
                "speciation.min_threshold",
                "must not exceed max_threshold",
            ));
        }
        if !(self.min_threshold..=self.max_threshold).contains(&self.initial_threshold) {
            return Err(ConfigError::out_of_range(
                "speciation.initial_threshold",
                "must lie within [min_threshold, max_threshold]",
            ));
        }
        if self.min_species == 0 || self.min_species > self.max_species {
            return Err(ConfigError::out_of_range(
                "speciation.min_species",
                "must be positive and not exceed max_species",
            ));
        }
        let c = &self.compatibility;
        check_non_negative("compatibility.excess_coeff", c.excess_coeff)?;
        check_non_negative("compatibility.disjoint_coeff", c.disjoint_coeff)?;
        check_non_negative("compatibility.weight_coeff", c.weight_coeff)?;
        check_non_negative("compatibility.hidden_node_coeff", c.hidden_node_coeff)?;
        Ok(())
    }
}

/// A species for one generation.
#[derive(Debug, Clone)]
pub struct Species {
    /// Stable id, kept while the species keeps members.
    pub id: u64,
    /// Frozen clone used for membership tests.
    pub representative: Genome,
    /// Indices of member genomes in the population, in population order.
    pub members: Vec<usize>,
    /// Sum of member fitness divided by member count.
    pub adjusted_fitness_sum: f32,
}

/// The species list together with the adaptive threshold.
#[derive(Debug, Clone)]
pub struct SpeciesSet {
    species: Vec<Species>,
    threshold: f32,
    next_species_id: u64,
}

impl SpeciesSet {
    /// Create an empty set with the configured starting threshold.
    #[must_use]
    pub fn new(config: &SpeciationConfig) -> Self {
        Self {
            species: Vec::new(),
            threshold: config.initial_threshold,
            next_species_id: 0,
        }
    }

    /// Current species.
    #[must_use]
    pub fn species(&self) -> &[Species] {
        &self.species
    }

    /// Current compatibility threshold.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Number of species.
    #[must_use]
    pub fn len(&self) -> usize {
        self.species.len()
    }

    /// Whether there are no species.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    /// Forget member indices while keeping representatives and ids.
    pub fn clear_members(&mut self) {
        for species in &mut self.species {
            species.members.clear();
        }
    }

    /// Reassign every genome to a species and adapt the threshold.
    ///
    /// Each genome, in order, joins the first species whose representative is
    /// within the threshold, or founds a new one. Emptied species are dropped.
    /// Each surviving species then draws a new representative at random from
    /// its members, so species identity drifts with the population.
    pub fn speciate<R: Rng>(&mut self, genomes: &[Genome], config: &SpeciationConfig, rng: &mut R) {
        self.clear_members();

        for (index, genome) in genomes.iter().enumerate() {
            let home = self.species.iter_mut().find(|s| {
                compatibility_distance(&s.representative, genome, &config.compatibility)
                    < self.threshold
            });
            match home {
                Some(species) => species.members.push(index),
                None => {
                    self.species.push(Species {
                        id: self.next_species_id,
                        representative: genome.clone(),
                        members: vec![index],
                        adjusted_fitness_sum: 0.0,
                    });
                    self.next_species_id += 1;
                }
            }
        }

        self.species.retain(|s| !s.members.is_empty());

        for species in &mut self.species {
            let total: f32 = species.members.iter().map(|&m| genomes[m].fitness).sum();
            species.adjusted_fitness_sum = total / species.members.len() as f32;
            let pick = species.members[rng.random_range(0..species.members.len())];
            species.representative = genomes[pick].clone();
        }

        self.adjust_threshold(config);
    }

    /// Proportional control toward `[min_species, max_species]`.
    fn adjust_threshold(&mut self, config: &SpeciationConfig) {
        let count = self.species.len();
        let before = self.threshold;
        if count < config.min_species {
            self.threshold = (self.threshold - config.threshold_step).max(config.min_threshold);
        } else if count > config.max_species {
            let overshoot = (count - config.max_species) as f32;
            self.threshold =
                (self.threshold + config.threshold_step * overshoot).min(config.max_threshold);
        }
        if self.threshold != before {
            debug!(
                species = count,
                from = before,
                to = self.threshold,
                "compatibility threshold adjusted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innovation::InnovationTracker;
    use crate::layout::BodyLayout;
    use crate::mutation::{MutationConfig, MutationGates};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn population(n: usize, seed: u64) -> Vec<Genome> {
        let layout = BodyLayout::biped();
        let mut tracker = InnovationTracker::new(layout.input_count, layout.output_count);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                let mut g = Genome::with_hidden_nodes(&layout, &mut tracker, i % 4, &mut rng);
                g.fitness = i as f32;
                g
            })
            .collect()
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let config = CompatibilityConfig::default();
        for genome in population(6, 7) {
            assert_eq!(compatibility_distance(&genome, &genome, &config), 0.0);
        }
    }

    #[test]
    fn test_distance_is_symmetric_and_positive() {
        let layout = BodyLayout::biped();
        let mut tracker = InnovationTracker::new(layout.input_count, layout.output_count);
        let mut rng = test_rng();
        let a = Genome::minimal(&layout, &mut tracker, &mut rng);
        let mut b = a.clone();
        let config = MutationConfig {
            add_connection_chance: 1.0,
            add_node_chance: 1.0,
            ..MutationConfig::exploration()
        };
        for _ in 0..5 {
            b.mutate(&mut tracker, &layout, &config, MutationGates::EXPLORATION, &mut rng);
        }

        let compat = CompatibilityConfig::default();
        let ab = compatibility_distance(&a, &b, &compat);
        let ba = compatibility_distance(&b, &a, &compat);
        assert!(ab > 0.0);
        assert!((ab - ba).abs() < 1e-5);
    }

    #[test]
    fn test_hidden_node_term() {
        let layout = BodyLayout::biped();
        let mut tracker = InnovationTracker::new(layout.input_count, layout.output_count);
        let a = Genome::minimal(&layout, &mut tracker, &mut test_rng());
        let mut b = a.clone();
        let conn = b.connections.keys().next().unwrap();
        b.split_connection(conn, &mut tracker);

        let structural_only = CompatibilityConfig {
            excess_coeff: 0.0,
            disjoint_coeff: 0.0,
            weight_coeff: 0.0,
            hidden_node_coeff: 0.2,
            ..CompatibilityConfig::default()
        };
        let d = compatibility_distance(&a, &b, &structural_only);
        assert!((d - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_excess_normalized_only_for_large_genomes() {
        let layout = BodyLayout::biped();
        let mut tracker = InnovationTracker::new(layout.input_count, layout.output_count);
        let a = Genome::minimal(&layout, &mut tracker, &mut test_rng());
        let mut b = a.clone();
        let conn = b.connections.keys().next().unwrap();
        b.split_connection(conn, &mut tracker);

        let excess_only = CompatibilityConfig {
            excess_coeff: 1.0,
            disjoint_coeff: 0.0,
            weight_coeff: 0.0,
            hidden_node_coeff: 0.0,
            normalize_min_genes: 1000,
        };
        // Two new genes beyond a's max innovation, unnormalized.
        assert!((compatibility_distance(&a, &b, &excess_only) - 2.0).abs() < 1e-6);

        let normalized = CompatibilityConfig {
            normalize_min_genes: 20,
            ..excess_only
        };
        let expected = 2.0 / b.connections.len() as f32;
        assert!((compatibility_distance(&a, &b, &normalized) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_speciation_deterministic_for_seed() {
        let genomes = population(30, 3);
        let config = SpeciationConfig::default();

        let counts = |seed: u64| {
            let mut set = SpeciesSet::new(&config);
            set.speciate(&genomes, &config, &mut ChaCha8Rng::seed_from_u64(seed));
            set.species()
                .iter()
                .map(|s| s.members.len())
                .collect::<Vec<_>>()
        };
        assert_eq!(counts(11), counts(11));
    }

    #[test]
    fn test_every_genome_assigned_once() {
        let genomes = population(25, 5);
        let config = SpeciationConfig::default();
        let mut set = SpeciesSet::new(&config);
        set.speciate(&genomes, &config, &mut test_rng());

        let mut seen: Vec<usize> = set
            .species()
            .iter()
            .flat_map(|s| s.members.iter().copied())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..25).collect::<Vec<_>>());

        for species in set.species() {
            let mean = species.members.iter().map(|&m| genomes[m].fitness).sum::<f32>()
                / species.members.len() as f32;
            assert!((species.adjusted_fitness_sum - mean).abs() < 1e-4);
        }
    }

    #[test]
    fn test_threshold_shrinks_when_too_few_species() {
        let genomes = population(10, 1);
        let config = SpeciationConfig {
            initial_threshold: 5.0,
            min_species: 50,
            max_species: 60,
            ..SpeciationConfig::default()
        };
        let mut set = SpeciesSet::new(&config);
        set.speciate(&genomes, &config, &mut test_rng());
        assert!((set.threshold() - 4.9).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_grows_with_overshoot() {
        let genomes = population(10, 1);
        let config = SpeciationConfig {
            initial_threshold: 0.5,
            min_threshold: 0.0,
            min_species: 1,
            max_species: 1,
            ..SpeciationConfig::default()
        };
        let mut set = SpeciesSet::new(&SpeciationConfig {
            initial_threshold: 0.0,
            ..config.clone()
        });
        set.speciate(&genomes, &config, &mut test_rng());
        // With a zero threshold every genome founds its own species.
        assert_eq!(set.len(), 10);
        assert!((set.threshold() - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_invalid_band_rejected() {
        let config = SpeciationConfig {
            min_species: 10,
            max_species: 5,
            ..SpeciationConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SpeciationConfig::default().validate().is_ok());
    }
}
