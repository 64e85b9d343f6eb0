//! Population management and generational reproduction.
//!
//! [`Population::evolve`] runs one generation step:
//!
//! 1. sort by fitness
//! 2. fitness sharing around the best genome (highest stagnation tier only)
//! 3. speciation
//! 4. nuclear reset once stagnation crosses its threshold (ends the step)
//! 5. elitism
//! 6. local-search lane (weight-only fine tuning of top genomes)
//! 7. diversity injection (fresh genomes)
//! 8. per-species offspring by tournament selection and crossover
//! 9. fallback fill
//! 10. replace the population and advance the generation counter

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{check_non_negative, check_probability, ConfigError};
use crate::genome::{by_fitness_desc, Genome};
use crate::innovation::InnovationTracker;
use crate::layout::BodyLayout;
use crate::mutation::{MutationConfig, MutationGates};
use crate::species::{compatibility_distance, Species, SpeciationConfig, SpeciesSet};

/// Minimum number of elites copied verbatim, whatever the configuration says.
pub const ELITISM_FLOOR: usize = 2;

/// Number of stagnation tiers above "not stagnating".
pub const MAX_STAGNATION_TIER: usize = 3;

/// Stagnation thresholds, in generations without improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagnationConfig {
    /// Generation counts at which tiers 1, 2 and 3 begin.
    pub tier_thresholds: [u32; MAX_STAGNATION_TIER],
    /// Generation count that triggers a nuclear reset.
    pub nuclear_threshold: u32,
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            tier_thresholds: [8, 16, 30],
            nuclear_threshold: 45,
        }
    }
}

/// Weight-only fine tuning of the best genomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSearchConfig {
    /// Share of the next generation when not stagnating.
    pub base_fraction: f32,
    /// Additional share per stagnation tier.
    pub per_tier_fraction: f32,
    /// Parents are drawn from this many top genomes.
    pub top_n: usize,
    /// Mutation parameters for the lane.
    pub mutation: MutationConfig,
}

impl Default for LocalSearchConfig {
    fn default() -> Self {
        Self {
            base_fraction: 0.1,
            per_tier_fraction: 0.05,
            top_n: 5,
            mutation: MutationConfig::local_search(),
        }
    }
}

/// Fresh genomes injected into the next generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    /// Share used when injection is requested without stagnation.
    pub baseline_fraction: f32,
    /// Share per stagnation tier.
    pub per_tier_fraction: f32,
    /// Fresh genomes get `0..=max_hidden` pre-seeded hidden nodes.
    pub max_hidden: usize,
    /// Chance a fresh genome receives the walking-pattern bias.
    pub walking_bias_chance: f32,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            baseline_fraction: 0.05,
            per_tier_fraction: 0.08,
            max_hidden: 4,
            walking_bias_chance: 0.5,
        }
    }
}

/// Discount applied around the best genome at the highest stagnation tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitnessSharingConfig {
    /// Genomes closer than this to the best genome are discounted.
    pub radius: f32,
    /// Discount for an identical genome; falls off linearly to zero at `radius`.
    pub strength: f32,
}

impl Default for FitnessSharingConfig {
    fn default() -> Self {
        Self {
            radius: 1.0,
            strength: 0.5,
        }
    }
}

/// Composition of the population rebuilt by a nuclear reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NuclearResetConfig {
    /// Top genomes kept.
    pub survivors: usize,
    /// Share of the regenerated slots filled with fresh diverse topologies.
    pub fresh_fraction: f32,
    /// Share filled with walking-biased fresh genomes.
    pub walking_fraction: f32,
    /// Exploration mutation rounds applied to each survivor clone.
    pub heavy_mutation_rounds: usize,
}

impl Default for NuclearResetConfig {
    fn default() -> Self {
        Self {
            survivors: 5,
            fresh_fraction: 0.4,
            walking_fraction: 0.3,
            heavy_mutation_rounds: 4,
        }
    }
}

/// Population-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Number of genomes per generation.
    pub size: usize,
    /// Elites copied verbatim; raised to [`ELITISM_FLOOR`] if lower.
    pub elitism: usize,
    /// Initial genomes get `0..=initial_max_hidden` hidden nodes.
    pub initial_max_hidden: usize,
    /// Share of initial genomes that receive the walking bias.
    pub initial_walking_bias_fraction: f32,
    /// Tournament size for parent selection.
    pub tournament_size: usize,
    /// Probability that an offspring uses the exploration parameter set.
    pub exploration_probability: f32,
    /// Added to `exploration_probability` per stagnation tier.
    pub exploration_per_tier: f32,
    pub stagnation: StagnationConfig,
    pub local_search: LocalSearchConfig,
    pub diversity: DiversityConfig,
    pub fitness_sharing: FitnessSharingConfig,
    pub nuclear_reset: NuclearResetConfig,
    /// Mutation for offspring in the refinement lane.
    pub refinement: MutationConfig,
    /// Mutation for offspring in the exploration lane.
    pub exploration: MutationConfig,
    pub speciation: SpeciationConfig,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: 60,
            elitism: 3,
            initial_max_hidden: 2,
            initial_walking_bias_fraction: 0.3,
            tournament_size: 3,
            exploration_probability: 0.2,
            exploration_per_tier: 0.15,
            stagnation: StagnationConfig::default(),
            local_search: LocalSearchConfig::default(),
            diversity: DiversityConfig::default(),
            fitness_sharing: FitnessSharingConfig::default(),
            nuclear_reset: NuclearResetConfig::default(),
            refinement: MutationConfig::refinement(),
            exploration: MutationConfig::exploration(),
            speciation: SpeciationConfig::default(),
        }
    }
}

impl PopulationConfig {
    /// Elites actually kept per generation.
    #[must_use]
    pub fn effective_elitism(&self) -> usize {
        self.elitism.max(ELITISM_FLOOR).min(self.size)
    }

    /// Stagnation tier in `0..=MAX_STAGNATION_TIER` for a stagnation count.
    #[must_use]
    pub fn stagnation_tier(&self, stagnation: u32) -> usize {
        self.stagnation
            .tier_thresholds
            .iter()
            .filter(|&&t| stagnation >= t)
            .count()
    }

    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size < ELITISM_FLOOR {
            return Err(ConfigError::out_of_range(
                "population.size",
                format!("must be at least {ELITISM_FLOOR}, got {}", self.size),
            ));
        }
        if self.tournament_size == 0 {
            return Err(ConfigError::out_of_range("population.tournament_size", "must be positive"));
        }
        check_probability(
            "population.initial_walking_bias_fraction",
            self.initial_walking_bias_fraction,
        )?;
        check_probability("population.exploration_probability", self.exploration_probability)?;
        check_non_negative("population.exploration_per_tier", self.exploration_per_tier)?;

        let t = &self.stagnation.tier_thresholds;
        if t.windows(2).any(|w| w[0] > w[1])
            || self.stagnation.nuclear_threshold < t[MAX_STAGNATION_TIER - 1]
        {
            return Err(ConfigError::out_of_range(
                "population.stagnation",
                "tier thresholds must ascend and not exceed nuclear_threshold",
            ));
        }

        check_probability("local_search.base_fraction", self.local_search.base_fraction)?;
        check_probability("local_search.per_tier_fraction", self.local_search.per_tier_fraction)?;
        if self.local_search.top_n == 0 {
            return Err(ConfigError::out_of_range("local_search.top_n", "must be positive"));
        }
        check_probability("diversity.baseline_fraction", self.diversity.baseline_fraction)?;
        check_probability("diversity.per_tier_fraction", self.diversity.per_tier_fraction)?;
        check_probability("diversity.walking_bias_chance", self.diversity.walking_bias_chance)?;
        check_non_negative("fitness_sharing.radius", self.fitness_sharing.radius)?;
        check_probability("fitness_sharing.strength", self.fitness_sharing.strength)?;

        let n = &self.nuclear_reset;
        if n.survivors == 0 {
            return Err(ConfigError::out_of_range("nuclear_reset.survivors", "must be positive"));
        }
        check_probability("nuclear_reset.fresh_fraction", n.fresh_fraction)?;
        check_probability("nuclear_reset.walking_fraction", n.walking_fraction)?;
        if n.fresh_fraction + n.walking_fraction > 1.0 {
            return Err(ConfigError::out_of_range(
                "nuclear_reset.fresh_fraction",
                "fresh_fraction + walking_fraction must not exceed 1",
            ));
        }

        self.local_search.mutation.validate()?;
        self.refinement.validate()?;
        self.exploration.validate()?;
        self.speciation.validate()
    }
}

/// Per-call inputs to [`Population::evolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EvolveOptions<'a> {
    /// Generations without improvement, as tracked by the caller.
    pub stagnation: u32,
    /// Best genome ever seen; preserved through a nuclear reset.
    pub hall_of_fame: Option<&'a Genome>,
    /// Inject the baseline share of fresh genomes even when not stagnating.
    pub inject_diversity: bool,
}

/// What one [`Population::evolve`] call did.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvolveOutcome {
    /// Generation number after the step.
    pub generation: u32,
    /// Stagnation tier used for this step.
    pub stagnation_tier: usize,
    /// A nuclear reset replaced the population; the caller should clear its
    /// stagnation counter.
    pub nuclear_reset: bool,
    /// Species found by this step's speciation.
    pub species_count: usize,
    /// Top genomes copied verbatim (nuclear-reset survivors included).
    pub elites: usize,
    /// Weight-only clones of top genomes.
    pub local_search: usize,
    /// Fresh genomes from diversity injection.
    pub injected: usize,
    /// Children bred within species.
    pub offspring: usize,
    /// Mutated clones filling slots left by rounding.
    pub fallback: usize,
}

/// The single owner of all genomes, the innovation tracker and the species.
#[derive(Debug, Clone)]
pub struct Population {
    config: PopulationConfig,
    layout: BodyLayout,
    genomes: Vec<Genome>,
    tracker: InnovationTracker,
    species: SpeciesSet,
    generation: u32,
}

impl Population {
    /// Validate the configuration and create the initial generation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration or layout is invalid.
    pub fn new<R: Rng>(
        config: PopulationConfig,
        layout: BodyLayout,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        layout.validate()?;

        let mut tracker = InnovationTracker::new(layout.input_count, layout.output_count);
        let genomes = (0..config.size)
            .map(|_| {
                let hidden = rng.random_range(0..=config.initial_max_hidden);
                let mut genome = Genome::with_hidden_nodes(&layout, &mut tracker, hidden, rng);
                if rng.random::<f32>() < config.initial_walking_bias_fraction {
                    genome.apply_walking_bias(&layout, rng);
                }
                genome
            })
            .collect();
        let species = SpeciesSet::new(&config.speciation);

        Ok(Self {
            config,
            layout,
            genomes,
            tracker,
            species,
            generation: 0,
        })
    }

    /// Current genomes.
    #[must_use]
    pub fn genomes(&self) -> &[Genome] {
        &self.genomes
    }

    /// Number of genomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    /// Whether the population is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    /// Record the fitness of genome `index`. Out-of-range indices are ignored.
    pub fn set_fitness(&mut self, index: usize, fitness: f32) {
        if let Some(genome) = self.genomes.get_mut(index) {
            genome.fitness = fitness;
        }
    }

    /// The genome with the highest fitness.
    #[must_use]
    pub fn best(&self) -> Option<&Genome> {
        self.genomes.iter().min_by(|a, b| by_fitness_desc(a, b))
    }

    /// Generation counter.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Species from the most recent speciation.
    ///
    /// Member lists index into the genomes that were speciated, so
    /// [`Population::evolve`] empties them when it replaces the genomes.
    /// Representatives and ids stay until the next speciation.
    #[must_use]
    pub fn species(&self) -> &[Species] {
        self.species.species()
    }

    /// Current compatibility threshold.
    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.species.threshold()
    }

    #[must_use]
    pub fn tracker(&self) -> &InnovationTracker {
        &self.tracker
    }

    #[must_use]
    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    #[must_use]
    pub fn layout(&self) -> &BodyLayout {
        &self.layout
    }

    /// Group the current genomes into species.
    pub fn speciate<R: Rng>(&mut self, rng: &mut R) {
        self.species.speciate(&self.genomes, &self.config.speciation, rng);
    }

    /// Produce the next generation.
    pub fn evolve<R: Rng>(&mut self, options: &EvolveOptions<'_>, rng: &mut R) -> EvolveOutcome {
        let size = self.config.size;
        let tier = self.config.stagnation_tier(options.stagnation);
        let mut outcome = EvolveOutcome {
            stagnation_tier: tier,
            ..EvolveOutcome::default()
        };

        self.genomes.sort_by(by_fitness_desc);

        if tier == MAX_STAGNATION_TIER {
            self.share_fitness_around_best();
            self.genomes.sort_by(by_fitness_desc);
        }

        self.speciate(rng);
        outcome.species_count = self.species.len();

        if options.stagnation >= self.config.stagnation.nuclear_threshold {
            let (next, kept) = self.nuclear_reset(options.hall_of_fame, rng);
            outcome.nuclear_reset = true;
            outcome.elites = kept;
            return self.finish(next, outcome);
        }

        let mut next: Vec<Genome> = Vec::with_capacity(size);

        // Elites, verbatim.
        let elites = self.config.effective_elitism().min(self.genomes.len());
        next.extend(self.genomes[..elites].iter().cloned());
        outcome.elites = elites;

        // Local-search lane.
        let ls = &self.config.local_search;
        let count = lane_count(size, ls.base_fraction + tier as f32 * ls.per_tier_fraction)
            .min(size - next.len());
        let top_n = ls.top_n.min(self.genomes.len());
        for _ in 0..count {
            let mut child = self.genomes[rng.random_range(0..top_n)].clone();
            child.mutate(
                &mut self.tracker,
                &self.layout,
                &self.config.local_search.mutation,
                MutationGates::WEIGHTS_ONLY,
                rng,
            );
            child.fitness = 0.0;
            next.push(child);
        }
        outcome.local_search = count;

        // Diversity injection.
        let div = &self.config.diversity;
        let fraction = if tier > 0 {
            tier as f32 * div.per_tier_fraction
        } else if options.inject_diversity {
            div.baseline_fraction
        } else {
            0.0
        };
        let count = lane_count(size, fraction).min(size - next.len());
        for _ in 0..count {
            let walking = rng.random::<f32>() < self.config.diversity.walking_bias_chance;
            let genome = self.fresh_genome(self.config.diversity.max_hidden, walking, rng);
            next.push(genome);
        }
        outcome.injected = count;

        // Per-species offspring.
        let allocation = allocate_offspring(self.species.species(), size - next.len());
        let explore_p = (self.config.exploration_probability
            + tier as f32 * self.config.exploration_per_tier)
            .min(1.0);
        for (s, &quota) in allocation.iter().enumerate() {
            for _ in 0..quota {
                let child = self.breed(s, explore_p, rng);
                next.push(child);
            }
            outcome.offspring += quota;
        }

        // Fallback fill.
        while next.len() < size {
            let mut child = self.genomes[rng.random_range(0..self.genomes.len())].clone();
            child.mutate(
                &mut self.tracker,
                &self.layout,
                &self.config.refinement,
                MutationGates::REFINEMENT,
                rng,
            );
            child.fitness = 0.0;
            next.push(child);
            outcome.fallback += 1;
        }

        self.finish(next, outcome)
    }

    fn finish(&mut self, mut next: Vec<Genome>, mut outcome: EvolveOutcome) -> EvolveOutcome {
        next.truncate(self.config.size);
        self.genomes = next;
        self.species.clear_members();
        self.generation += 1;
        outcome.generation = self.generation;
        debug!(
            generation = outcome.generation,
            species = outcome.species_count,
            elites = outcome.elites,
            local_search = outcome.local_search,
            injected = outcome.injected,
            offspring = outcome.offspring,
            fallback = outcome.fallback,
            "population evolved"
        );
        outcome
    }

    /// Discount genomes near the best one. Expects fitness-sorted genomes.
    fn share_fitness_around_best(&mut self) {
        let sharing = &self.config.fitness_sharing;
        if sharing.radius <= 0.0 {
            return;
        }
        let Some((best, rest)) = self.genomes.split_first_mut() else {
            return;
        };
        for genome in rest {
            let d = compatibility_distance(best, genome, &self.config.speciation.compatibility);
            if d < sharing.radius {
                let similarity = 1.0 - d / sharing.radius;
                genome.fitness *= 1.0 - sharing.strength * similarity;
            }
        }
    }

    /// Keep the top genomes and regenerate everything else. Returns the new
    /// genomes and how many top genomes were kept verbatim.
    fn nuclear_reset<R: Rng>(
        &mut self,
        hall_of_fame: Option<&Genome>,
        rng: &mut R,
    ) -> (Vec<Genome>, usize) {
        let size = self.config.size;
        let cfg = self.config.nuclear_reset.clone();

        let kept = cfg.survivors.max(ELITISM_FLOOR).min(self.genomes.len()).min(size);
        let mut next: Vec<Genome> = self.genomes[..kept].to_vec();
        if let Some(champion) = hall_of_fame {
            if !next.iter().any(|g| g.same_genes(champion)) {
                next.push(champion.clone());
            }
        }
        next.truncate(size);
        let survivors = next.len();

        let remaining = size - survivors;
        let fresh = lane_count(remaining, cfg.fresh_fraction).min(remaining);
        let walking = lane_count(remaining, cfg.walking_fraction).min(remaining - fresh);
        let heavy = remaining - fresh - walking;

        info!(
            generation = self.generation,
            survivors, fresh, walking, heavy, "nuclear reset"
        );

        let max_hidden = self.config.diversity.max_hidden;
        for _ in 0..fresh {
            let genome = self.fresh_genome(max_hidden, false, rng);
            next.push(genome);
        }
        for _ in 0..walking {
            let genome = self.fresh_genome(max_hidden, true, rng);
            next.push(genome);
        }
        for i in 0..heavy {
            let mut genome = next[i % survivors.max(1)].clone();
            for _ in 0..cfg.heavy_mutation_rounds {
                genome.mutate(
                    &mut self.tracker,
                    &self.layout,
                    &self.config.exploration,
                    MutationGates::EXPLORATION,
                    rng,
                );
            }
            genome.fitness = 0.0;
            next.push(genome);
        }
        (next, kept)
    }

    /// A new genome with `0..=max_hidden` random hidden nodes.
    fn fresh_genome<R: Rng>(
        &mut self,
        max_hidden: usize,
        walking_bias: bool,
        rng: &mut R,
    ) -> Genome {
        let hidden = rng.random_range(0..=max_hidden);
        let mut genome = Genome::with_hidden_nodes(&self.layout, &mut self.tracker, hidden, rng);
        if walking_bias {
            genome.apply_walking_bias(&self.layout, rng);
        }
        genome
    }

    /// One offspring from species `s`: two tournament winners from the top
    /// half, crossed over (fitter first) and mutated.
    fn breed<R: Rng>(&mut self, s: usize, explore_p: f32, rng: &mut R) -> Genome {
        let members = &self.species.species()[s].members;
        // Members are in population order, which is fitness-sorted.
        let pool = &members[..members.len().div_ceil(2).max(1)];

        let a = tournament(pool, self.config.tournament_size, rng);
        let b = tournament(pool, self.config.tournament_size, rng);
        let (fitter, other) = if by_fitness_desc(&self.genomes[a], &self.genomes[b]).is_le() {
            (a, b)
        } else {
            (b, a)
        };
        let mut child = self.genomes[fitter].crossover(&self.genomes[other], rng);

        let (config, gates) = if rng.random::<f32>() < explore_p {
            (&self.config.exploration, MutationGates::EXPLORATION)
        } else {
            (&self.config.refinement, MutationGates::REFINEMENT)
        };
        child.mutate(&mut self.tracker, &self.layout, config, gates, rng);
        child
    }
}

/// `round(size * fraction)`.
fn lane_count(size: usize, fraction: f32) -> usize {
    (size as f32 * fraction.max(0.0)).round() as usize
}

/// Best of `size` random picks from a fitness-sorted pool of indices.
fn tournament<R: Rng>(pool: &[usize], size: usize, rng: &mut R) -> usize {
    (0..size.max(1))
        .map(|_| rng.random_range(0..pool.len()))
        .min()
        .map_or(pool[0], |pos| pool[pos])
}

/// Split `slots` across species in proportion to adjusted fitness.
///
/// Uses largest-remainder rounding so the counts sum to exactly `slots`.
/// Species with non-positive totals share equally when nobody has positive
/// fitness.
#[must_use]
pub fn allocate_offspring(species: &[Species], slots: usize) -> Vec<usize> {
    if species.is_empty() {
        return Vec::new();
    }
    let total: f32 = species.iter().map(|s| s.adjusted_fitness_sum.max(0.0)).sum();
    let shares: Vec<f32> = species
        .iter()
        .map(|s| {
            if total > 0.0 {
                s.adjusted_fitness_sum.max(0.0) / total * slots as f32
            } else {
                slots as f32 / species.len() as f32
            }
        })
        .collect();

    let mut counts: Vec<usize> = shares.iter().map(|s| s.floor() as usize).collect();
    let assigned: usize = counts.iter().sum();

    let mut order: Vec<usize> = (0..species.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = shares[a] - shares[a].floor();
        let rb = shares[b] - shares[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    for &i in order.iter().cycle().take(slots.saturating_sub(assigned)) {
        counts[i] += 1;
    }
    // Float error can push the floors past the target.
    for &i in order.iter().rev().cycle().take(assigned.saturating_sub(slots)) {
        counts[i] = counts[i].saturating_sub(1);
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    fn small_config() -> PopulationConfig {
        PopulationConfig {
            size: 24,
            ..PopulationConfig::default()
        }
    }

    fn scored(config: PopulationConfig, rng: &mut ChaCha8Rng) -> Population {
        let mut pop = Population::new(config, BodyLayout::biped(), rng).unwrap();
        for i in 0..pop.len() {
            pop.set_fitness(i, (i * 7 % 13) as f32 + 1.0);
        }
        pop
    }

    fn species_with(sums: &[f32]) -> Vec<Species> {
        let layout = BodyLayout::biped();
        let mut tracker = InnovationTracker::new(layout.input_count, layout.output_count);
        let rep = Genome::minimal(&layout, &mut tracker, &mut test_rng());
        sums.iter()
            .enumerate()
            .map(|(i, &sum)| Species {
                id: i as u64,
                representative: rep.clone(),
                members: vec![i],
                adjusted_fitness_sum: sum,
            })
            .collect()
    }

    #[test]
    fn test_initial_population() {
        let mut rng = test_rng();
        let pop = Population::new(small_config(), BodyLayout::biped(), &mut rng).unwrap();
        assert_eq!(pop.len(), 24);
        assert_eq!(pop.generation(), 0);
        assert!(pop.genomes().iter().all(|g| g.hidden_count() <= 2));
    }

    #[test]
    fn test_invalid_size_rejected() {
        let config = PopulationConfig {
            size: 0,
            ..PopulationConfig::default()
        };
        let result = Population::new(config, BodyLayout::biped(), &mut test_rng());
        assert!(matches!(result, Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn test_negative_rate_rejected() {
        let config = PopulationConfig {
            refinement: MutationConfig {
                weight_rate: -0.5,
                ..MutationConfig::refinement()
            },
            ..PopulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stagnation_tiers() {
        let config = PopulationConfig::default();
        assert_eq!(config.stagnation_tier(0), 0);
        assert_eq!(config.stagnation_tier(8), 1);
        assert_eq!(config.stagnation_tier(20), 2);
        assert_eq!(config.stagnation_tier(100), MAX_STAGNATION_TIER);
    }

    #[test]
    fn test_elitism_floor() {
        let config = PopulationConfig {
            elitism: 0,
            ..small_config()
        };
        assert_eq!(config.effective_elitism(), ELITISM_FLOOR);
    }

    #[test]
    fn test_evolve_keeps_size_and_elites() {
        let mut rng = test_rng();
        let mut pop = scored(small_config(), &mut rng);

        let mut ranked = pop.genomes().to_vec();
        ranked.sort_by(by_fitness_desc);

        let outcome = pop.evolve(&EvolveOptions::default(), &mut rng);
        assert_eq!(pop.len(), 24);
        assert_eq!(pop.generation(), 1);
        assert_eq!(outcome.generation, 1);
        assert!(!outcome.nuclear_reset);
        assert_eq!(
            outcome.elites
                + outcome.local_search
                + outcome.injected
                + outcome.offspring
                + outcome.fallback,
            24
        );

        for elite in &ranked[..ELITISM_FLOOR] {
            assert!(pop.genomes().iter().any(|g| g.same_genes(elite)));
        }
    }

    #[test]
    fn test_stagnation_grows_lanes() {
        let mut rng = test_rng();
        let mut calm = scored(small_config(), &mut rng);
        let calm_outcome = calm.evolve(&EvolveOptions::default(), &mut rng);

        let mut stuck = scored(small_config(), &mut rng);
        let stuck_outcome = stuck.evolve(
            &EvolveOptions {
                stagnation: 20,
                ..EvolveOptions::default()
            },
            &mut rng,
        );

        assert_eq!(calm_outcome.injected, 0);
        assert!(stuck_outcome.injected > 0);
        assert!(stuck_outcome.local_search > calm_outcome.local_search);
        assert_eq!(stuck.len(), 24);
    }

    #[test]
    fn test_requested_diversity_without_stagnation() {
        let mut rng = test_rng();
        let mut pop = scored(small_config(), &mut rng);
        let outcome = pop.evolve(
            &EvolveOptions {
                inject_diversity: true,
                ..EvolveOptions::default()
            },
            &mut rng,
        );
        // round(24 * 0.05) = 1
        assert_eq!(outcome.injected, 1);
    }

    #[test]
    fn test_highest_tier_still_keeps_size() {
        let mut rng = test_rng();
        let mut pop = scored(small_config(), &mut rng);
        let outcome = pop.evolve(
            &EvolveOptions {
                stagnation: 35,
                ..EvolveOptions::default()
            },
            &mut rng,
        );
        assert_eq!(outcome.stagnation_tier, MAX_STAGNATION_TIER);
        assert!(!outcome.nuclear_reset);
        assert_eq!(pop.len(), 24);
    }

    #[test]
    fn test_nuclear_reset_keeps_survivors_and_champion() {
        let mut rng = test_rng();
        let mut pop = scored(small_config(), &mut rng);
        let mut ranked = pop.genomes().to_vec();
        ranked.sort_by(by_fitness_desc);

        let layout = BodyLayout::biped();
        let mut other_tracker = InnovationTracker::new(layout.input_count, layout.output_count);
        let champion = Genome::with_hidden_nodes(&layout, &mut other_tracker, 6, &mut rng);

        let outcome = pop.evolve(
            &EvolveOptions {
                stagnation: 45,
                hall_of_fame: Some(&champion),
                inject_diversity: false,
            },
            &mut rng,
        );

        assert!(outcome.nuclear_reset);
        assert_eq!(pop.len(), 24);
        // Sharing never discounts the best genome, so it survives first.
        assert!(pop.genomes()[0].same_genes(&ranked[0]));
        assert!(pop.genomes()[5].same_genes(&champion));
    }

    #[test]
    fn test_nuclear_reset_respects_elitism_floor() {
        let mut rng = test_rng();
        let config = PopulationConfig {
            size: 20,
            nuclear_reset: NuclearResetConfig {
                survivors: 1,
                ..NuclearResetConfig::default()
            },
            ..PopulationConfig::default()
        };
        let mut pop = scored(config, &mut rng);
        let mut ranked = pop.genomes().to_vec();
        ranked.sort_by(by_fitness_desc);

        let outcome = pop.evolve(
            &EvolveOptions {
                stagnation: 45,
                ..EvolveOptions::default()
            },
            &mut rng,
        );

        assert!(outcome.nuclear_reset);
        assert_eq!(outcome.elites, ELITISM_FLOOR);
        assert_eq!(pop.len(), 20);
        // The best genome is never discounted by sharing, so it stays first.
        assert!(pop.genomes()[0].same_genes(&ranked[0]));
        assert!(pop.genomes()[1].fitness > 0.0);
    }

    #[test]
    fn test_fitness_sharing_discounts_only_near_best() {
        let mut rng = test_rng();
        let mut pop = Population::new(small_config(), BodyLayout::biped(), &mut rng).unwrap();

        let best = pop.genomes()[0].clone();
        let mut near = best.clone();
        for conn in near.connections.values_mut() {
            conn.weight += 0.5;
        }
        let mut far = best.clone();
        for _ in 0..6 {
            far.mutate_add_node(&mut pop.tracker, &mut rng);
        }
        assert!(far.hidden_count() >= best.hidden_count() + 5);

        let compat = pop.config.speciation.compatibility.clone();
        let sharing = pop.config.fitness_sharing.clone();
        let near_d = compatibility_distance(&best, &near, &compat);
        assert!(near_d > 0.0 && near_d < sharing.radius);
        assert!(compatibility_distance(&best, &far, &compat) >= sharing.radius);

        pop.genomes = vec![best, near, far];
        for (i, fitness) in [10.0, 8.0, 6.0].into_iter().enumerate() {
            pop.set_fitness(i, fitness);
        }
        pop.share_fitness_around_best();

        let expected = 8.0 * (1.0 - sharing.strength * (1.0 - near_d / sharing.radius));
        assert_eq!(pop.genomes()[0].fitness, 10.0);
        assert!((pop.genomes()[1].fitness - expected).abs() < 1e-5);
        assert!(pop.genomes()[1].fitness < 8.0);
        assert_eq!(pop.genomes()[2].fitness, 6.0);
    }

    #[test]
    fn test_evolve_empties_stale_species_members() {
        let mut rng = test_rng();
        let mut pop = scored(small_config(), &mut rng);
        pop.evolve(&EvolveOptions::default(), &mut rng);

        assert!(!pop.species().is_empty());
        assert!(pop.species().iter().all(|s| s.members.is_empty()));

        pop.speciate(&mut rng);
        let assigned: usize = pop.species().iter().map(|s| s.members.len()).sum();
        assert_eq!(assigned, pop.len());
    }

    #[test]
    fn test_allocation_sums_exactly() {
        let species = species_with(&[3.0, 1.0, 1.0]);
        let counts = allocate_offspring(&species, 10);
        assert_eq!(counts.iter().sum::<usize>(), 10);
        assert_eq!(counts, vec![6, 2, 2]);
    }

    #[test]
    fn test_allocation_largest_remainder() {
        let species = species_with(&[1.0, 1.0, 1.0]);
        let counts = allocate_offspring(&species, 10);
        assert_eq!(counts.iter().sum::<usize>(), 10);
        assert_eq!(counts, vec![4, 3, 3]);
    }

    #[test]
    fn test_allocation_without_positive_fitness() {
        let species = species_with(&[0.0, 0.0]);
        assert_eq!(allocate_offspring(&species, 5), vec![3, 2]);
        assert!(allocate_offspring(&[], 5).is_empty());
    }

    #[test]
    fn test_tournament_prefers_front_of_pool() {
        let pool = [10, 11, 12, 13];
        let mut rng = test_rng();
        let picks: Vec<usize> = (0..200).map(|_| tournament(&pool, 3, &mut rng)).collect();
        let front = picks.iter().filter(|&&p| p == 10).count();
        let back = picks.iter().filter(|&&p| p == 13).count();
        assert!(front > back);
    }
}
