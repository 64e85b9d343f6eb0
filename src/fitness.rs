//! Gait fitness scoring.
//!
//! [`GaitScorer`] turns one episode's accumulated trajectory scalars into a
//! scalar fitness. Step coverage gates most of the reward so that sliding
//! ("shuffling") never beats discrete alternating steps, and efficiency
//! penalties are phased in by a performance-based curriculum level.

use serde::{Deserialize, Serialize};

use crate::error::{check_non_negative, check_probability, ConfigError};

/// Completion tolerance on survival time, in seconds.
const COMPLETION_EPSILON: f32 = 1e-4;

/// Accumulated scalars from one evaluation episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Forward displacement of the centre of mass. Negative when moving backwards.
    pub distance: f32,
    /// Forward distance covered between alternating foot strikes.
    pub step_distance: f32,
    /// Every detected foot strike.
    pub raw_steps: u32,
    /// Foot strikes that alternated feet and advanced the body.
    pub effective_steps: u32,
    /// Centre-of-mass drift while both feet were planted.
    pub slip_cost: f32,
    /// Time spent with exactly one foot on the ground.
    pub single_support_time: f32,
    /// Simulated time survived.
    pub survival_time: f32,
    /// Time limit of the episode.
    pub max_time: f32,
    pub fallen: bool,
    /// Mechanical energy spent by the joint motors.
    pub energy: f32,
    /// Sum of squared motor commands.
    pub joint_cost: f32,
    /// Hidden-node count of the controller.
    pub hidden_nodes: usize,
}

impl EpisodeRecord {
    /// Share of the distance attributable to steps, in `[0, 1]`.
    #[must_use]
    pub fn step_coverage(&self) -> f32 {
        if self.distance <= 0.0 {
            return 0.0;
        }
        self.step_distance.clamp(0.0, self.distance) / self.distance
    }

    /// Average forward velocity over the survived time.
    #[must_use]
    pub fn average_velocity(&self) -> f32 {
        if self.survival_time <= 0.0 {
            return 0.0;
        }
        self.distance / self.survival_time
    }

    /// Survived share of the episode, in `[0, 1]`.
    #[must_use]
    pub fn survival_fraction(&self) -> f32 {
        if self.max_time <= 0.0 {
            return 0.0;
        }
        (self.survival_time / self.max_time).clamp(0.0, 1.0)
    }

    /// Ran to the time limit without falling.
    #[must_use]
    pub fn completed(&self) -> bool {
        !self.fallen
            && self.max_time > 0.0
            && self.survival_time + COMPLETION_EPSILON >= self.max_time
    }
}

/// Aggregates of the previous generation, used by the curriculum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    pub generation: u32,
    pub best_fitness: f32,
    pub average_fitness: f32,
    pub best_distance: f32,
}

/// A one-off bonus paid once a value reaches `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub threshold: f32,
    pub bonus: f32,
}

impl Milestone {
    #[must_use]
    pub const fn new(threshold: f32, bonus: f32) -> Self {
        Self { threshold, bonus }
    }
}

fn milestone_total(milestones: &[Milestone], value: f32) -> f32 {
    milestones
        .iter()
        .filter(|m| value >= m.threshold)
        .map(|m| m.bonus)
        .sum()
}

/// Every shaping constant of the gait scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitFitnessConfig {
    /// Step coverage at which a gait counts as stepping rather than shuffling.
    pub gait_threshold: f32,
    /// Reward per metre of forward distance.
    pub distance_weight: f32,
    /// Shuffling distance credit is capped at this many metres...
    pub shuffle_distance_cap: f32,
    /// ...and multiplied by this factor.
    pub shuffle_multiplier: f32,
    /// Stepping gaits earn `distance credit * gain * coverage` on top.
    pub gait_bonus_gain: f32,
    /// Reward per second of single support, stepping gaits only.
    pub single_support_weight: f32,
    /// Paid when distance reaches each threshold, stepping gaits only.
    pub distance_milestones: Vec<Milestone>,
    /// Paid when average velocity reaches each threshold, stepping gaits
    /// that completed the episode only.
    pub velocity_milestones: Vec<Milestone>,
    /// Reward per second survived.
    pub survival_weight: f32,
    /// Reward for reaching the time limit upright.
    pub completion_bonus: f32,
    /// Flat part of the falling penalty.
    pub fall_penalty_base: f32,
    /// Falling penalty per metre covered, scaled by the survived fraction.
    pub fall_penalty_scale: f32,
    /// Backward travel beyond this distance is penalised.
    pub backward_tolerance: f32,
    pub backward_penalty: f32,
    /// Travel below this distance counts as standing still.
    pub standing_distance: f32,
    pub standing_penalty: f32,
    /// Efficiency weights, scaled by the curriculum level.
    pub energy_weight: f32,
    pub slip_weight: f32,
    pub joint_cost_weight: f32,
    pub complexity_weight: f32,
    /// Generations scored without efficiency pressure.
    pub warmup_generations: u32,
    /// Best distance at which the curriculum level reaches 1.
    pub curriculum_span: f32,
    /// Fitness never drops below `floor_base + survival_time * floor_survival_weight`.
    pub floor_base: f32,
    pub floor_survival_weight: f32,
}

impl Default for GaitFitnessConfig {
    fn default() -> Self {
        Self {
            gait_threshold: 0.3,
            distance_weight: 10.0,
            shuffle_distance_cap: 2.0,
            shuffle_multiplier: 0.3,
            gait_bonus_gain: 1.0,
            single_support_weight: 2.0,
            distance_milestones: vec![
                Milestone::new(2.0, 10.0),
                Milestone::new(5.0, 25.0),
                Milestone::new(10.0, 50.0),
            ],
            velocity_milestones: vec![Milestone::new(0.3, 15.0), Milestone::new(0.6, 30.0)],
            survival_weight: 1.0,
            completion_bonus: 30.0,
            fall_penalty_base: 5.0,
            fall_penalty_scale: 2.0,
            backward_tolerance: 0.1,
            backward_penalty: 20.0,
            standing_distance: 0.1,
            standing_penalty: 10.0,
            energy_weight: 0.01,
            slip_weight: 1.0,
            joint_cost_weight: 0.005,
            complexity_weight: 0.5,
            warmup_generations: 5,
            curriculum_span: 10.0,
            floor_base: 1.0,
            floor_survival_weight: 2.0,
        }
    }
}

impl GaitFitnessConfig {
    /// Check every constant.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for negative weights, a gait
    /// threshold outside `[0, 1]` or a non-positive curriculum span.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_probability("fitness.gait_threshold", self.gait_threshold)?;
        for (field, value) in [
            ("fitness.distance_weight", self.distance_weight),
            ("fitness.shuffle_distance_cap", self.shuffle_distance_cap),
            ("fitness.shuffle_multiplier", self.shuffle_multiplier),
            ("fitness.gait_bonus_gain", self.gait_bonus_gain),
            ("fitness.single_support_weight", self.single_support_weight),
            ("fitness.survival_weight", self.survival_weight),
            ("fitness.completion_bonus", self.completion_bonus),
            ("fitness.fall_penalty_base", self.fall_penalty_base),
            ("fitness.fall_penalty_scale", self.fall_penalty_scale),
            ("fitness.backward_tolerance", self.backward_tolerance),
            ("fitness.backward_penalty", self.backward_penalty),
            ("fitness.standing_distance", self.standing_distance),
            ("fitness.standing_penalty", self.standing_penalty),
            ("fitness.energy_weight", self.energy_weight),
            ("fitness.slip_weight", self.slip_weight),
            ("fitness.joint_cost_weight", self.joint_cost_weight),
            ("fitness.complexity_weight", self.complexity_weight),
            ("fitness.floor_base", self.floor_base),
            ("fitness.floor_survival_weight", self.floor_survival_weight),
        ] {
            check_non_negative(field, value)?;
        }
        if self.curriculum_span <= 0.0 || !self.curriculum_span.is_finite() {
            return Err(ConfigError::out_of_range(
                "fitness.curriculum_span",
                format!("must be positive, got {}", self.curriculum_span),
            ));
        }
        Ok(())
    }
}

/// Every term that went into one fitness value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessBreakdown {
    pub step_coverage: f32,
    /// Coverage reached the gait threshold.
    pub stepping: bool,
    pub curriculum_level: f32,
    pub distance_credit: f32,
    pub gait_bonus: f32,
    pub single_support_bonus: f32,
    pub milestone_bonus: f32,
    pub survival_bonus: f32,
    pub completion_bonus: f32,
    pub fall_penalty: f32,
    pub backward_penalty: f32,
    pub standing_penalty: f32,
    pub efficiency_penalty: f32,
    /// Minimum fitness for this episode.
    pub floor: f32,
    pub total: f32,
}

impl FitnessBreakdown {
    #[must_use]
    pub fn rewards(&self) -> f32 {
        self.distance_credit
            + self.gait_bonus
            + self.single_support_bonus
            + self.milestone_bonus
            + self.survival_bonus
            + self.completion_bonus
    }

    #[must_use]
    pub fn penalties(&self) -> f32 {
        self.fall_penalty + self.backward_penalty + self.standing_penalty + self.efficiency_penalty
    }
}

/// Scores episodes.
#[derive(Debug, Clone, Default)]
pub struct GaitScorer {
    config: GaitFitnessConfig,
}

impl GaitScorer {
    #[must_use]
    pub fn new(config: GaitFitnessConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &GaitFitnessConfig {
        &self.config
    }

    /// Efficiency pressure in `[0, 1]` for episodes of `generation`.
    ///
    /// Zero during warm-up or without previous statistics, otherwise the
    /// previous generation's best distance relative to the curriculum span.
    #[must_use]
    pub fn curriculum_level(&self, generation: u32, previous: Option<&GenerationStats>) -> f32 {
        match previous {
            Some(stats) if generation >= self.config.warmup_generations => {
                (stats.best_distance / self.config.curriculum_span).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    /// Score one episode.
    #[must_use]
    pub fn score(
        &self,
        record: &EpisodeRecord,
        generation: u32,
        previous: Option<&GenerationStats>,
    ) -> FitnessBreakdown {
        let c = &self.config;
        let coverage = record.step_coverage();
        let stepping = coverage >= c.gait_threshold;
        let forward = record.distance.max(0.0);

        let mut b = FitnessBreakdown {
            step_coverage: coverage,
            stepping,
            curriculum_level: self.curriculum_level(generation, previous),
            ..FitnessBreakdown::default()
        };

        if stepping {
            b.distance_credit = forward * c.distance_weight;
            b.gait_bonus = b.distance_credit * c.gait_bonus_gain * coverage;
            b.single_support_bonus = record.single_support_time.max(0.0) * c.single_support_weight;
            b.milestone_bonus = milestone_total(&c.distance_milestones, forward);
            if record.completed() {
                b.milestone_bonus +=
                    milestone_total(&c.velocity_milestones, record.average_velocity());
            }
        } else {
            b.distance_credit =
                forward.min(c.shuffle_distance_cap) * c.distance_weight * c.shuffle_multiplier;
        }

        b.survival_bonus = record.survival_time.max(0.0) * c.survival_weight;
        if record.completed() {
            b.completion_bonus = c.completion_bonus;
        }

        if record.fallen {
            b.fall_penalty =
                c.fall_penalty_base + c.fall_penalty_scale * forward * record.survival_fraction();
        }
        if record.distance < -c.backward_tolerance {
            b.backward_penalty = c.backward_penalty;
        } else if record.distance.abs() < c.standing_distance {
            b.standing_penalty = c.standing_penalty;
        }

        b.efficiency_penalty = b.curriculum_level
            * (c.energy_weight * record.energy.max(0.0)
                + c.slip_weight * record.slip_cost.max(0.0)
                + c.joint_cost_weight * record.joint_cost.max(0.0)
                + c.complexity_weight * record.hidden_nodes as f32);

        b.floor = c.floor_base + record.survival_time.max(0.0) * c.floor_survival_weight;
        b.total = (b.rewards() - b.penalties()).max(b.floor);
        b
    }

    /// Score one episode, returning only the total.
    #[must_use]
    pub fn fitness(
        &self,
        record: &EpisodeRecord,
        generation: u32,
        previous: Option<&GenerationStats>,
    ) -> f32 {
        self.score(record, generation, previous).total
    }
}
