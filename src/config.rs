//! Aggregate training configuration.
//!
//! Every section has defaults, so a TOML document only needs the values it
//! changes:
//!
//! ```toml
//! seed = 7
//!
//! [population]
//! size = 80
//!
//! [population.refinement]
//! weight_rate = 0.6
//!
//! [fitness]
//! gait_threshold = 0.35
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{check_non_negative, ConfigError};
use crate::fitness::GaitFitnessConfig;
use crate::layout::{biped, BodyLayout};
use crate::population::PopulationConfig;
use crate::training::EpisodeConfig;

/// Everything a [`Trainer`](crate::Trainer) needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Seed of the single RNG stream used for the whole run.
    pub seed: u64,
    pub layout: BodyLayout,
    pub population: PopulationConfig,
    pub fitness: GaitFitnessConfig,
    pub episode: EpisodeConfig,
    /// Best fitness must improve by more than this to reset stagnation.
    pub stagnation_epsilon: f32,
    /// Generation snapshots kept in memory.
    pub history_capacity: usize,
    /// Inject a baseline share of fresh genomes even without stagnation.
    pub inject_diversity: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            layout: BodyLayout::biped(),
            population: PopulationConfig::default(),
            fitness: GaitFitnessConfig::default(),
            episode: EpisodeConfig::default(),
            stagnation_epsilon: 0.01,
            history_capacity: 50,
            inject_diversity: false,
        }
    }
}

impl TrainingConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::OutOfRange`] for invalid values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout.validate()?;
        if self.layout.input_count != biped::INPUT_COUNT {
            return Err(ConfigError::out_of_range(
                "layout.input_count",
                format!("the sensor encoder produces {} inputs", biped::INPUT_COUNT),
            ));
        }
        if self.episode.torque_constants.len() != self.layout.output_count {
            return Err(ConfigError::out_of_range(
                "episode.torque_constants",
                format!("expected one constant per joint ({})", self.layout.output_count),
            ));
        }
        self.population.validate()?;
        self.fitness.validate()?;
        self.episode.validate()?;
        check_non_negative("stagnation_epsilon", self.stagnation_epsilon)
    }
}
