//! # Gait NEAT
//!
//! `NeuroEvolution` of Augmenting Topologies (NEAT) for bipedal gait
//! controllers, with stagnation-adaptive reproduction and a gait-shaped
//! fitness function.
//!
//! ## Features
//!
//! - **Historical Markings**: an [`InnovationTracker`] gives every `(from, to)`
//!   connection and every connection split one run-wide id, so genomes from
//!   different lineages align gene-by-gene
//! - **Arena-Graph Model**: `SlotMap` storage for nodes and connections
//! - **Layered Feed-Forward Networks**: node layers only increase along a
//!   connection, so a [`Network`] evaluates in a single pass
//! - **Adaptive Reproduction**: elitism, a weight-only local-search lane,
//!   diversity injection, fitness sharing and a nuclear reset, scaled by how
//!   long the population has stagnated
//! - **Gait Fitness**: step coverage separates stepping from shuffling, with
//!   efficiency penalties phased in by a performance curriculum
//!
//! ## Quick Start
//!
//! ```rust
//! use gait_neat::{BodyLayout, Genome, InnovationTracker};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let layout = BodyLayout::biped();
//! let mut tracker = InnovationTracker::new(layout.input_count, layout.output_count);
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//!
//! let genome = Genome::with_hidden_nodes(&layout, &mut tracker, 2, &mut rng);
//! let mut network = genome.build_network();
//! let commands = network.activate(&vec![0.0; layout.input_count])?;
//! assert_eq!(commands.len(), layout.output_count);
//! # Ok::<(), gait_neat::NetworkError>(())
//! ```
//!
//! ## Training
//!
//! Plug a physics engine in through [`MotionSimulator`] and let a
//! [`Trainer`] run the evaluate-evolve cycle:
//!
//! ```rust,ignore
//! use gait_neat::{Trainer, TrainingConfig, TracingTelemetry};
//!
//! let config = TrainingConfig::from_toml_str(&std::fs::read_to_string("training.toml")?)?;
//! let mut trainer = Trainer::with_telemetry(config, MyPhysics::new(), TracingTelemetry)?;
//! loop {
//!     // Called from the host's frame loop; 600 control steps per frame.
//!     trainer.tick(600)?;
//! }
//! ```

pub mod config;
pub mod error;
pub mod fitness;
pub mod gene;
pub mod genome;
pub mod innovation;
pub mod layout;
pub mod mutation;
pub mod network;
pub mod population;
pub mod species;
pub mod telemetry;
pub mod training;

// Re-exports for convenience
pub use config::TrainingConfig;
pub use error::{ConfigError, NetworkError, TrainingError};
pub use fitness::{
    EpisodeRecord, FitnessBreakdown, GaitFitnessConfig, GaitScorer, GenerationStats, Milestone,
};
pub use gene::{ConnectionGene, ConnectionKey, NodeGene, NodeKey, NodeType};
pub use genome::Genome;
pub use innovation::{InnovationTracker, SplitRecord};
pub use layout::BodyLayout;
pub use mutation::{MutationConfig, MutationGates};
pub use network::Network;
pub use population::{EvolveOptions, EvolveOutcome, Population, PopulationConfig};
pub use species::{
    compatibility_distance, CompatibilityConfig, Species, SpeciationConfig, SpeciesSet,
};
pub use telemetry::{
    EpisodeReport, GenerationReport, MemoryTelemetry, NullTelemetry, TelemetrySink,
    TracingTelemetry,
};
pub use training::{
    run_episode, BodyState, Episode, EpisodeConfig, EpisodeRecorder, GenerationSnapshot,
    MotionSimulator, SensorEncoder, StagnationTracker, TickSummary, Trainer, TrainerState,
};
