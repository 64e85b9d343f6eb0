//! One-way training telemetry.
//!
//! The trainer reports every finished episode and every finished generation
//! to a [`TelemetrySink`]. Nothing flows back into training.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fitness::{EpisodeRecord, FitnessBreakdown};

/// One evaluated genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub generation: u32,
    /// Index of the genome within its generation.
    pub genome_index: usize,
    pub fitness: f32,
    pub breakdown: FitnessBreakdown,
    pub record: EpisodeRecord,
}

/// Aggregates of one finished generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub generation: u32,
    pub best_fitness: f32,
    pub average_fitness: f32,
    pub worst_fitness: f32,
    /// Gait breakdown of the best genome.
    pub best_breakdown: FitnessBreakdown,
    pub best_distance: f32,
    pub best_hidden_nodes: usize,
    pub best_enabled_connections: usize,
    pub species_count: usize,
    pub compatibility_threshold: f32,
    /// Generations without improvement after this one.
    pub stagnation: u32,
    /// Pending genomes were skipped and scored at zero.
    pub skipped: bool,
    /// The following reproduction step was a nuclear reset.
    pub nuclear_reset: bool,
}

/// Receives training telemetry.
pub trait TelemetrySink {
    fn episode(&mut self, report: &EpisodeReport);
    fn generation(&mut self, report: &GenerationReport);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetry;

impl TelemetrySink for NullTelemetry {
    fn episode(&mut self, _report: &EpisodeReport) {}
    fn generation(&mut self, _report: &GenerationReport) {}
}

/// Emits `tracing` events: `debug` per episode, `info` per generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn episode(&mut self, report: &EpisodeReport) {
        debug!(
            generation = report.generation,
            genome = report.genome_index,
            fitness = report.fitness,
            distance = report.record.distance,
            coverage = report.breakdown.step_coverage,
            survived = report.record.survival_time,
            fallen = report.record.fallen,
            "episode finished"
        );
    }

    fn generation(&mut self, report: &GenerationReport) {
        info!(
            generation = report.generation,
            best = report.best_fitness,
            average = report.average_fitness,
            worst = report.worst_fitness,
            best_distance = report.best_distance,
            hidden = report.best_hidden_nodes,
            connections = report.best_enabled_connections,
            species = report.species_count,
            threshold = report.compatibility_threshold,
            stagnation = report.stagnation,
            skipped = report.skipped,
            "generation finished"
        );
    }
}

/// Keeps every report in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTelemetry {
    pub episodes: Vec<EpisodeReport>,
    pub generations: Vec<GenerationReport>,
}

impl MemoryTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn episode(&mut self, report: &EpisodeReport) {
        self.episodes.push(report.clone());
    }

    fn generation(&mut self, report: &GenerationReport) {
        self.generations.push(report.clone());
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for &mut T {
    fn episode(&mut self, report: &EpisodeReport) {
        (**self).episode(report);
    }

    fn generation(&mut self, report: &GenerationReport) {
        (**self).generation(report);
    }
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Box<T> {
    fn episode(&mut self, report: &EpisodeReport) {
        (**self).episode(report);
    }

    fn generation(&mut self, report: &GenerationReport) {
        (**self).generation(report);
    }
}
