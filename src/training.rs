//! Episode evaluation and the generational training loop.
//!
//! A [`Trainer`] owns the [`Population`] and drives one genome at a time
//! through a [`MotionSimulator`]:
//!
//! ```text
//! Idle -> Evaluating { 0 } -> ... -> Evaluating { n - 1 } -> GenerationComplete -> Idle
//! ```
//!
//! Work is cooperative. [`Trainer::tick`] performs a bounded number of
//! control steps so a host loop can run training at any speed, and
//! [`Trainer::run_generation`] drives one generation to completion.

use std::collections::VecDeque;
use std::f32::consts::{PI, TAU};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TrainingConfig;
use crate::error::{check_non_negative, ConfigError, TrainingError};
use crate::fitness::{EpisodeRecord, FitnessBreakdown, GaitScorer, GenerationStats};
use crate::genome::Genome;
use crate::layout::biped;
use crate::network::Network;
use crate::population::{EvolveOptions, Population};
use crate::telemetry::{EpisodeReport, GenerationReport, NullTelemetry, TelemetrySink};

/// Slack, in control steps, absorbed before rounding a time limit up.
const STEP_TOLERANCE: f32 = 1e-3;

/// Body state reported by the simulator after every control step.
///
/// Positions use x forward, y up and z lateral.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BodyState {
    /// Joint angles in radians, in the layout's output order.
    pub joint_angles: Vec<f32>,
    /// Joint angular velocities in radians per second.
    pub joint_velocities: Vec<f32>,
    pub left_foot_contact: bool,
    pub right_foot_contact: bool,
    pub torso_contact: bool,
    pub head_contact: bool,
    /// Forward pitch of the torso in radians.
    pub torso_tilt: f32,
    /// Pitch rate of the torso in radians per second.
    pub torso_spin: f32,
    pub com_position: [f32; 3],
    pub com_velocity: [f32; 3],
}

/// Physics collaborator: advances the body one control step at a time.
pub trait MotionSimulator {
    /// Number of actuated joints.
    fn joint_count(&self) -> usize;

    /// Put the body back in its initial pose.
    fn reset(&mut self) -> BodyState;

    /// Apply one motor command per joint, each in `[-1, 1]`, for `dt` seconds.
    fn step(&mut self, commands: &[f32], dt: f32) -> BodyState;
}

impl<S: MotionSimulator + ?Sized> MotionSimulator for &mut S {
    fn joint_count(&self) -> usize {
        (**self).joint_count()
    }

    fn reset(&mut self) -> BodyState {
        (**self).reset()
    }

    fn step(&mut self, commands: &[f32], dt: f32) -> BodyState {
        (**self).step(commands, dt)
    }
}

/// Episode timing, sensing and cost constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeConfig {
    /// Control step in seconds.
    pub dt: f32,
    /// Time limit of a training episode.
    pub max_time: f32,
    /// Frequency of the phase input pair, in Hz.
    pub gait_frequency: f32,
    /// The body has fallen once its centre of mass drops below this height.
    pub fall_height: f32,
    /// Standing centre-of-mass height; sensed as an offset.
    pub nominal_height: f32,
    /// Desired forward velocity; sensed as an offset.
    pub target_velocity: f32,
    /// Joint and spin velocities are divided by this before sensing.
    pub velocity_scale: f32,
    /// Torque constant per joint, used for energy accounting.
    pub torque_constants: Vec<f32>,
    /// An alternating foot strike counts as a step only if the body advanced
    /// at least this far since the previous strike.
    pub min_step_length: f32,
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / 60.0,
            max_time: 20.0,
            gait_frequency: 1.2,
            fall_height: 0.5,
            nominal_height: 1.0,
            target_velocity: 0.5,
            velocity_scale: 10.0,
            // hip, knee, ankle for each leg
            torque_constants: vec![1.5, 1.0, 0.6, 1.5, 1.0, 0.6],
            min_step_length: 0.05,
        }
    }
}

impl EpisodeConfig {
    /// Check every setting.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for a non-positive time step, time
    /// limit or velocity scale, or negative constants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("episode.dt", self.dt),
            ("episode.max_time", self.max_time),
            ("episode.velocity_scale", self.velocity_scale),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::out_of_range(
                    field,
                    format!("must be positive, got {value}"),
                ));
            }
        }
        check_non_negative("episode.gait_frequency", self.gait_frequency)?;
        check_non_negative("episode.fall_height", self.fall_height)?;
        check_non_negative("episode.min_step_length", self.min_step_length)?;
        if self.torque_constants.iter().any(|t| !(t.is_finite() && *t >= 0.0)) {
            return Err(ConfigError::out_of_range(
                "episode.torque_constants",
                "torque constants must be finite and non-negative",
            ));
        }
        Ok(())
    }

    /// Control steps in a full training episode.
    #[must_use]
    pub fn steps_per_episode(&self) -> u32 {
        self.steps_for(self.max_time)
    }

    /// Fewest control steps whose elapsed time reaches `time_limit`.
    #[must_use]
    pub fn steps_for(&self, time_limit: f32) -> u32 {
        (time_limit / self.dt - STEP_TOLERANCE).ceil().max(1.0) as u32
    }
}

/// Maps body state to the biped controller's input vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEncoder {
    gait_frequency: f32,
    velocity_scale: f32,
    nominal_height: f32,
    target_velocity: f32,
}

impl SensorEncoder {
    #[must_use]
    pub fn new(config: &EpisodeConfig) -> Self {
        Self {
            gait_frequency: config.gait_frequency,
            velocity_scale: config.velocity_scale,
            nominal_height: config.nominal_height,
            target_velocity: config.target_velocity,
        }
    }

    /// Fill `inputs` for the body `state` at episode time `time`.
    ///
    /// Slots beyond `inputs.len()` are skipped; missing joints read as zero.
    pub fn encode(&self, state: &BodyState, time: f32, inputs: &mut [f32]) {
        use biped::*;

        inputs.fill(0.0);
        let mut set = |index: usize, value: f32| {
            if let Some(slot) = inputs.get_mut(index) {
                *slot = value;
            }
        };

        for j in 0..JOINT_COUNT {
            let angle = state.joint_angles.get(j).copied().unwrap_or(0.0);
            let velocity = state.joint_velocities.get(j).copied().unwrap_or(0.0);
            set(ANGLE_BASE + j, (angle / PI).clamp(-1.0, 1.0));
            set(VELOCITY_BASE + j, (velocity / self.velocity_scale).clamp(-1.0, 1.0));
        }

        set(TORSO_TILT, (state.torso_tilt / PI).clamp(-1.0, 1.0));
        set(TORSO_SPIN, (state.torso_spin / self.velocity_scale).clamp(-1.0, 1.0));
        set(LEFT_FOOT_CONTACT, f32::from(u8::from(state.left_foot_contact)));
        set(RIGHT_FOOT_CONTACT, f32::from(u8::from(state.right_foot_contact)));
        set(COM_HEIGHT, (state.com_position[1] - self.nominal_height).clamp(-1.0, 1.0));
        set(COM_VELOCITY, (state.com_velocity[0] - self.target_velocity).clamp(-1.0, 1.0));

        let phase = TAU * self.gait_frequency * time;
        set(PHASE_SIN, phase.sin());
        set(PHASE_COS, phase.cos());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Foot {
    Left,
    Right,
}

/// Accumulates the trajectory scalars of one episode.
#[derive(Debug, Clone)]
pub struct EpisodeRecorder {
    record: EpisodeRecord,
    dt: f32,
    steps: u32,
    start_x: f32,
    last_com: [f32; 3],
    last_contacts: (bool, bool),
    last_strike: Option<(Foot, f32)>,
    fall_height: f32,
    min_step_length: f32,
    torque_constants: Vec<f32>,
}

impl EpisodeRecorder {
    /// Start recording from the body's initial state.
    #[must_use]
    pub fn new(config: &EpisodeConfig, max_time: f32, initial: &BodyState) -> Self {
        Self {
            record: EpisodeRecord {
                max_time,
                ..EpisodeRecord::default()
            },
            dt: config.dt,
            steps: 0,
            start_x: initial.com_position[0],
            last_com: initial.com_position,
            last_contacts: (initial.left_foot_contact, initial.right_foot_contact),
            last_strike: None,
            fall_height: config.fall_height,
            min_step_length: config.min_step_length,
            torque_constants: config.torque_constants.clone(),
        }
    }

    /// Torso or head touching the ground, or the centre of mass too low.
    #[must_use]
    pub fn is_fallen(&self, state: &BodyState) -> bool {
        state.torso_contact || state.head_contact || state.com_position[1] < self.fall_height
    }

    /// Account for one control step. Returns `true` once the body has fallen.
    pub fn record_step(&mut self, state: &BodyState, commands: &[f32]) -> bool {
        let dt = self.dt;
        let com = state.com_position;
        let contacts = (state.left_foot_contact, state.right_foot_contact);

        self.steps += 1;
        self.record.survival_time = self.steps as f32 * dt;
        self.record.distance = com[0] - self.start_x;

        if contacts.0 && !self.last_contacts.0 {
            self.foot_strike(Foot::Left, com[0]);
        }
        if contacts.1 && !self.last_contacts.1 {
            self.foot_strike(Foot::Right, com[0]);
        }

        match (contacts.0, contacts.1) {
            (true, true) if self.last_contacts == (true, true) => {
                let dx = com[0] - self.last_com[0];
                let dz = com[2] - self.last_com[2];
                self.record.slip_cost += (dx * dx + dz * dz).sqrt();
            }
            (true, false) | (false, true) => self.record.single_support_time += dt,
            _ => {}
        }

        for (j, &command) in commands.iter().enumerate() {
            let velocity = state.joint_velocities.get(j).copied().unwrap_or(0.0);
            let torque = self.torque_constants.get(j).copied().unwrap_or(1.0);
            self.record.energy += command.abs() * velocity.abs() * torque * dt;
            self.record.joint_cost += command * command * dt;
        }

        self.last_com = com;
        self.last_contacts = contacts;

        let fallen = self.is_fallen(state);
        self.record.fallen |= fallen;
        fallen
    }

    fn foot_strike(&mut self, foot: Foot, x: f32) {
        self.record.raw_steps += 1;
        if let Some((previous, previous_x)) = self.last_strike {
            let advance = x - previous_x;
            if previous != foot && advance >= self.min_step_length {
                self.record.effective_steps += 1;
                self.record.step_distance += advance;
            }
        }
        self.last_strike = Some((foot, x));
    }

    /// Record so far.
    #[must_use]
    pub fn record(&self) -> &EpisodeRecord {
        &self.record
    }

    /// Control steps recorded.
    #[must_use]
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Finish the episode for a controller with `hidden_nodes` hidden nodes.
    #[must_use]
    pub fn finish(mut self, hidden_nodes: usize) -> EpisodeRecord {
        self.record.hidden_nodes = hidden_nodes;
        self.record
    }
}

/// One genome driving the simulator, advanced a control step at a time.
#[derive(Debug, Clone)]
pub struct Episode {
    network: Network,
    recorder: EpisodeRecorder,
    state: BodyState,
    inputs: Vec<f32>,
    outputs: Vec<f32>,
    hidden_nodes: usize,
    step_limit: u32,
    fallen: bool,
}

impl Episode {
    /// Reset the simulator and prepare `genome` for an episode of at most
    /// `time_limit` seconds.
    pub fn new<S: MotionSimulator + ?Sized>(
        genome: &Genome,
        simulator: &mut S,
        config: &EpisodeConfig,
        time_limit: f32,
    ) -> Self {
        let state = simulator.reset();
        let network = genome.build_network();
        Self {
            inputs: vec![0.0; network.num_inputs()],
            outputs: vec![0.0; network.num_outputs()],
            recorder: EpisodeRecorder::new(config, time_limit, &state),
            network,
            state,
            hidden_nodes: genome.hidden_count(),
            step_limit: config.steps_for(time_limit),
            fallen: false,
        }
    }

    /// Advance one control step. Returns `true` once the episode is over.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Network`] if the controller cannot be
    /// evaluated on the encoded sensors.
    pub fn step<S: MotionSimulator + ?Sized>(
        &mut self,
        simulator: &mut S,
        encoder: &SensorEncoder,
        dt: f32,
    ) -> Result<bool, TrainingError> {
        if self.is_over() {
            return Ok(true);
        }
        let time = self.recorder.steps() as f32 * dt;
        encoder.encode(&self.state, time, &mut self.inputs);
        self.network.activate_into(&self.inputs, &mut self.outputs)?;
        self.state = simulator.step(&self.outputs, dt);
        self.fallen = self.recorder.record_step(&self.state, &self.outputs);
        Ok(self.is_over())
    }

    #[must_use]
    pub fn is_over(&self) -> bool {
        self.fallen || self.recorder.steps() >= self.step_limit
    }

    #[must_use]
    pub fn record(&self) -> &EpisodeRecord {
        self.recorder.record()
    }

    #[must_use]
    pub fn finish(self) -> EpisodeRecord {
        self.recorder.finish(self.hidden_nodes)
    }
}

/// Run `genome` until it falls or `time_limit` seconds pass.
///
/// # Errors
///
/// Returns [`TrainingError::Network`] if the controller cannot be evaluated.
pub fn run_episode<S: MotionSimulator + ?Sized>(
    genome: &Genome,
    simulator: &mut S,
    config: &EpisodeConfig,
    time_limit: f32,
) -> Result<EpisodeRecord, TrainingError> {
    let encoder = SensorEncoder::new(config);
    let mut episode = Episode::new(genome, simulator, config, time_limit);
    while !episode.step(simulator, &encoder, config.dt)? {}
    Ok(episode.finish())
}

/// Generations without best-fitness improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagnationTracker {
    best: Option<f32>,
    count: u32,
    epsilon: f32,
}

impl StagnationTracker {
    /// Improvements must exceed `epsilon` to reset the count.
    #[must_use]
    pub fn new(epsilon: f32) -> Self {
        Self {
            best: None,
            count: 0,
            epsilon,
        }
    }

    /// Feed one generation's best fitness. Returns the updated count.
    pub fn update(&mut self, best_fitness: f32) -> u32 {
        match self.best {
            Some(best) if best_fitness <= best + self.epsilon => self.count += 1,
            _ => {
                self.best = Some(best_fitness);
                self.count = 0;
            }
        }
        self.count
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn best(&self) -> Option<f32> {
        self.best
    }

    /// Clear the count, keeping the best fitness seen.
    pub fn clear(&mut self) {
        self.count = 0;
    }
}

/// Where the trainer is within the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Evaluating { index: usize },
    GenerationComplete,
}

/// What a [`Trainer::tick`] call got through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSummary {
    pub steps: u32,
    pub episodes_finished: usize,
    pub generations: Vec<GenerationReport>,
}

/// In-memory record of a finished generation.
#[derive(Debug, Clone)]
pub struct GenerationSnapshot {
    pub report: GenerationReport,
    /// Best genome of the generation, with its fitness.
    pub best: Genome,
}

enum Advance {
    Transition,
    Stepped,
    EpisodeFinished,
    GenerationFinished(GenerationReport),
}

/// Owns the population and runs the evaluate-evolve cycle.
pub struct Trainer<S, T = NullTelemetry> {
    population: Population,
    scorer: GaitScorer,
    episode_config: EpisodeConfig,
    encoder: SensorEncoder,
    simulator: S,
    telemetry: T,
    rng: ChaCha8Rng,
    state: TrainerState,
    active: Option<Episode>,
    results: Vec<Option<(FitnessBreakdown, EpisodeRecord)>>,
    skipped: bool,
    stagnation: StagnationTracker,
    hall_of_fame: Option<Genome>,
    previous: Option<GenerationStats>,
    history: VecDeque<GenerationSnapshot>,
    history_capacity: usize,
    inject_diversity: bool,
}

impl<S: MotionSimulator> Trainer<S> {
    /// A trainer without telemetry.
    ///
    /// # Errors
    ///
    /// See [`Trainer::with_telemetry`].
    pub fn new(config: TrainingConfig, simulator: S) -> Result<Self, TrainingError> {
        Self::with_telemetry(config, simulator, NullTelemetry)
    }
}

impl<S: MotionSimulator, T: TelemetrySink> Trainer<S, T> {
    /// Validate `config`, seed the RNG and create the first generation.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Config`] for invalid configuration and
    /// [`TrainingError::JointCountMismatch`] if the simulator's joints do not
    /// match the layout's outputs.
    pub fn with_telemetry(
        config: TrainingConfig,
        simulator: S,
        telemetry: T,
    ) -> Result<Self, TrainingError> {
        config.validate()?;
        if simulator.joint_count() != config.layout.output_count {
            return Err(TrainingError::JointCountMismatch {
                expected: config.layout.output_count,
                actual: simulator.joint_count(),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let population = Population::new(config.population, config.layout, &mut rng)?;
        info!(seed = config.seed, size = population.len(), "trainer created");

        Ok(Self {
            population,
            scorer: GaitScorer::new(config.fitness),
            encoder: SensorEncoder::new(&config.episode),
            episode_config: config.episode,
            simulator,
            telemetry,
            rng,
            state: TrainerState::Idle,
            active: None,
            results: Vec::new(),
            skipped: false,
            stagnation: StagnationTracker::new(config.stagnation_epsilon),
            hall_of_fame: None,
            previous: None,
            history: VecDeque::with_capacity(config.history_capacity),
            history_capacity: config.history_capacity,
            inject_diversity: config.inject_diversity,
        })
    }

    #[must_use]
    pub fn state(&self) -> TrainerState {
        self.state
    }

    #[must_use]
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Generation currently being evaluated.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.population.generation()
    }

    /// Best genome ever evaluated.
    #[must_use]
    pub fn hall_of_fame(&self) -> Option<&Genome> {
        self.hall_of_fame.as_ref()
    }

    #[must_use]
    pub fn stagnation(&self) -> &StagnationTracker {
        &self.stagnation
    }

    /// Statistics of the last finished generation.
    #[must_use]
    pub fn previous_stats(&self) -> Option<&GenerationStats> {
        self.previous.as_ref()
    }

    /// Most recent generations, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &GenerationSnapshot> {
        self.history.iter()
    }

    #[must_use]
    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    #[must_use]
    pub fn scorer(&self) -> &GaitScorer {
        &self.scorer
    }

    /// Run up to `max_steps` control steps, finishing episodes and
    /// generations as they are reached.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Network`] if a controller cannot be evaluated.
    pub fn tick(&mut self, max_steps: u32) -> Result<TickSummary, TrainingError> {
        let mut summary = TickSummary::default();
        while summary.steps < max_steps {
            match self.advance()? {
                Advance::Transition => {}
                Advance::Stepped => summary.steps += 1,
                Advance::EpisodeFinished => {
                    summary.steps += 1;
                    summary.episodes_finished += 1;
                }
                Advance::GenerationFinished(report) => summary.generations.push(report),
            }
        }
        Ok(summary)
    }

    /// Evaluate every remaining genome and evolve.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Network`] if a controller cannot be evaluated.
    pub fn run_generation(&mut self) -> Result<GenerationReport, TrainingError> {
        loop {
            if let Advance::GenerationFinished(report) = self.advance()? {
                return Ok(report);
            }
        }
    }

    /// Abort the current generation. Genomes not yet scored get fitness 0.
    pub fn skip_generation(&mut self) -> GenerationReport {
        let first_pending = match self.state {
            TrainerState::Idle => {
                self.begin_generation();
                0
            }
            TrainerState::Evaluating { index } => index,
            TrainerState::GenerationComplete => self.population.len(),
        };
        self.active = None;
        for index in first_pending..self.population.len() {
            self.population.set_fitness(index, 0.0);
        }
        if first_pending < self.population.len() {
            self.skipped = true;
            debug!(
                generation = self.generation(),
                skipped = self.population.len() - first_pending,
                "generation skipped"
            );
        }
        self.state = TrainerState::GenerationComplete;
        self.complete_generation()
    }

    /// Run `genome` without a time limit until it falls, stopping after
    /// `safety_limit` seconds. An in-progress training episode restarts
    /// from scratch afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Network`] if the genome does not fit the
    /// sensor layout.
    pub fn replay(
        &mut self,
        genome: &Genome,
        safety_limit: f32,
    ) -> Result<EpisodeRecord, TrainingError> {
        self.active = None;
        run_episode(genome, &mut self.simulator, &self.episode_config, safety_limit)
    }

    /// Score `genome` against the current curriculum as if it were trained.
    ///
    /// # Errors
    ///
    /// Returns [`TrainingError::Network`] if the genome does not fit the
    /// sensor layout.
    pub fn evaluate(
        &mut self,
        genome: &Genome,
    ) -> Result<(FitnessBreakdown, EpisodeRecord), TrainingError> {
        self.active = None;
        let record = run_episode(
            genome,
            &mut self.simulator,
            &self.episode_config,
            self.episode_config.max_time,
        )?;
        let breakdown = self.scorer.score(&record, self.generation(), self.previous.as_ref());
        Ok((breakdown, record))
    }

    fn advance(&mut self) -> Result<Advance, TrainingError> {
        match self.state {
            TrainerState::Idle => {
                self.begin_generation();
                Ok(Advance::Transition)
            }
            TrainerState::GenerationComplete => {
                Ok(Advance::GenerationFinished(self.complete_generation()))
            }
            TrainerState::Evaluating { index } => {
                let episode = match &mut self.active {
                    Some(episode) => episode,
                    slot => slot.insert(Episode::new(
                        &self.population.genomes()[index],
                        &mut self.simulator,
                        &self.episode_config,
                        self.episode_config.max_time,
                    )),
                };
                if episode.step(&mut self.simulator, &self.encoder, self.episode_config.dt)? {
                    self.finish_episode(index);
                    Ok(Advance::EpisodeFinished)
                } else {
                    Ok(Advance::Stepped)
                }
            }
        }
    }

    fn begin_generation(&mut self) {
        self.results = vec![None; self.population.len()];
        self.skipped = false;
        self.active = None;
        self.state = TrainerState::Evaluating { index: 0 };
    }

    fn finish_episode(&mut self, index: usize) {
        let Some(episode) = self.active.take() else {
            return;
        };
        let record = episode.finish();
        let generation = self.generation();
        let breakdown = self.scorer.score(&record, generation, self.previous.as_ref());
        self.population.set_fitness(index, breakdown.total);

        self.telemetry.episode(&EpisodeReport {
            generation,
            genome_index: index,
            fitness: breakdown.total,
            breakdown,
            record: record.clone(),
        });
        if let Some(slot) = self.results.get_mut(index) {
            *slot = Some((breakdown, record));
        }

        self.state = if index + 1 < self.population.len() {
            TrainerState::Evaluating { index: index + 1 }
        } else {
            TrainerState::GenerationComplete
        };
    }

    fn complete_generation(&mut self) -> GenerationReport {
        let generation = self.generation();
        let genomes = self.population.genomes();

        let mut best_index = 0;
        let mut sum = 0.0;
        let mut worst = f32::INFINITY;
        for (i, genome) in genomes.iter().enumerate() {
            if genome.fitness > genomes[best_index].fitness {
                best_index = i;
            }
            sum += genome.fitness;
            worst = worst.min(genome.fitness);
        }
        let best = genomes[best_index].clone();
        let average = sum / genomes.len().max(1) as f32;

        let (best_breakdown, best_record) = self
            .results
            .get(best_index)
            .cloned()
            .flatten()
            .unwrap_or_default();
        let best_distance = self
            .results
            .iter()
            .flatten()
            .map(|(_, record)| record.distance)
            .fold(0.0, f32::max);

        if self.hall_of_fame.as_ref().map_or(true, |h| best.fitness > h.fitness) {
            self.hall_of_fame = Some(best.clone());
        }
        let stagnation = self.stagnation.update(best.fitness);

        let outcome = self.population.evolve(
            &EvolveOptions {
                stagnation,
                hall_of_fame: self.hall_of_fame.as_ref(),
                inject_diversity: self.inject_diversity,
            },
            &mut self.rng,
        );
        if outcome.nuclear_reset {
            self.stagnation.clear();
        }

        let report = GenerationReport {
            generation,
            best_fitness: best.fitness,
            average_fitness: average,
            worst_fitness: if worst.is_finite() { worst } else { 0.0 },
            best_breakdown,
            best_distance: best_record.distance,
            best_hidden_nodes: best.hidden_count(),
            best_enabled_connections: best.num_enabled_connections(),
            species_count: outcome.species_count,
            compatibility_threshold: self.population.threshold(),
            stagnation,
            skipped: self.skipped,
            nuclear_reset: outcome.nuclear_reset,
        };
        self.telemetry.generation(&report);

        self.previous = Some(GenerationStats {
            generation,
            best_fitness: best.fitness,
            average_fitness: average,
            best_distance,
        });
        if self.history_capacity > 0 {
            if self.history.len() >= self.history_capacity {
                self.history.pop_front();
            }
            self.history.push_back(GenerationSnapshot {
                report: report.clone(),
                best,
            });
        }

        self.results.clear();
        self.skipped = false;
        self.state = TrainerState::Idle;
        report
    }
}
