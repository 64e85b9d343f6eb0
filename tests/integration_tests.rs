//! Integration tests for gait-neat.

use gait_neat::layout::biped;
use gait_neat::population::StagnationConfig;
use gait_neat::{
    compatibility_distance, BodyLayout, BodyState, CompatibilityConfig, EvolveOptions, Genome,
    InnovationTracker, MemoryTelemetry, MotionSimulator, MutationConfig, MutationGates, Population,
    PopulationConfig, Trainer, TrainerState, TrainingConfig,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Kinematic biped: the stance foot is the one whose hip command is lower,
/// the body advances with hip separation and tips over when both hips push
/// the same way for too long.
struct ScissorWalker {
    x: f32,
    tilt: f32,
    time: f32,
}

impl ScissorWalker {
    fn new() -> Self {
        Self {
            x: 0.0,
            tilt: 0.0,
            time: 0.0,
        }
    }

    fn state(&self, commands: &[f32]) -> BodyState {
        let (left, right) = match commands {
            [] => (true, true),
            c => (
                c[biped::LEFT_HIP] <= c[biped::RIGHT_HIP],
                c[biped::RIGHT_HIP] <= c[biped::LEFT_HIP],
            ),
        };
        let fallen = self.tilt.abs() > 1.0;
        BodyState {
            joint_angles: commands.iter().map(|c| c * 0.8).collect(),
            joint_velocities: vec![0.0; biped::JOINT_COUNT],
            left_foot_contact: left,
            right_foot_contact: right,
            torso_contact: fallen,
            torso_tilt: self.tilt,
            com_position: [self.x, if fallen { 0.3 } else { 1.0 }, 0.0],
            ..BodyState::default()
        }
    }
}

impl MotionSimulator for ScissorWalker {
    fn joint_count(&self) -> usize {
        biped::JOINT_COUNT
    }

    fn reset(&mut self) -> BodyState {
        *self = Self::new();
        self.state(&[])
    }

    fn step(&mut self, commands: &[f32], dt: f32) -> BodyState {
        let spread = commands[biped::LEFT_HIP] - commands[biped::RIGHT_HIP];
        let lean = commands[biped::LEFT_HIP] + commands[biped::RIGHT_HIP];
        self.x += 0.6 * spread.abs() * dt;
        self.tilt += 0.4 * lean * dt;
        self.time += dt;
        self.state(commands)
    }
}

fn quick_config(size: usize) -> TrainingConfig {
    let mut config = TrainingConfig::default();
    config.population.size = size;
    config.episode.max_time = 2.0;
    config.episode.dt = 0.05;
    config
}

fn biped_tracker() -> (BodyLayout, InnovationTracker) {
    let layout = BodyLayout::biped();
    let tracker = InnovationTracker::new(layout.input_count, layout.output_count);
    (layout, tracker)
}

#[test]
fn test_full_training_cycle() {
    let mut trainer =
        Trainer::with_telemetry(quick_config(12), ScissorWalker::new(), MemoryTelemetry::new())
            .unwrap();

    for generation in 0..4 {
        let report = trainer.run_generation().unwrap();
        assert_eq!(report.generation, generation);
        assert!(report.best_fitness >= report.average_fitness);
        assert!(report.average_fitness >= report.worst_fitness);
        assert!(report.species_count >= 1);
    }

    assert_eq!(trainer.generation(), 4);
    assert_eq!(trainer.state(), TrainerState::Idle);
    assert_eq!(trainer.telemetry().episodes.len(), 4 * 12);
    assert_eq!(trainer.telemetry().generations.len(), 4);
    assert_eq!(trainer.history().count(), 4);

    // The hall of fame holds the best fitness ever reported.
    let best_reported = trainer
        .telemetry()
        .generations
        .iter()
        .map(|r| r.best_fitness)
        .fold(f32::MIN, f32::max);
    assert_eq!(trainer.hall_of_fame().unwrap().fitness, best_reported);

    for genome in trainer.population().genomes() {
        let outputs = genome.build_network().activate(&[0.1; biped::INPUT_COUNT]).unwrap();
        assert_eq!(outputs.len(), biped::JOINT_COUNT);
        assert!(outputs.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_nuclear_reset_through_trainer() {
    let mut config = quick_config(10);
    config.population.stagnation = StagnationConfig {
        tier_thresholds: [1, 2, 3],
        nuclear_threshold: 3,
    };
    // Nothing ever counts as an improvement.
    config.stagnation_epsilon = 1.0e9;

    let mut trainer = Trainer::new(config, ScissorWalker::new()).unwrap();
    let reports: Vec<_> = (0..4).map(|_| trainer.run_generation().unwrap()).collect();

    assert_eq!(
        reports.iter().map(|r| r.stagnation).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
    assert!(!reports[2].nuclear_reset);
    assert!(reports[3].nuclear_reset);
    assert_eq!(trainer.stagnation().count(), 0);
    assert_eq!(trainer.population().len(), 10);
}

#[test]
fn test_config_file_drives_trainer() {
    let config = TrainingConfig::from_toml_str(
        r#"
        seed = 99
        history_capacity = 2
        inject_diversity = true

        [population]
        size = 8

        [episode]
        max_time = 1.0
        dt = 0.1
        "#,
    )
    .unwrap();

    let mut trainer = Trainer::new(config, ScissorWalker::new()).unwrap();
    for _ in 0..3 {
        trainer.run_generation().unwrap();
    }
    // Bounded history keeps the most recent generations.
    let kept: Vec<u32> = trainer.history().map(|s| s.report.generation).collect();
    assert_eq!(kept, vec![1, 2]);
}

#[test]
fn test_cooperative_ticks_match_run_generation() {
    let mut ticked = Trainer::new(quick_config(6), ScissorWalker::new()).unwrap();
    let mut direct = Trainer::new(quick_config(6), ScissorWalker::new()).unwrap();

    let direct_report = direct.run_generation().unwrap();
    let mut ticked_report = None;
    while ticked_report.is_none() {
        ticked_report = ticked.tick(7).unwrap().generations.pop();
    }

    let ticked_report = ticked_report.unwrap();
    assert_eq!(ticked_report.best_fitness, direct_report.best_fitness);
    assert_eq!(ticked_report.average_fitness, direct_report.average_fitness);
}

#[test]
fn test_structural_innovation_consistency() {
    let (layout, mut tracker) = biped_tracker();
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let mut a = Genome::minimal(&layout, &mut tracker, &mut rng);
    let mut b = Genome::minimal(&layout, &mut tracker, &mut rng);

    let innovations = |g: &Genome| {
        g.sorted_connections()
            .iter()
            .map(|c| c.innovation)
            .collect::<Vec<_>>()
    };
    assert_eq!(innovations(&a), innovations(&b));

    // Split the same historical connection in both genomes.
    let target = innovations(&a)[3];
    let conn_a = a.find_connection_by_innovation(target).unwrap();
    let conn_b = b.find_connection_by_innovation(target).unwrap();
    let node_a = a.split_connection(conn_a, &mut tracker).unwrap();
    let node_b = b.split_connection(conn_b, &mut tracker).unwrap();

    assert_eq!(a.nodes[node_a].id, b.nodes[node_b].id);
    assert_eq!(innovations(&a), innovations(&b));
    assert_eq!(tracker.split_count(), 1);
}

#[test]
fn test_self_crossover_and_distance() {
    let (layout, mut tracker) = biped_tracker();
    let mut rng = ChaCha8Rng::seed_from_u64(7);

    let mut genome = Genome::with_hidden_nodes(&layout, &mut tracker, 4, &mut rng);
    for _ in 0..10 {
        genome.mutate(
            &mut tracker,
            &layout,
            &MutationConfig::exploration(),
            MutationGates::EXPLORATION,
            &mut rng,
        );
    }

    let child = genome.crossover(&genome, &mut rng);
    assert_eq!(child.enabled_genes(), genome.enabled_genes());
    assert_eq!(child.fitness, 0.0);
    assert_eq!(compatibility_distance(&genome, &genome, &CompatibilityConfig::default()), 0.0);
    assert!(compatibility_distance(&genome, &child, &CompatibilityConfig::default()) < 1e-6);
}

#[test]
fn test_population_evolve_preserves_elites() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let config = PopulationConfig {
        size: 30,
        elitism: 2,
        ..PopulationConfig::default()
    };
    let mut population = Population::new(config, BodyLayout::biped(), &mut rng).unwrap();

    for generation in 0..5 {
        for i in 0..population.len() {
            let fitness =
                population.genomes()[i].num_enabled_connections() as f32 + i as f32 * 0.01;
            population.set_fitness(i, fitness);
        }
        let mut previous = population.genomes().to_vec();
        previous.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));

        let outcome = population.evolve(
            &EvolveOptions {
                stagnation: generation * 5,
                ..EvolveOptions::default()
            },
            &mut rng,
        );

        assert_eq!(population.len(), 30);
        assert_eq!(outcome.generation, generation + 1);
        if !outcome.nuclear_reset {
            for elite in &previous[..2] {
                assert!(population.genomes().iter().any(|g| g.same_genes(elite)));
            }
        }
    }
}

#[test]
fn test_speciation_is_deterministic() {
    let build = || {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut population =
            Population::new(PopulationConfig::default(), BodyLayout::biped(), &mut rng).unwrap();
        population.speciate(&mut rng);
        population
            .species()
            .iter()
            .map(|s| s.members.len())
            .collect::<Vec<_>>()
    };
    assert_eq!(build(), build());
}

#[test]
fn test_replay_outlasts_training_limit() {
    struct Stands;
    impl MotionSimulator for Stands {
        fn joint_count(&self) -> usize {
            biped::JOINT_COUNT
        }
        fn reset(&mut self) -> BodyState {
            self.step(&[], 0.0)
        }
        fn step(&mut self, _: &[f32], _: f32) -> BodyState {
            BodyState {
                com_position: [0.0, 1.0, 0.0],
                ..BodyState::default()
            }
        }
    }

    let mut trainer = Trainer::new(quick_config(4), Stands).unwrap();
    let genome = trainer.population().genomes()[0].clone();
    let record = trainer.replay(&genome, 5.0).unwrap();

    assert!(!record.fallen);
    assert!((record.survival_time - 5.0).abs() < 1e-3);
    assert!(record.completed());
}
