//! Train a biped controller on a toy kinematic walker.
//!
//! ```text
//! RUST_LOG=info cargo run --example flat_ground -- [config.toml] [generations]
//! ```

use std::error::Error;

use gait_neat::layout::biped;
use gait_neat::{BodyState, MotionSimulator, Trainer, TrainingConfig, TracingTelemetry};

/// A planar walker with no real dynamics.
///
/// Each leg's foot is planted while its hip is behind the other hip. The
/// body advances when the stance leg sweeps backwards, knees and ankles
/// lift the swing foot, and the torso tips over if the hips stay biased
/// to one side.
struct KinematicWalker {
    angles: [f32; biped::JOINT_COUNT],
    velocities: [f32; biped::JOINT_COUNT],
    x: f32,
    tilt: f32,
    spin: f32,
}

const JOINT_SPEED: f32 = 4.0;
const STRIDE_GAIN: f32 = 0.45;
const TIP_GAIN: f32 = 0.9;
const FALL_TILT: f32 = 0.8;

impl KinematicWalker {
    fn new() -> Self {
        Self {
            angles: [0.0; biped::JOINT_COUNT],
            velocities: [0.0; biped::JOINT_COUNT],
            x: 0.0,
            tilt: 0.0,
            spin: 0.0,
        }
    }

    fn state(&self) -> BodyState {
        use biped::*;

        let fallen = self.tilt.abs() > FALL_TILT;
        let left_lifted = self.angles[LEFT_KNEE] > 0.4;
        let right_lifted = self.angles[RIGHT_KNEE] > 0.4;
        let left_behind = self.angles[LEFT_HIP] <= self.angles[RIGHT_HIP];
        BodyState {
            joint_angles: self.angles.to_vec(),
            joint_velocities: self.velocities.to_vec(),
            left_foot_contact: !left_lifted && (left_behind || right_lifted),
            right_foot_contact: !right_lifted && (!left_behind || left_lifted),
            torso_contact: fallen,
            head_contact: false,
            torso_tilt: self.tilt,
            torso_spin: self.spin,
            com_position: [self.x, if fallen { 0.25 } else { 1.0 - 0.1 * self.tilt.abs() }, 0.0],
            com_velocity: [0.0; 3],
        }
    }
}

impl MotionSimulator for KinematicWalker {
    fn joint_count(&self) -> usize {
        biped::JOINT_COUNT
    }

    fn reset(&mut self) -> BodyState {
        *self = Self::new();
        self.state()
    }

    fn step(&mut self, commands: &[f32], dt: f32) -> BodyState {
        use biped::*;

        let before = self.state();
        for (j, &target) in commands.iter().enumerate().take(JOINT_COUNT) {
            let error = target - self.angles[j];
            let velocity = (error * 10.0).clamp(-JOINT_SPEED, JOINT_SPEED);
            self.velocities[j] = velocity;
            self.angles[j] += velocity * dt;
        }

        // A planted foot whose hip swings back pushes the body forward.
        let mut advance = 0.0;
        if before.left_foot_contact {
            advance -= self.velocities[LEFT_HIP].min(0.0);
        }
        if before.right_foot_contact {
            advance -= self.velocities[RIGHT_HIP].min(0.0);
        }
        let old_x = self.x;
        self.x += STRIDE_GAIN * advance * dt;

        let bias = self.angles[LEFT_HIP] + self.angles[RIGHT_HIP];
        self.spin = TIP_GAIN * bias - 0.5 * self.tilt;
        self.tilt += self.spin * dt;

        let mut state = self.state();
        state.com_velocity[0] = (self.x - old_x) / dt.max(1e-6);
        state
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => TrainingConfig::from_toml_str(&std::fs::read_to_string(path)?)?,
        None => TrainingConfig::default(),
    };
    let generations: u32 = args.next().map(|g| g.parse()).transpose()?.unwrap_or(25);

    let mut trainer = Trainer::with_telemetry(config, KinematicWalker::new(), TracingTelemetry)?;
    for _ in 0..generations {
        let report = trainer.run_generation()?;
        println!(
            "gen {:>3}  best {:>8.2}  avg {:>8.2}  dist {:>6.2} m  \
             coverage {:>4.2}  species {:>2}{}",
            report.generation,
            report.best_fitness,
            report.average_fitness,
            report.best_distance,
            report.best_breakdown.step_coverage,
            report.species_count,
            if report.nuclear_reset { "  [nuclear reset]" } else { "" },
        );
    }

    if let Some(champion) = trainer.hall_of_fame().cloned() {
        let replay = trainer.replay(&champion, 120.0)?;
        println!(
            "champion replay: {:.2} m in {:.1} s, {} effective steps{}",
            replay.distance,
            replay.survival_time,
            replay.effective_steps,
            if replay.fallen { ", fell" } else { "" },
        );
    }
    Ok(())
}
