//! `armsight-cli` – headless approach-and-grasp demo.
//!
//! This binary:
//!
//! 1. Loads `~/.armsight/config.toml`, writing the defaults on first run,
//!    and applies `ARMSIGHT_*` environment overrides.
//! 2. Builds a simulated arm and a synthetic tabletop scene rendered through
//!    the simulated camera, and starts the perception loop on it.
//! 3. Runs the grasp coordinator against the configured target, streaming
//!    servo progress to the terminal.
//! 4. Intercepts **Ctrl-C** to cancel the running sequence.

mod config;
mod scene;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use armsight_hal::SimArm;
use armsight_middleware::{EventBus, PerceptionHub, Topic, TopicReceiver};
use armsight_perception::{
    BridgeConfig, ColorBlobDetector, CoordinateBridge, FilterTuning, SimProjection, SimulationOracle,
};
use armsight_runtime::{
    FocusMode, GraspCoordinator, GraspPlanner, GraspReport, PerceptionLoop, PerceptionLoopConfig,
    ServoController, ServoOutcome, init_tracing,
};
use armsight_types::{DeploymentMode, Event, EventPayload, Point3};
use colored::Colorize;
use tracing::{error, warn};

use crate::config::Config;
use crate::scene::{SceneCamera, SceneOracle, SyntheticScene};

/// Aperture the simulated fingers stop at when closing on the demo objects.
const DEMO_HELD_APERTURE: f32 = 0.02;

fn main() -> ExitCode {
    // Set ARMSIGHT_LOG_FORMAT=json for newline-delimited JSON logs.  The
    // user-facing output below still uses println!.
    let _tracing = init_tracing("armsight-cli");

    print_banner();

    let cfg = load_config();
    if cfg.mode == DeploymentMode::Hardware {
        println!(
            "{}: no hardware drivers are linked into this build; set {} to run the demo.",
            "Unsupported mode".red(),
            "ARMSIGHT_MODE=simulation".bold()
        );
        return ExitCode::FAILURE;
    }

    match run_demo(&cfg) {
        Ok(report) => print_report(&cfg.target, &report),
        Err(e) => {
            error!(error = %e, "demo setup failed");
            println!("{}: {}", "Setup error".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> Config {
    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    cfg
}

fn run_demo(cfg: &Config) -> Result<GraspReport, String> {
    let bus = EventBus::default();
    let hub = PerceptionHub::new();
    let arm = Arc::new(
        SimArm::new("sim_arm")
            .at(Point3::new(0.0, 0.0, 20.0))
            .holding(DEMO_HELD_APERTURE),
    );

    // ── Scene and perception ──────────────────────────────────────────────
    let scene = Arc::new(SyntheticScene::demo(arm.clone()).map_err(|e| e.to_string())?);
    let oracle: Arc<dyn SimulationOracle> = Arc::new(SceneOracle(scene.clone()));
    let tuning = FilterTuning::for_deployment(cfg.mode);
    let world = SimProjection::new(scene.camera().clone(), tuning).with_oracle(oracle.clone());
    let wrist = SimProjection::new(scene.camera().clone(), tuning);
    let bridge = CoordinateBridge::new(
        BridgeConfig {
            deployment: cfg.mode,
            ..cfg.bridge.clone()
        },
        Box::new(world),
        Box::new(wrist),
    )
    .with_oracle(oracle);

    let detector = ColorBlobDetector::new(scene.color_classes());
    let perception = PerceptionLoop::new(
        PerceptionLoopConfig {
            interval_ms: cfg.perception_interval_ms,
            focus: FocusMode::for_deployment(cfg.mode),
        },
        Box::new(SceneCamera::new(scene.clone())),
        Box::new(detector),
        bridge,
        hub.clone(),
    )
    .with_bus(bus.clone())
    .spawn();

    // ── Servo, planner, coordinator ───────────────────────────────────────
    let servo = Arc::new(
        ServoController::new(cfg.servo.clone(), arm.clone(), Arc::new(hub.clone())).with_bus(bus.clone()),
    );
    let memory_path = cfg.grasp_memory_path();
    let planner = GraspPlanner::with_memory_file(cfg.planner.clone(), &memory_path).unwrap_or_else(|e| {
        warn!(path = %memory_path.display(), error = %e, "grasp memory unreadable, using presets");
        GraspPlanner::new(cfg.planner.clone())
    });
    let coordinator = GraspCoordinator::new(servo.clone(), planner, arm, Arc::new(hub));

    install_ctrlc(&servo, &bus);
    let progress = spawn_progress_printer(bus.subscribe_to(Topic::ServoProgress));

    println!("\n  Target: {}\n", cfg.target.bold().cyan());
    let report = coordinator.execute(&cfg.target);

    perception.stop();
    if progress.join().is_err() {
        warn!("progress printer panicked");
    }
    Ok(report)
}

fn install_ctrlc(servo: &Arc<ServoController>, bus: &EventBus) {
    let cancel = servo.cancel_token();
    let bus = bus.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – cancelling the grasp sequence …".yellow().bold());
        let stop_event = Event::new(
            "armsight-cli",
            EventPayload::HardwareFault {
                component: "cli".to_string(),
                code: 911,
                message: "operator Ctrl-C".to_string(),
            },
        );
        let _ = bus.publish_to(Topic::SystemAlerts, stop_event);
        cancel.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not cancel the sequence");
    }
}

/// Print state changes until the servo reports its outcome.
fn spawn_progress_printer(mut rx: TopicReceiver) -> thread::JoinHandle<()> {
    use armsight_middleware::bus::TryRecvError;

    thread::spawn(move || {
        let mut last_state = String::new();
        loop {
            match rx.try_recv() {
                Ok(event) => match event.payload {
                    EventPayload::ServoProgress { state, message } => {
                        if state != last_state {
                            println!("  {} {}", "▸".cyan(), state.bold());
                            last_state = state;
                        } else {
                            println!("    {}", message.dimmed());
                        }
                    }
                    EventPayload::ServoFinished { .. } => break,
                    _ => {}
                },
                Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(20)),
                Err(TryRecvError::Lagged(n)) => {
                    println!("    {}", format!("({n} progress lines skipped)").dimmed());
                }
                Err(TryRecvError::Closed) => break,
            }
        }
    })
}

fn print_report(target: &str, report: &GraspReport) -> ExitCode {
    println!();
    if let Some(plan) = &report.plan {
        println!(
            "  Plan: {:?} grasp, width {:.0} %, depth {:+.1} cm",
            plan.strategy, plan.gripper_width, plan.grasp_depth_offset
        );
    }
    match &report.outcome {
        ServoOutcome::Success { aperture } => {
            println!(
                "  {} Picked up {} (aperture {:.3})",
                "✓".green().bold(),
                target.bold(),
                aperture
            );
            ExitCode::SUCCESS
        }
        ServoOutcome::Failed(reason) => {
            println!("  {} Could not pick up {}: {}", "✗".red().bold(), target.bold(), reason);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___                 _____      __   __ "#.bold().cyan());
    println!("{}", r#"  / _ | ______ _  ___ / __(_)__ _/ /  / /_"#.bold().cyan());
    println!("{}", r#" / __ |/ __/  ' \(_-<_\ \/ / _ `/ _ \/ __/"#.bold().cyan());
    println!("{}", r#"/_/ |_/_/ /_/_/_/___/___/_/\_, /_//_/\__/ "#.bold().cyan());
    println!("{}", r#"                          /___/           "#.bold().cyan());
    println!();
    println!("  {} {}", "ArmSight".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Closed-loop visual servoing and grasping");
    println!();
}
