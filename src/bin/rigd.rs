//! rigd - specimen rig daemon
//!
//! This daemon:
//! 1. Refreshes the camera mapping and opens every mapped camera
//! 2. Polls the environmental sensor link in the background
//! 3. Refreshes the preview grid on a short cooperative timer
//! 4. Runs operator commands typed on stdin (`help` lists them)
//! 5. Releases every camera once on `quit` or Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use specimen_rig::operator::HELP;
use specimen_rig::preview::GridStatus;
use specimen_rig::sensor::{open_link, setup_hint, SensorPoller, SENSOR_BAUD};
use specimen_rig::state::RigState;
use specimen_rig::ui::{Stage, Ui, UiMode};
use specimen_rig::{OperatorCommand, Rig, RigConfig};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    after_help = "The sensor link (RIG_SENSOR_PORT) is read as-is: configure it first, \
                  e.g. `stty -F /dev/ttyACM0 9600 raw`."
)]
struct Args {
    /// Reuse the existing mapping file instead of re-resolving at startup.
    #[arg(long)]
    keep_mapping: bool,
    /// Console output style.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
    /// Device backend override (`stub://...` or `v4l2`).
    #[arg(long, env = "RIG_DEVICE_BACKEND")]
    backend: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::detect(args.ui);

    let mut config = RigConfig::load()?;
    if let Some(backend) = args.backend {
        config.device_backend = backend;
    }
    let sensor_port = config.sensor_port.clone();
    let mut rig = Rig::from_config(config)?;

    if !args.keep_mapping {
        refresh_mapping(&rig, &ui);
    }
    let stage = ui.stage(Stage::OpenCameras);
    match rig.open_cameras() {
        Ok(summary) => stage.succeed(summary.to_string()),
        Err(err) => {
            stage.fail(format!("{:#}", err));
            return Err(err);
        }
    }

    if let Some(port) = sensor_port {
        match open_link(&port).and_then(|link| SensorPoller::spawn(link, Arc::clone(rig.state()))) {
            Ok(_) => log::info!(
                "sensor link {} open (expects {} baud; set with `{}`)",
                port.display(),
                SENSOR_BAUD,
                setup_hint(&port)
            ),
            Err(err) => ui.warning(&format!("sensor unavailable: {:#}", err)),
        }
    }

    let state = Arc::clone(rig.state());
    ctrlc::set_handler({
        let state = Arc::clone(&state);
        move || state.stop()
    })
    .context("install Ctrl-C handler")?;

    let commands = spawn_console()?;
    let mut grid = GridStatus::new(rig.config().camera_count);
    let interval = rig.config().preview.interval;
    let mut last_health_log = Instant::now();
    let mut frames_since_log = 0usize;

    log::info!("rigd running. type 'help' for commands");
    while state.is_running() {
        if let Ok(line) = commands.try_recv() {
            handle_line(&mut rig, &ui, &state, &line);
        }

        frames_since_log += rig.preview_tick(&mut grid).frames;

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let status = rig.status();
            log::info!(
                "health: {} preview frames={} sensor=[{}]",
                status
                    .pool
                    .map(|summary| summary.to_string())
                    .unwrap_or_else(|| "no cameras".to_string()),
                frames_since_log,
                status.sensor
            );
            frames_since_log = 0;
            last_health_log = Instant::now();
        }

        thread::sleep(interval);
    }

    log::info!("shutdown requested, releasing cameras...");
    rig.shutdown();
    Ok(())
}

/// Re-resolve the camera mapping. Failure keeps the previous mapping file.
fn refresh_mapping(rig: &Rig, ui: &Ui) -> bool {
    let stage = ui.stage(Stage::RefreshMapping);
    match rig.refresh_mapping() {
        Ok(mapping) => {
            stage.succeed(format!("{} camera(s) mapped", mapping.len()));
            true
        }
        Err(err) => {
            stage.fail(format!("not refreshed: {:#}", err));
            false
        }
    }
}

fn spawn_console() -> Result<Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line).is_err() {
                    break;
                }
            }
            log::debug!("console: stdin closed");
        })
        .context("spawn console reader")?;
    Ok(rx)
}

fn handle_line(rig: &mut Rig, ui: &Ui, state: &RigState, line: &str) {
    let command = match OperatorCommand::parse(line) {
        Ok(command) => command,
        Err(err) => {
            ui.warning(&format!("{} (type 'help')", err));
            return;
        }
    };
    match command {
        OperatorCommand::Map => {
            if refresh_mapping(rig, ui) {
                ui.notice("run 'open' to use the new mapping");
            }
        }
        OperatorCommand::Open => {
            let stage = ui.stage(Stage::OpenCameras);
            match rig.open_cameras() {
                Ok(summary) => stage.succeed(summary.to_string()),
                Err(err) => stage.fail(format!("{:#}", err)),
            }
        }
        OperatorCommand::Capture(target) => {
            let stage = ui.stage(Stage::Capture);
            match rig.capture(&target) {
                Ok(outcome) => {
                    stage.succeed(format!(
                        "{} into {}",
                        outcome.report.summary(),
                        target.path().display()
                    ));
                    if !outcome.missing_folders.is_empty() {
                        ui.warning(&format!(
                            "the following folders are missing: {}",
                            outcome.missing_folders.join(", ")
                        ));
                    }
                    for (slot, reason) in &outcome.report.failed_writes {
                        ui.warning(&format!("slot {} not saved: {}", slot, reason));
                    }
                }
                Err(err) => stage.fail(format!("aborted: {}", err)),
            }
        }
        OperatorCommand::OverexposureOn(threshold) => {
            rig.set_overexposure(true, threshold);
            ui.notice(&format!(
                "overexposure check on (threshold {})",
                state.exposure().threshold()
            ));
        }
        OperatorCommand::OverexposureOff => {
            rig.set_overexposure(false, None);
            ui.notice("overexposure check off");
        }
        OperatorCommand::Threshold(threshold) => {
            rig.set_threshold(threshold);
            ui.notice(&format!("overexposure threshold {}", threshold));
        }
        OperatorCommand::Status => println!("{}", rig.status()),
        OperatorCommand::Help => println!("{}", HELP),
        OperatorCommand::Quit => state.stop(),
    }
}
