//! Operator-facing console output.
//!
//! Long rig operations run as a `Stage`: a spinner while the work is in
//! flight, then one line with the outcome. Everything else is a `notice` or a
//! `warning` the operator has to act on.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

/// The operations slow enough to deserve a spinner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    RefreshMapping,
    OpenCameras,
    Capture,
}

impl Stage {
    fn in_progress(self) -> &'static str {
        match self {
            Stage::RefreshMapping => "resolving camera identities",
            Stage::OpenCameras => "opening cameras",
            Stage::Capture => "capturing from every camera",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::RefreshMapping => "camera mapping",
            Stage::OpenCameras => "cameras",
            Stage::Capture => "capture",
        })
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    /// Detect whether stderr is a terminal. `NO_COLOR` turns `Auto` plain.
    pub fn detect(mode: UiMode) -> Self {
        let mode = match mode {
            UiMode::Auto if std::env::var_os("NO_COLOR").is_some() => UiMode::Plain,
            other => other,
        };
        Self::new(mode, std::io::stderr().is_terminal())
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn stage(&self, stage: Stage) -> StageGuard {
        let spinner = if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(80));
            let style = ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(stage.in_progress());
            Some(spinner)
        } else {
            eprintln!("... {}", stage.in_progress());
            None
        };
        StageGuard {
            stage,
            started: Instant::now(),
            spinner,
            outcome: None,
        }
    }

    /// A one-line status the operator should see, e.g. "11 of 12 cameras ready".
    pub fn notice(&self, message: &str) {
        log::info!("{}", message);
        eprintln!("--> {}", message);
    }

    /// A warning the operator has to act on before continuing.
    pub fn warning(&self, message: &str) {
        log::warn!("{}", message);
        if self.pretty() {
            eprintln!("\x1b[1;33m!! {}\x1b[0m", message);
        } else {
            eprintln!("!! {}", message);
        }
    }
}

/// A running stage. Report how it ended with `succeed` or `fail`; a guard
/// dropped without either is shown as interrupted.
pub struct StageGuard {
    stage: Stage,
    started: Instant,
    spinner: Option<ProgressBar>,
    outcome: Option<Result<String, String>>,
}

impl StageGuard {
    pub fn succeed(mut self, summary: impl Into<String>) {
        self.outcome = Some(Ok(summary.into()));
    }

    pub fn fail(mut self, reason: impl Into<String>) {
        self.outcome = Some(Err(reason.into()));
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let line = stage_line(self.stage, self.outcome.as_ref(), self.started.elapsed());
        match &self.outcome {
            Some(Ok(_)) => log::info!("{}", line),
            _ => log::warn!("{}", line),
        }
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("{}", line),
        }
    }
}

fn stage_line(stage: Stage, outcome: Option<&Result<String, String>>, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    match outcome {
        Some(Ok(summary)) => format!("ok   {}: {} [{:.1}s]", stage, summary, secs),
        Some(Err(reason)) => format!("FAIL {}: {} [{:.1}s]", stage, reason, secs),
        None => format!("FAIL {}: interrupted [{:.1}s]", stage, secs),
    }
}
