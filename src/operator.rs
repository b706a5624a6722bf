//! Operator triggers, parsed from console lines.

use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;

use crate::storage::SpecimenTarget;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Re-run identity resolution and rewrite the mapping file.
    Map,
    /// Release any open cameras and open the pool from the mapping file.
    Open,
    Capture(SpecimenTarget),
    /// Enable highlighting, optionally with a new threshold.
    OverexposureOn(Option<u8>),
    OverexposureOff,
    Threshold(u8),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  map                         refresh the camera mapping
  open                        open all mapped cameras
  capture new <dir>           capture into a new specimen folder
  capture existing <dir>      capture into an existing specimen folder
  overexposure on [0-255]     highlight overexposed pixels
  overexposure off            stop highlighting
  threshold <0-255>           set the overexposure threshold
  status                      show camera and sensor status
  quit                        release cameras and exit";

impl OperatorCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("empty command");
        };
        let command = match verb.to_ascii_lowercase().as_str() {
            "map" => Self::Map,
            "open" => Self::Open,
            "capture" => {
                let kind = words
                    .next()
                    .ok_or_else(|| anyhow!("capture needs 'new' or 'existing'"))?;
                let dir = rest_of_line(line, 3)
                    .ok_or_else(|| anyhow!("capture needs a specimen directory"))?;
                // The directory may contain spaces; it takes the rest of the line.
                return match kind {
                    "new" => Ok(Self::Capture(SpecimenTarget::New(dir))),
                    "existing" => Ok(Self::Capture(SpecimenTarget::Existing(dir))),
                    other => Err(anyhow!("unknown specimen kind '{}'", other)),
                };
            }
            "overexposure" => match words.next() {
                Some("on") => Self::OverexposureOn(words.next().map(parse_threshold).transpose()?),
                Some("off") => Self::OverexposureOff,
                _ => bail!("overexposure needs 'on' or 'off'"),
            },
            "threshold" => {
                let value = words
                    .next()
                    .ok_or_else(|| anyhow!("threshold needs a value"))?;
                Self::Threshold(parse_threshold(value)?)
            }
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command '{}'", other),
        };
        if let Some(extra) = words.next() {
            bail!("unexpected argument '{}'", extra);
        }
        Ok(command)
    }
}

fn parse_threshold(value: &str) -> Result<u8> {
    value
        .parse()
        .map_err(|_| anyhow!("threshold must be 0-255, got '{}'", value))
}

fn rest_of_line(line: &str, skip_words: usize) -> Option<PathBuf> {
    let mut rest = line.trim_start();
    for _ in 0..skip_words - 1 {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    let rest = rest.trim_end();
    if rest.is_empty() {
        None
    } else {
        Some(PathBuf::from(rest))
    }
}
