//! Environmental sensor link.
//!
//! The microcontroller prints one line per sample:
//! `Temp: 23.4, Humidity: 55, Wind: 1.2`. Fields are positional; the key
//! text is not checked and values are kept as the text the board sent, units
//! and all. A line that does not parse is logged and the previous reading
//! stays current.
//!
//! The board talks 9600 baud, 8N1. `open_link` does not configure the port,
//! so set it up first, e.g. `stty -F /dev/ttyACM0 9600 raw`.

use anyhow::{Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::SensorParseError;
use crate::state::RigState;

const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Baud rate the environment board transmits at.
pub const SENSOR_BAUD: u32 = 9600;

/// Shell command that puts `port` into the mode the board expects.
pub fn setup_hint(port: &Path) -> String {
    format!("stty -F {} {} raw", port.display(), SENSOR_BAUD)
}

/// Latest environmental values. `None` until the first good line arrives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SensorReading {
    pub temperature: Option<String>,
    pub humidity: Option<String>,
    pub wind_speed: Option<String>,
}

impl SensorReading {
    pub fn temperature_text(&self) -> String {
        display_value(&self.temperature)
    }

    pub fn humidity_text(&self) -> String {
        display_value(&self.humidity)
    }

    pub fn wind_speed_text(&self) -> String {
        display_value(&self.wind_speed)
    }
}

fn display_value(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "--".to_string())
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Temp: {}, Humidity: {}, Wind: {}",
            self.temperature_text(),
            self.humidity_text(),
            self.wind_speed_text()
        )
    }
}

pub fn parse_reading(line: &str) -> Result<SensorReading, SensorParseError> {
    let trimmed = line.trim();
    let fail = |reason| SensorParseError {
        line: trimmed.to_string(),
        reason,
    };
    let fields: Vec<&str> = trimmed.split(',').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(fail("expected three comma-separated fields"));
    }
    let mut values = Vec::with_capacity(3);
    for field in &fields {
        let (_, raw) = field
            .split_once(':')
            .ok_or_else(|| fail("field without ':' separator"))?;
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(fail("field value is empty"));
        }
        values.push(raw.to_string());
    }
    let mut values = values.into_iter();
    Ok(SensorReading {
        temperature: values.next(),
        humidity: values.next(),
        wind_speed: values.next(),
    })
}

/// Open the serial device node as a line stream.
///
/// The port must already be at 9600 baud. Reads block until the board sends
/// a line; the poller treats `TimedOut` and `WouldBlock` as a retry.
pub fn open_link(path: &Path) -> Result<BufReader<File>> {
    let file =
        File::open(path).with_context(|| format!("open sensor link {}", path.display()))?;
    Ok(BufReader::new(file))
}

/// Background reader feeding `RigState`'s sensor fields.
pub struct SensorPoller;

impl SensorPoller {
    /// Read lines until EOF, a hard I/O error, or the rig stops running.
    ///
    /// The thread may stay blocked in a read after shutdown until the link
    /// delivers another line; it holds no camera resources.
    pub fn spawn<R>(mut reader: R, state: Arc<RigState>) -> Result<JoinHandle<()>>
    where
        R: BufRead + Send + 'static,
    {
        thread::Builder::new()
            .name("sensor-poller".to_string())
            .spawn(move || {
                let mut line = String::new();
                while state.is_running() {
                    line.clear();
                    match reader.read_line(&mut line) {
                        Ok(0) => {
                            log::warn!("sensor: link closed");
                            break;
                        }
                        Ok(_) => match parse_reading(&line) {
                            Ok(reading) => state.set_sensor(reading),
                            Err(err) => log::warn!("sensor: {}", err),
                        },
                        Err(err)
                            if matches!(
                                err.kind(),
                                ErrorKind::Interrupted
                                    | ErrorKind::TimedOut
                                    | ErrorKind::WouldBlock
                            ) =>
                        {
                            thread::sleep(READ_RETRY_DELAY);
                        }
                        Err(err) if err.kind() == ErrorKind::InvalidData => {
                            log::warn!("sensor: discarded non-UTF-8 line");
                        }
                        Err(err) => {
                            log::error!("sensor: read failed: {}", err);
                            break;
                        }
                    }
                }
                log::debug!("sensor: poller stopped");
            })
            .context("spawn sensor poller")
    }
}
