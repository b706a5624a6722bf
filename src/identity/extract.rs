use regex::Regex;
use std::sync::OnceLock;

use super::IdentifierExtractor;

/// Pulls the port-derived instance id out of a Windows PnP device path.
///
/// `USB\VID_32E4&PID_9230&MI_00\6&2B7C1A0&0&0000` yields `2B7C1A0`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PnpInstanceExtractor;

fn pnp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\\(?:[^\\]+&)+([A-Z0-9]+)&0&\d{4}").expect("static pattern compiles")
    })
}

impl IdentifierExtractor for PnpInstanceExtractor {
    fn extract(&self, descriptor: &str) -> Option<String> {
        pnp_pattern()
            .captures(descriptor)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

/// Pulls the USB port path out of a sysfs device path.
///
/// `.../usb1/1-2/1-2.3/1-2.3:1.0` yields `1-2.3`.
#[derive(Clone, Copy, Debug, Default)]
pub struct UsbPortExtractor;

fn usb_port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/(\d+-\d+(?:\.\d+)*):\d+\.\d+").expect("static pattern compiles")
    })
}

impl IdentifierExtractor for UsbPortExtractor {
    fn extract(&self, descriptor: &str) -> Option<String> {
        usb_port_pattern()
            .captures(descriptor)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}
