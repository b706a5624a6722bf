use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::{DeviceLister, ListedDevice};
use crate::error::EnumerationError;

/// Runs a platform listing command and keeps camera-looking lines.
///
/// The enumeration index is the line's position among kept lines, which is
/// the order the capture backend enumerates the same devices in.
#[derive(Clone, Debug)]
pub struct CommandLister {
    program: String,
    args: Vec<String>,
    keywords: Vec<String>,
}

impl CommandLister {
    pub fn new(command: &[String], keywords: &[String]) -> Result<Self, EnumerationError> {
        let (program, args) = command.split_first().ok_or_else(|| EnumerationError::Command {
            program: String::new(),
            reason: "empty listing command".to_string(),
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        })
    }

    /// `wmic path Win32_PnPEntity where "Description like '%USB%'"`.
    pub fn windows_pnp() -> Self {
        Self {
            program: "wmic".to_string(),
            args: vec![
                "path".to_string(),
                "Win32_PnPEntity".to_string(),
                "where".to_string(),
                "Description like '%USB%'".to_string(),
            ],
            keywords: default_keywords(),
        }
    }

    pub(crate) fn filter_lines(&self, stdout: &str) -> Vec<ListedDevice> {
        stdout
            .lines()
            .filter(|line| {
                let lower = line.to_lowercase();
                self.keywords.iter().any(|k| lower.contains(k.as_str()))
            })
            .enumerate()
            .map(|(i, line)| ListedDevice {
                enumeration_index: i as u32,
                descriptor: line.to_string(),
            })
            .collect()
    }
}

pub(crate) fn default_keywords() -> Vec<String> {
    vec!["camera".to_string(), "usbvideo".to_string()]
}

impl DeviceLister for CommandLister {
    fn list(&self) -> Result<Vec<ListedDevice>, EnumerationError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|err| EnumerationError::Command {
                program: self.program.clone(),
                reason: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(EnumerationError::Command {
                program: self.program.clone(),
                reason: format!("exited with {}", output.status),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(self.filter_lines(&stdout))
    }
}

/// Scans `/sys/class/video4linux` for capture nodes.
///
/// UVC cameras register a metadata node next to the capture node; only nodes
/// with `index == 0` are kept. The enumeration index is the `N` in `videoN`.
#[derive(Clone, Debug)]
pub struct SysfsLister {
    root: PathBuf,
}

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/video4linux";

impl SysfsLister {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn describe_node(&self, node: &Path) -> Option<ListedDevice> {
        let name = node.file_name()?.to_str()?;
        let number: u32 = name.strip_prefix("video")?.parse().ok()?;
        let index = read_trimmed(&node.join("index")).unwrap_or_else(|| "0".to_string());
        if index != "0" {
            return None;
        }
        let label = read_trimmed(&node.join("name")).unwrap_or_default();
        let device_path = fs::canonicalize(node.join("device")).ok()?;
        Some(ListedDevice {
            enumeration_index: number,
            descriptor: format!("{} {} {}", name, label, device_path.display()),
        })
    }
}

impl Default for SysfsLister {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

impl DeviceLister for SysfsLister {
    fn list(&self) -> Result<Vec<ListedDevice>, EnumerationError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|err| EnumerationError::Io(format!("{}: {}", self.root.display(), err)))?;
        let mut devices: Vec<ListedDevice> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| self.describe_node(&entry.path()))
            .collect();
        devices.sort_by_key(|d| d.enumeration_index);
        Ok(devices)
    }
}

/// A fixed descriptor list; enumeration index is list position.
#[derive(Clone, Debug, Default)]
pub struct StaticLister {
    descriptors: Vec<String>,
}

impl StaticLister {
    pub fn new(descriptors: impl IntoIterator<Item = String>) -> Self {
        Self {
            descriptors: descriptors.into_iter().collect(),
        }
    }

    /// PnP descriptors for a simulated rig, enumerated in scrambled order.
    pub fn synthetic_rig(count: usize) -> Self {
        // Stride must be coprime with count so every port is used once.
        let stride = if count % 5 == 0 { 7 } else { 5 };
        let descriptors = (0..count)
            .map(|i| {
                let port = (i * stride + 3) % count;
                format!(
                    r"USB Camera  USB\VID_32E4&PID_9230&MI_00\6&{:X}&0&0000  usbvideo",
                    0x2B7C_1A00 + port
                )
            })
            .collect();
        Self { descriptors }
    }
}

impl DeviceLister for StaticLister {
    fn list(&self) -> Result<Vec<ListedDevice>, EnumerationError> {
        Ok(self
            .descriptors
            .iter()
            .enumerate()
            .map(|(i, descriptor)| ListedDevice {
                enumeration_index: i as u32,
                descriptor: descriptor.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{DeviceIdentityResolver, PnpInstanceExtractor};

    #[test]
    fn command_filter_keeps_camera_lines_in_order() {
        let lister = CommandLister::windows_pnp();
        let stdout = "Description  DeviceID\n\
                      USB Root Hub  USB\\ROOT_HUB30\\4&1&0\n\
                      USB Camera  USB\\VID_1&PID_2&MI_00\\6&AA&0&0000\n\
                      USB Composite Device  USB\\VID_3\\XYZ\n\
                      Webcam  USB\\VID_1&PID_2&MI_00\\6&BB&0&0000 usbvideo\n";
        let devices = lister.filter_lines(stdout);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].enumeration_index, 0);
        assert!(devices[0].descriptor.contains("6&AA"));
        assert_eq!(devices[1].enumeration_index, 1);
        assert!(devices[1].descriptor.contains("6&BB"));
    }

    #[test]
    fn missing_command_is_an_enumeration_error() {
        let lister = CommandLister::new(
            &["/nonexistent/device-lister".to_string()],
            &default_keywords(),
        )
        .unwrap();
        assert!(matches!(
            lister.list(),
            Err(EnumerationError::Command { .. })
        ));
        assert!(CommandLister::new(&[], &default_keywords()).is_err());
    }

    #[test]
    fn synthetic_rig_ids_are_distinct_and_scrambled() {
        for count in 1..=12 {
            let resolver = DeviceIdentityResolver::new(
                Box::new(StaticLister::synthetic_rig(count)),
                Box::new(PnpInstanceExtractor),
            );
            let mapping = resolver.resolve();
            assert_eq!(mapping.len(), count, "rig of {}", count);
            let mut ids: Vec<_> = mapping.iter().map(|e| e.stable_id.clone()).collect();
            ids.dedup();
            assert_eq!(ids.len(), count);
        }
        let mapping = DeviceIdentityResolver::new(
            Box::new(StaticLister::synthetic_rig(12)),
            Box::new(PnpInstanceExtractor),
        )
        .resolve();
        assert!(mapping
            .iter()
            .any(|e| e.enumeration_index as usize != e.slot_index));
    }

    #[cfg(unix)]
    #[test]
    fn sysfs_lister_keeps_capture_nodes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let devices = dir.path().join("devices/usb1/1-2/1-2.3/1-2.3:1.0");
        fs::create_dir_all(&devices)?;
        let class = dir.path().join("class");
        for (node, index) in [("video0", "0"), ("video1", "1")] {
            let node_dir = class.join(node);
            fs::create_dir_all(&node_dir)?;
            fs::write(node_dir.join("index"), index)?;
            fs::write(node_dir.join("name"), "USB Camera\n")?;
            std::os::unix::fs::symlink(&devices, node_dir.join("device"))?;
        }

        let listed = SysfsLister::new(&class).list()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].enumeration_index, 0);
        assert!(listed[0].descriptor.contains("1-2.3:1.0"));
        Ok(())
    }
}
