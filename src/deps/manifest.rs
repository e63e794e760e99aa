//! Version manifest parsing.
//!
//! ConEmu publishes an INI file listing its build channels. Each section
//! carries a `version` and a comma-separated `location_arc` list of
//! archive mirrors; the last mirror is the canonical one.

use anyhow::{bail, Result};

/// Latest build of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub version: String,
    pub location: String,
}

/// Extract `version` and the last `location_arc` URL from `[section]`.
pub fn parse_manifest(content: &str, section: &str) -> Result<ManifestEntry> {
    let mut in_section = false;
    let mut version = None;
    let mut location = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_section = name.trim() == section;
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((key, value)) = line.split_once(['=', ':']) else {
            continue;
        };
        match key.trim() {
            "version" => version = Some(value.trim().to_string()),
            "location_arc" => {
                location = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .last()
                    .map(str::to_string)
            }
            _ => {}
        }
    }

    match (version, location) {
        (Some(version), Some(location)) => Ok(ManifestEntry { version, location }),
        (None, _) => bail!("no 'version' in section [{}]", section),
        (_, None) => bail!("no 'location_arc' in section [{}]", section),
    }
}
