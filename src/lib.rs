//! mozmill-env builder library.
//!
//! Assembles a self-contained, relocatable Mozmill test environment for
//! Windows or macOS and packs it into `<version>-<platform>.zip`.
//!
//! The pipeline lives in [`assembler`]; the remaining modules are the
//! pieces it drives.

pub mod artifact;
pub mod assembler;
pub mod config;
pub mod deps;
pub mod extract;
pub mod preflight;
pub mod process;
pub mod toolchain;
pub mod tree;

use std::time::{Duration, Instant};
use tracing::info;

/// Logs how long a named step took.
pub struct Timer {
    name: String,
    start: Instant,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        info!("{}...", name);
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        let secs = elapsed.as_secs_f64();
        if secs >= 60.0 {
            info!("{} done ({:.1}m)", self.name, secs / 60.0);
        } else {
            info!("{} done ({:.1}s)", self.name, secs);
        }
        elapsed
    }
}
