//! Administrative privilege check.
//!
//! The Windows build runs the MSYS installer, which needs an elevated
//! shell. The check runs before any filesystem action.

use thiserror::Error;

use super::CheckResult;
use crate::config::Platform;
use crate::process::Cmd;

/// Exit code used when the build lacks required privileges.
pub const EXIT_NOT_ELEVATED: i32 = 126;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Sorry, building the {platform} environment requires administrative privileges.")]
pub struct NotElevated {
    pub platform: Platform,
}

/// Whether the current process runs with administrative rights.
#[cfg(windows)]
pub fn is_elevated() -> bool {
    // `net session` is refused for non-administrators.
    Cmd::new("net")
        .arg("session")
        .allow_fail()
        .run()
        .map(|r| r.success())
        .unwrap_or(false)
}

/// Whether the current process runs with administrative rights.
#[cfg(not(windows))]
pub fn is_elevated() -> bool {
    Cmd::new("id")
        .arg("-u")
        .allow_fail()
        .run()
        .map(|r| r.success() && r.stdout.trim() == "0")
        .unwrap_or(false)
}

/// Fail when `platform` needs elevation and the process does not have it.
pub fn ensure_elevated(platform: Platform, elevated: bool) -> Result<(), NotElevated> {
    if platform.requires_elevation() && !elevated {
        return Err(NotElevated { platform });
    }
    Ok(())
}

pub fn check_privilege(platform: Platform) -> CheckResult {
    if !platform.requires_elevation() {
        return CheckResult::pass("Privileges", "Not required");
    }
    match ensure_elevated(platform, is_elevated()) {
        Ok(()) => CheckResult::pass("Privileges", "Running elevated"),
        Err(e) => CheckResult::fail(
            "Privileges",
            e.to_string(),
            "Run the build from an administrator command prompt",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_requires_elevation() {
        assert_eq!(
            ensure_elevated(Platform::Windows, false),
            Err(NotElevated {
                platform: Platform::Windows
            })
        );
        assert!(ensure_elevated(Platform::Windows, true).is_ok());
    }

    #[test]
    fn test_mac_never_requires_elevation() {
        assert!(ensure_elevated(Platform::Mac, false).is_ok());
        assert!(check_privilege(Platform::Mac).passed);
    }
}
