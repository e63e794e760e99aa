//! Host tool validation.
//!
//! The build shells out to a Python interpreter for the bootstrapper and,
//! on macOS, to `sh` for the runner script.

use super::CheckResult;
use crate::config::Platform;

/// Tools the build needs on `platform`: (tool, purpose, install hint).
fn required_tools(python: &str, platform: Platform) -> Vec<(String, &'static str, &'static str)> {
    let mut tools = vec![(
        python.to_string(),
        "Run virtualenv and query the runtime prefix",
        "Install Python 2.7 and put it on PATH, or pass --python",
    )];
    if platform == Platform::Mac {
        tools.push(("sh".to_string(), "Run the environment's run.sh", "Install a POSIX shell"));
    }
    tools
}

/// Check that all required host tools are installed.
pub fn check_host_tools(python: &str, platform: Platform) -> Vec<CheckResult> {
    required_tools(python, platform)
        .iter()
        .map(|(tool, purpose, install)| check_tool(tool, purpose, install))
        .collect()
}

fn check_tool(tool: &str, purpose: &str, install_hint: &str) -> CheckResult {
    match which::which(tool) {
        Ok(path) => CheckResult::pass(
            format!("{} tool", tool),
            format!("Found at {} ({})", path.display(), purpose),
        ),
        Err(_) => CheckResult::fail(
            format!("{} tool", tool),
            format!("Not found (needed to: {})", purpose),
            install_hint,
        ),
    }
}
