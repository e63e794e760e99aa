use std::fmt;

/// Pipeline states, entered strictly in order.
///
/// There is no way back: a failure in any stage aborts the run, and the
/// next run starts again from [`Stage::Clean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Leftovers of a previous run removed.
    Clean,
    /// Assets fetched and extracted into the staging tree.
    Staged,
    /// Isolated package environment created; installers and overlays applied.
    EnvironmentCreated,
    /// Runtime and template overlay merged into the environment.
    LayoutCopied,
    /// Final directory shape established.
    Reorganized,
    PackagesInstalled,
    /// Launcher shebangs rewritten.
    Relocated,
    /// Installer scripts, bytecode and build folders removed.
    Pruned,
    Packaged,
    /// Staging tree and final layout removed.
    Cleaned,
}

impl Stage {
    pub const FIRST: Stage = Stage::Clean;

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Clean => Some(Stage::Staged),
            Stage::Staged => Some(Stage::EnvironmentCreated),
            Stage::EnvironmentCreated => Some(Stage::LayoutCopied),
            Stage::LayoutCopied => Some(Stage::Reorganized),
            Stage::Reorganized => Some(Stage::PackagesInstalled),
            Stage::PackagesInstalled => Some(Stage::Relocated),
            Stage::Relocated => Some(Stage::Pruned),
            Stage::Pruned => Some(Stage::Packaged),
            Stage::Packaged => Some(Stage::Cleaned),
            Stage::Cleaned => None,
        }
    }

    /// Every stage in pipeline order.
    pub fn all() -> Vec<Stage> {
        std::iter::successors(Some(Self::FIRST), |s| s.next()).collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Clean => "CLEAN",
            Stage::Staged => "STAGED",
            Stage::EnvironmentCreated => "ENVIRONMENT_CREATED",
            Stage::LayoutCopied => "LAYOUT_COPIED",
            Stage::Reorganized => "REORGANIZED",
            Stage::PackagesInstalled => "PACKAGES_INSTALLED",
            Stage::Relocated => "RELOCATED",
            Stage::Pruned => "PRUNED",
            Stage::Packaged => "PACKAGED",
            Stage::Cleaned => "CLEANED",
        }
    }

    /// What the assembler does to reach this stage.
    pub fn description(self) -> &'static str {
        match self {
            Stage::Clean => "Removing leftovers of previous runs",
            Stage::Staged => "Staging assets",
            Stage::EnvironmentCreated => "Creating virtual environment",
            Stage::LayoutCopied => "Copying runtime and templates",
            Stage::Reorganized => "Reorganizing folder structure",
            Stage::PackagesInstalled => "Installing packages",
            Stage::Relocated => "Making scripts relocatable",
            Stage::Pruned => "Pruning build artifacts",
            Stage::Packaged => "Building zip archive",
            Stage::Cleaned => "Removing staging tree",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let all = Stage::all();
        assert_eq!(all.len(), 10);
        assert_eq!(all.first(), Some(&Stage::Clean));
        assert_eq!(all.last(), Some(&Stage::Cleaned));
        assert_eq!(Stage::Reorganized.next(), Some(Stage::PackagesInstalled));
        assert_eq!(Stage::Cleaned.next(), None);
    }
}
