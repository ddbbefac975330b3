use std::collections::BTreeSet;

/// Set of executables a periodic task may target.
///
/// The worker pool owns the real registry; the scheduler only asks it
/// questions.
pub trait ExecutableRegistry: Send + Sync {
    fn is_registered(&self, target: &str) -> bool;

    /// All registered targets, sorted.
    fn list_registered(&self) -> Vec<String>;
}

/// Fixed registry built from a list of names (e.g. the `executables`
/// config key).
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    targets: BTreeSet<String>,
}

impl StaticRegistry {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }
}

impl ExecutableRegistry for StaticRegistry {
    fn is_registered(&self, target: &str) -> bool {
        self.targets.contains(target)
    }

    fn list_registered(&self) -> Vec<String> {
        self.targets.iter().cloned().collect()
    }
}
