/// Upstream repository cloned into the environment root.
pub const JUNEST_REPOSITORY: &str = "https://github.com/fsquillace/junest.git";

/// Environment root on the remote host; `$HOME` is expanded remotely.
pub const JUNEST_ROOT: &str = "$HOME/.local/share/junest";

/// Tools installed when none are given on the command line.
pub const DEFAULT_PACKAGES: &[&str] = &["vim", "ranger", "fish"];

/// Settings for one bootstrap run, passed to the bootstrapper explicitly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub repository_url: String,
    pub root_dir: String,
    /// Relative paths are relative to the remote home directory.
    pub activate_path: String,
    pub activate_mode: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repository_url: JUNEST_REPOSITORY.to_owned(),
            root_dir: JUNEST_ROOT.to_owned(),
            activate_path: "activate".to_owned(),
            activate_mode: 0o644,
        }
    }
}
