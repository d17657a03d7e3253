/// A remote command exited with a nonzero status.
#[derive(Debug, thiserror::Error)]
#[error("remote command `{command}` exited with status {status}: {output}")]
pub struct RemoteCommandFailed {
    pub command: String,
    pub status: i32,
    pub output: String,
}

/// `install_packages` was called without any package names.
#[derive(Clone, Debug, thiserror::Error)]
#[error("refusing to run the package manager with an empty package list")]
pub struct EmptyPackageList;
