use anyhow::{bail, Result};

use crate::{
    command::RemoteCommand,
    template::{RenderContext, Template},
};

/// Exit status and captured streams of a finished remote command.
///
/// Over SSH both streams arrive merged in `stdout`; `stderr` stays empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Output {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Whatever the command printed, stderr first since that is where the
    /// reason for a failure usually is.
    pub fn diagnostic(&self) -> String {
        match (self.stderr.trim(), self.stdout.trim()) {
            ("", out) => out.to_owned(),
            (err, "") => err.to_owned(),
            (err, out) => format!("{}\n{}", err, out),
        }
    }
}

/// Interpret the status of `test -e <path>`: 0 is present, 1 is absent,
/// anything else means the check itself failed.
pub fn exists_from(output: &Output, path: &str) -> Result<bool> {
    match output.status {
        0 => Ok(true),
        1 => Ok(false),
        status => bail!(
            "cannot check whether {} exists (status {}): {}",
            path,
            status,
            output.diagnostic()
        ),
    }
}

/// The three primitives the bootstrapper needs from a remote host.
pub trait Transport {
    fn run(&self, command: &RemoteCommand) -> Result<Output>;

    /// `path` may contain variables that the remote shell expands.
    fn file_exists(&self, path: &str) -> Result<bool>;

    fn upload_template(
        &self,
        template: &Template,
        destination: &str,
        context: &RenderContext,
        mode: i32,
    ) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_prefers_stderr() {
        let output = Output {
            status: 1,
            stdout: "resolving dependencies...\n".into(),
            stderr: "error: target not found: vimm\n".into(),
        };
        assert!(!output.success());
        assert_eq!(
            output.diagnostic(),
            "error: target not found: vimm\nresolving dependencies..."
        );
    }

    fn status(status: i32) -> Output {
        Output {
            status,
            ..Output::default()
        }
    }

    #[test]
    fn test_status_maps_to_existence() {
        assert!(exists_from(&status(0), "/opt/junest").unwrap());
        assert!(!exists_from(&status(1), "/opt/junest").unwrap());
    }

    #[test]
    fn other_test_status_is_an_error() {
        let output = Output {
            status: 2,
            stdout: String::new(),
            stderr: "test: too many arguments".into(),
        };
        let err = exists_from(&output, "/opt/junest").unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot check whether /opt/junest exists (status 2): test: too many arguments"
        );
        assert!(exists_from(&status(255), "/opt/junest").is_err());
    }

    #[test]
    fn diagnostic_of_merged_streams_keeps_everything() {
        let output = Output {
            status: 1,
            stdout: "warning: vim-9.1 is up to date\nerror: failed to commit transaction\n".into(),
            stderr: String::new(),
        };
        assert_eq!(
            output.diagnostic(),
            "warning: vim-9.1 is up to date\nerror: failed to commit transaction"
        );
    }

    #[test]
    fn diagnostic_of_quiet_command_is_empty() {
        assert_eq!(Output::default().diagnostic(), "");
        assert!(Output::default().success());
    }
}
