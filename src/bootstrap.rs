use std::cell::Cell;

use anyhow::Result;

use crate::{
    command::{RemoteCommand, SearchPath},
    config::Config,
    error::{EmptyPackageList, RemoteCommandFailed},
    template::{RenderContext, Template},
    transport::{Output, Transport},
};

/// Launcher inside the environment, also what the activation script runs.
pub const EXEC: &str = "junest";

/// The user-space environment on the remote host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    root: String,
}

impl Environment {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn bin_dir(&self) -> String {
        format!("{}/bin", self.root)
    }

    pub fn render_context(&self) -> RenderContext {
        vec![("path", self.bin_dir()), ("exec", EXEC.to_owned())]
            .into_iter()
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Start,
    RepoEnsured,
    ImageInitialized,
    PackagesInstalled,
    ActivationRendered,
    Done,
    Failed,
}

/// Drives one remote host from nothing to a usable JuNest environment.
pub struct Bootstrapper<T> {
    transport: T,
    config: Config,
    env: Environment,
    template: Template,
    search_path: SearchPath,
    stage: Cell<Stage>,
}

impl<T: Transport> Bootstrapper<T> {
    pub fn new(transport: T, config: Config) -> Self {
        let env = Environment::new(config.root_dir.clone());
        Self {
            transport,
            config,
            env,
            template: Template::activate(),
            search_path: SearchPath::default(),
            stage: Cell::new(Stage::Start),
        }
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.template = template;
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stage(&self) -> Stage {
        self.stage.get()
    }

    fn step<F: FnOnce() -> Result<()>>(&self, next: Stage, f: F) -> Result<()> {
        if let Err(e) = f() {
            log::error!("Failed after {:?}: {:#}", self.stage.get(), e);
            self.stage.set(Stage::Failed);
            return Err(e);
        }
        log::info!("{:?} -> {:?}", self.stage.get(), next);
        self.stage.set(next);
        Ok(())
    }

    fn run(&self, command: RemoteCommand) -> Result<Output> {
        let command = command.with_search_path(self.search_path.current());
        let output = self.transport.run(&command)?;
        if !output.success() {
            return Err(RemoteCommandFailed {
                command: command.to_string(),
                status: output.status,
                output: output.diagnostic(),
            }
            .into());
        }
        Ok(output)
    }

    /// Shallow-clone the JuNest repository unless the root already exists.
    pub fn ensure_repository_present(&self) -> Result<()> {
        let root = self.env.root();
        if self.transport.file_exists(root)? {
            log::debug!("{} already present, not cloning", root);
            return Ok(());
        }
        self.run(
            RemoteCommand::new("git")
                .args(vec!["clone", "-q", "--single-branch", "--depth", "1"])
                .arg(self.config.repository_url.as_str())
                .path(root),
        )?;
        Ok(())
    }

    pub fn initialize_image(&self) -> Result<()> {
        self.run_in_environment(RemoteCommand::new("pacman").arg("-Syy"))?;
        Ok(())
    }

    /// Run `command` through `junest -f` with the environment's bin
    /// directory prepended to `PATH` for this call only.
    pub fn run_in_environment(&self, command: RemoteCommand) -> Result<Output> {
        log::debug!(
            "Running {:?} inside {}",
            command.argv().collect::<Vec<_>>(),
            self.env.root()
        );
        let _scope = self.search_path.prepend(self.env.bin_dir());
        self.run(command.wrapped_in(EXEC, &["-f"]))
    }

    pub fn install_packages<S: AsRef<str>>(&self, packages: &[S]) -> Result<()> {
        if packages.is_empty() {
            return Err(EmptyPackageList.into());
        }
        let install = RemoteCommand::new("pacman")
            .args(vec!["--noconfirm", "--noprogressbar", "--needed", "-Syu"])
            .args(packages.iter().map(|p| p.as_ref()));
        self.run_in_environment(install)?;
        Ok(())
    }

    /// Upload the rendered activation script and make it executable.
    pub fn deploy_activation(&self) -> Result<()> {
        let destination = self.config.activate_path.as_str();
        self.transport.upload_template(
            &self.template,
            destination,
            &self.env.render_context(),
            self.config.activate_mode,
        )?;
        self.run(RemoteCommand::new("chmod").arg("+x").path(destination))?;
        Ok(())
    }

    pub fn bootstrap(&self) -> Result<()> {
        if self.stage.get() != Stage::Start {
            anyhow::bail!("bootstrap already ran (stage {:?})", self.stage.get());
        }
        self.step(Stage::RepoEnsured, || self.ensure_repository_present())?;
        self.step(Stage::ImageInitialized, || self.initialize_image())
    }

    /// Bootstrap, install `packages`, then deploy the activation script.
    pub fn setup<S: AsRef<str>>(&self, packages: &[S]) -> Result<()> {
        self.bootstrap()?;
        self.step(Stage::PackagesInstalled, || self.install_packages(packages))?;
        self.step(Stage::ActivationRendered, || self.deploy_activation())?;
        self.step(Stage::Done, || Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        template::TemplateError,
        transport::fake::{Call, RecordingTransport},
    };
    use pretty_assertions::assert_eq;

    const ROOT: &str = "$HOME/.local/share/junest";

    fn bootstrapper(transport: RecordingTransport) -> Bootstrapper<RecordingTransport> {
        Bootstrapper::new(transport, Config::default())
    }

    fn command_lines(b: &Bootstrapper<RecordingTransport>) -> Vec<String> {
        b.transport()
            .commands()
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    #[test]
    fn bin_dir_is_root_plus_bin() {
        for root in &[ROOT, "/opt/junest", "/opt/junest/", "${XDG_DATA_HOME}/j"] {
            let env = Environment::new(*root);
            assert_eq!(env.bin_dir(), format!("{}/bin", root));
        }
    }

    #[test]
    fn render_context_has_path_and_exec() {
        let ctx = Environment::new(ROOT).render_context();
        assert_eq!(ctx.keys().collect::<Vec<_>>(), ["exec", "path"]);
        assert_eq!(ctx.get("path"), Some("$HOME/.local/share/junest/bin"));
        assert_eq!(ctx.get("exec"), Some("junest"));
    }

    #[test]
    fn repository_is_cloned_at_most_once() {
        let b = bootstrapper(RecordingTransport::default());
        b.ensure_repository_present().unwrap();
        b.ensure_repository_present().unwrap();
        let clones = b
            .transport()
            .commands()
            .into_iter()
            .filter(|c| c.argv().nth(1) == Some("clone"))
            .count();
        assert_eq!(clones, 1);
    }

    #[test]
    fn present_repository_is_left_alone() {
        let transport = RecordingTransport::default();
        transport.present.borrow_mut().push(ROOT.to_owned());
        let b = bootstrapper(transport);
        b.ensure_repository_present().unwrap();
        assert_eq!(b.transport().calls(), vec![Call::Exists(ROOT.to_owned())]);
    }

    #[test]
    fn existence_check_failure_propagates() {
        let transport = RecordingTransport {
            broken_exists: true,
            ..RecordingTransport::default()
        };
        let b = bootstrapper(transport);
        assert!(b.bootstrap().is_err());
        assert!(b.transport().commands().is_empty());
        assert_eq!(b.stage(), Stage::Failed);
    }

    #[test]
    fn run_in_environment_scopes_search_path_to_the_call() {
        let b = bootstrapper(RecordingTransport::default());
        b.run_in_environment(RemoteCommand::new("pacman").arg("-Syy"))
            .unwrap();
        assert!(b.search_path.is_empty());
        b.run(RemoteCommand::new("true")).unwrap();

        let commands = b.transport().commands();
        assert_eq!(commands[0].search_path(), ["$HOME/.local/share/junest/bin"]);
        assert!(commands[0].to_string().ends_with("junest -f pacman -Syy"));
        assert!(commands[1].search_path().is_empty());
        assert_eq!(commands[1].to_string(), "true");
    }

    #[test]
    fn search_path_is_restored_when_command_fails() {
        let b = bootstrapper(RecordingTransport::failing("pacman"));
        let err = b.initialize_image().unwrap_err();
        let failed = err.downcast_ref::<RemoteCommandFailed>().unwrap();
        assert_eq!(failed.status, 1);
        assert_eq!(failed.output, "junest: simulated failure");
        assert!(b.search_path.is_empty());
    }

    #[test]
    fn packages_are_space_joined_in_order() {
        let b = bootstrapper(RecordingTransport::default());
        b.install_packages(&["vim", "ranger", "fish"]).unwrap();
        let lines = command_lines(&b);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("-Syu vim ranger fish"), "{}", lines[0]);
    }

    #[test]
    fn empty_package_list_is_rejected() {
        let b = bootstrapper(RecordingTransport::default());
        let err = b.install_packages::<&str>(&[]).unwrap_err();
        assert!(err.downcast_ref::<EmptyPackageList>().is_some());
        assert!(b.transport().calls().is_empty());
    }

    #[test]
    fn failed_clone_aborts_the_rest() {
        let b = bootstrapper(RecordingTransport::failing("git"));
        let err = b.setup(&["vim", "ranger", "fish"]).unwrap_err();
        assert!(err.downcast_ref::<RemoteCommandFailed>().is_some());
        assert_eq!(b.stage(), Stage::Failed);
        let calls = b.transport().calls();
        assert_eq!(calls.len(), 2, "{:?}", calls);
        assert!(matches!(calls[0], Call::Exists(_)));
        assert!(!calls.iter().any(|c| matches!(c, Call::Upload { .. })));
        assert!(!command_lines(&b).iter().any(|l| l.contains("pacman")));
    }

    #[test]
    fn bad_template_aborts_before_upload() {
        let b = bootstrapper(RecordingTransport::default())
            .with_template(Template::new("activate", "{{ shell }}"));
        let err = b.setup(&["vim"]).unwrap_err();
        assert!(err.downcast_ref::<TemplateError>().is_some());
        assert_eq!(b.stage(), Stage::Failed);
        assert!(!command_lines(&b).iter().any(|l| l.starts_with("chmod")));
    }

    #[test]
    fn bootstrap_runs_only_once() {
        let b = bootstrapper(RecordingTransport::default());
        b.bootstrap().unwrap();
        assert_eq!(b.stage(), Stage::ImageInitialized);
        assert!(b.bootstrap().is_err());
    }

    #[test]
    fn full_setup_on_fresh_host() {
        let b = bootstrapper(RecordingTransport::default());
        b.setup(&["vim", "ranger", "fish"]).unwrap();
        assert_eq!(b.stage(), Stage::Done);

        let calls = b.transport().calls();
        assert_eq!(calls.len(), 6, "{:?}", calls);
        assert_eq!(calls[0], Call::Exists(ROOT.to_owned()));
        assert_eq!(
            command_lines(&b),
            vec![
                r#"git clone -q --single-branch --depth 1 https://github.com/fsquillace/junest.git "$HOME/.local/share/junest""#,
                r#"export PATH="$HOME/.local/share/junest/bin:$PATH" && junest -f pacman -Syy"#,
                r#"export PATH="$HOME/.local/share/junest/bin:$PATH" && junest -f pacman --noconfirm --noprogressbar --needed -Syu vim ranger fish"#,
                r#"chmod +x "activate""#,
            ]
        );
        match &calls[4] {
            Call::Upload {
                template,
                destination,
                context,
                rendered,
                mode,
            } => {
                assert_eq!(template, "activate");
                assert_eq!(destination, "activate");
                assert_eq!(context.get("path"), Some("$HOME/.local/share/junest/bin"));
                assert_eq!(context.get("exec"), Some("junest"));
                assert!(rendered.contains(r#"export PATH="$HOME/.local/share/junest/bin:$PATH""#));
                assert_eq!(*mode, 0o644);
            }
            other => panic!("expected upload, got {:?}", other),
        }
    }
}
