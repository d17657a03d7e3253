mod bootstrap;
mod command;
mod config;
mod error;
mod ssh;
mod ssh_config;
mod template;
mod transport;

use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;

use crate::{
    bootstrap::Bootstrapper,
    config::{Config, DEFAULT_PACKAGES},
    ssh::{Ssh, Target},
    ssh_config::SshConfig,
    template::Template,
};

/// Install a JuNest environment on a remote host
#[derive(StructOpt, Debug)]
#[structopt(name = "junest-deploy")]
pub struct Opt {
    /// SSH login (defaults to the ssh config, then $USER)
    #[structopt(short, long)]
    login: Option<String>,
    /// SSH port (defaults to the ssh config, then 22)
    #[structopt(short, long)]
    port: Option<u16>,
    /// SSH private key path (assumed same public key name with .pub)
    #[structopt(short, long, parse(from_os_str))]
    keyfile: Option<PathBuf>,
    /// OpenSSH client configuration to resolve HOST with
    #[structopt(long, parse(from_os_str))]
    ssh_config: Option<PathBuf>,
    /// Repository to clone into the environment root
    #[structopt(long)]
    repo: Option<String>,
    /// Environment root on the remote host, may use remote variables
    #[structopt(long)]
    root: Option<String>,
    /// Activation script template to use instead of the built-in one
    #[structopt(long, parse(from_os_str))]
    template: Option<PathBuf>,
    /// Log level (error, warn, info, debug, trace)
    #[structopt(long, default_value = "info")]
    log_level: log::LevelFilter,
    /// Server address or ssh config alias
    #[structopt(name = "HOST")]
    host: String,
    /// Packages to install (default: vim ranger fish)
    #[structopt(name = "PACKAGES")]
    packages: Vec<String>,
}

fn load_ssh_config(opt: &Opt) -> Result<SshConfig> {
    match opt.ssh_config.clone().or_else(SshConfig::default_path) {
        Some(path) => SshConfig::load(path),
        None => Ok(SshConfig::default()),
    }
}

/// Command line first, then the ssh config, then `$USER` and port 22.
fn resolve_target(opt: &Opt, ssh_config: &SshConfig, env_user: Option<String>) -> Result<Target> {
    let host = ssh_config.resolve(&opt.host);
    let login = opt
        .login
        .clone()
        .or(host.user)
        .or(env_user)
        .ok_or_else(|| anyhow::anyhow!("no login given and $USER is not set"))?;
    let mut identity_files: Vec<PathBuf> = opt.keyfile.iter().cloned().collect();
    identity_files.extend(host.identity_files);
    Ok(Target {
        host: host.hostname.unwrap_or_else(|| opt.host.clone()),
        port: opt.port.or(host.port).unwrap_or(22),
        login,
        identity_files,
    })
}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    simple_logger::SimpleLogger::default()
        .with_level(opt.log_level)
        .init()?;

    let mut config = Config::default();
    if let Some(repo) = &opt.repo {
        config.repository_url = repo.clone();
    }
    if let Some(root) = &opt.root {
        config.root_dir = root.clone();
    }
    let template = match &opt.template {
        Some(path) => Template::from_file(path)?,
        None => Template::activate(),
    };
    let packages: Vec<String> = if opt.packages.is_empty() {
        DEFAULT_PACKAGES.iter().map(|p| (*p).to_owned()).collect()
    } else {
        opt.packages.clone()
    };

    let ssh_config = load_ssh_config(&opt)?;
    let target = resolve_target(&opt, &ssh_config, std::env::var("USER").ok())?;
    let ssh = Ssh::connect(&target).context("SSH connection failed")?;
    log::info!("Connected to {} as {}", target.address(), target.login);

    let bootstrapper = Bootstrapper::new(ssh, config).with_template(template);
    bootstrapper
        .setup(packages.as_slice())
        .with_context(|| format!("setup of {} failed", opt.host))?;
    log::info!(
        "JuNest ready in {} on {} ({:?})",
        bootstrapper.environment().root(),
        opt.host,
        bootstrapper.stage()
    );
    Ok(())
}
