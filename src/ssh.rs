use std::{
    io::{Read, Write},
    net::TcpStream,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use ssh2::Session;

use crate::{
    command::RemoteCommand,
    template::{RenderContext, Template},
    transport::{exists_from, Output, Transport},
};

/// Where and as whom to connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub identity_files: Vec<PathBuf>,
}

impl Target {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct Ssh {
    session: Session,
}

impl Ssh {
    pub fn connect(target: &Target) -> Result<Self> {
        let address = target.address();
        let tcp = TcpStream::connect(&address)
            .with_context(|| format!("cannot reach {}", address))?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        let login = target.login.as_str();
        if let Err(e) = session.userauth_agent(login) {
            log::debug!("ssh-agent authentication failed: {}", e);
        }
        for key in &target.identity_files {
            if session.authenticated() {
                break;
            }
            authenticate_with_key(&session, login, key)?;
        }
        if !session.authenticated() {
            let password = rpassword::read_password_from_tty(Some("Password:"))?;
            session.userauth_password(login, password.trim())?;
        }
        if !session.authenticated() {
            return Err(anyhow::anyhow!("login failed for user {}", login));
        }
        Ok(Self { session })
    }

    pub fn execute(&self, cmd: &str) -> Result<Output> {
        log::info!(">{}", cmd);
        let mut channel = self.session.channel_session()?;
        // stderr shares the channel window with stdout; merged, one reader
        // drains both and a noisy stderr cannot stall the command.
        channel.handle_extended_data(ssh2::ExtendedData::Merge)?;
        channel.exec(cmd)?;
        let mut combined = String::new();
        channel.read_to_string(&mut combined)?;
        channel.wait_close()?;
        let status = channel.exit_status()?;
        log::debug!("<{} exited with {}", cmd, status);
        Ok(Output {
            status,
            stdout: combined,
            stderr: String::new(),
        })
    }

    pub fn send<R: AsRef<Path>>(&self, remote: R, mode: i32, contents: &[u8]) -> Result<()> {
        log::debug!("Sending {} bytes -> {:?}", contents.len(), remote.as_ref());
        let mut remote_file =
            self.session
                .scp_send(remote.as_ref(), mode, contents.len() as u64, None)?;
        remote_file.write_all(contents)?;
        remote_file.send_eof()?;
        remote_file.wait_eof()?;
        remote_file.close()?;
        remote_file.wait_close()?;
        Ok(())
    }
}

fn authenticate_with_key(session: &Session, login: &str, key: &Path) -> Result<()> {
    if !key.is_file() {
        log::debug!("Skipping missing identity file {:?}", key);
        return Ok(());
    }
    let public = key.with_extension("pub");
    let public = Some(public.as_path()).filter(|p| p.is_file());
    if session.userauth_pubkey_file(login, public, key, None).is_ok() {
        return Ok(());
    }
    let prompt = format!("Passphrase for {}:", key.display());
    let passphrase = rpassword::read_password_from_tty(Some(prompt.as_str()))?;
    if let Err(e) = session.userauth_pubkey_file(login, public, key, Some(passphrase.as_str())) {
        log::warn!("Key {:?} rejected: {}", key, e);
    }
    Ok(())
}

impl Transport for Ssh {
    fn run(&self, command: &RemoteCommand) -> Result<Output> {
        self.execute(&command.to_string())
    }

    fn file_exists(&self, path: &str) -> Result<bool> {
        let test = RemoteCommand::new("test").arg("-e").path(path);
        let output = self.execute(&test.to_string())?;
        exists_from(&output, path)
    }

    fn upload_template(
        &self,
        template: &Template,
        destination: &str,
        context: &RenderContext,
        mode: i32,
    ) -> Result<()> {
        let rendered = template.render(context)?;
        self.send(destination, mode, rendered.as_bytes())
            .with_context(|| format!("cannot upload {} to {}", template.name(), destination))
    }
}
