//! OpenSSH client configuration.
//!
//! Only the options needed to open a session are understood: `HostName`,
//! `User`, `Port` and `IdentityFile`. Everything else is ignored, as are
//! `Match` blocks.

use std::{fs, io, path::Path, path::PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SshConfigError {
    #[error("line {line}: `{key}` needs a value")]
    MissingValue { line: usize, key: String },
    #[error("line {line}: invalid port `{value}`")]
    InvalidPort { line: usize, value: String },
    #[error("line {line}: invalid host pattern `{pattern}`")]
    InvalidPattern { line: usize, pattern: String },
}

/// Options resolved for one host alias.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostConfig {
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_files: Vec<PathBuf>,
}

#[derive(Clone, Debug)]
enum Selector {
    Any,
    Host(Vec<(bool, glob::Pattern)>),
    Never,
}

const HOST_MATCH: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// ssh_config only knows `*` and `?`; brackets are ordinary characters.
fn host_pattern(word: &str) -> Result<glob::Pattern, glob::PatternError> {
    let mut escaped = String::with_capacity(word.len());
    for c in word.chars() {
        match c {
            '[' => escaped.push_str("[[]"),
            ']' => escaped.push_str("[]]"),
            c => escaped.push(c),
        }
    }
    glob::Pattern::new(&escaped)
}

impl Selector {
    fn matches(&self, alias: &str) -> bool {
        match self {
            Selector::Any => true,
            Selector::Never => false,
            Selector::Host(patterns) => {
                let mut hit = false;
                for (negated, pattern) in patterns {
                    if pattern.matches_with(alias, HOST_MATCH) {
                        if *negated {
                            return false;
                        }
                        hit = true;
                    }
                }
                hit
            }
        }
    }
}

#[derive(Clone, Debug)]
enum Setting {
    HostName(String),
    User(String),
    Port(u16),
    IdentityFile(PathBuf),
}

#[derive(Clone, Debug)]
struct Block {
    selector: Selector,
    settings: Vec<Setting>,
}

#[derive(Clone, Debug, Default)]
pub struct SshConfig {
    blocks: Vec<Block>,
}

fn split_line(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let split = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or_else(|| line.len());
    let (key, rest) = line.split_at(split);
    let value = rest.trim_start().trim_start_matches('=').trim();
    Some((key, value.trim_matches('"')))
}

impl SshConfig {
    /// Default location, `~/.ssh/config`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ssh").join("config"))
    }

    /// A missing file is an empty configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("in {:?}", path)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No ssh config at {:?}", path);
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("cannot read {:?}", path)),
        }
    }

    pub fn parse(text: &str) -> Result<Self, SshConfigError> {
        let mut blocks = vec![Block {
            selector: Selector::Any,
            settings: Vec::new(),
        }];
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let (key, value) = match split_line(raw) {
                Some(kv) => kv,
                None => continue,
            };
            if value.is_empty() {
                return Err(SshConfigError::MissingValue {
                    line,
                    key: key.to_owned(),
                });
            }
            let setting = match key.to_ascii_lowercase().as_str() {
                "host" => {
                    let mut patterns = Vec::new();
                    for word in value.split_whitespace() {
                        let (negated, pattern) = match word.strip_prefix('!') {
                            Some(p) => (true, p),
                            None => (false, word),
                        };
                        let pattern = host_pattern(pattern).map_err(|_| {
                            SshConfigError::InvalidPattern {
                                line,
                                pattern: word.to_owned(),
                            }
                        })?;
                        patterns.push((negated, pattern));
                    }
                    blocks.push(Block {
                        selector: Selector::Host(patterns),
                        settings: Vec::new(),
                    });
                    continue;
                }
                "match" => {
                    blocks.push(Block {
                        selector: Selector::Never,
                        settings: Vec::new(),
                    });
                    continue;
                }
                "hostname" => Setting::HostName(value.to_owned()),
                "user" => Setting::User(value.to_owned()),
                "port" => Setting::Port(value.parse().map_err(|_| SshConfigError::InvalidPort {
                    line,
                    value: value.to_owned(),
                })?),
                "identityfile" => {
                    Setting::IdentityFile(PathBuf::from(shellexpand::tilde(value).into_owned()))
                }
                _ => continue,
            };
            if let Some(block) = blocks.last_mut() {
                block.settings.push(setting);
            }
        }
        Ok(Self { blocks })
    }

    /// The first value obtained for an option wins; identity files add up.
    pub fn resolve(&self, alias: &str) -> HostConfig {
        let mut host = HostConfig::default();
        for block in self.blocks.iter().filter(|b| b.selector.matches(alias)) {
            for setting in &block.settings {
                match setting {
                    Setting::HostName(h) => {
                        host.hostname.get_or_insert_with(|| h.replace("%h", alias));
                    }
                    Setting::User(u) => {
                        host.user.get_or_insert_with(|| u.clone());
                    }
                    Setting::Port(p) => {
                        host.port.get_or_insert(*p);
                    }
                    Setting::IdentityFile(f) => {
                        if !host.identity_files.contains(f) {
                            host.identity_files.push(f.clone());
                        }
                    }
                }
            }
        }
        host
    }
}
