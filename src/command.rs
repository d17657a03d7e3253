use std::{cell::RefCell, fmt};

/// A single argument of a remote command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Arg {
    /// Passed to the remote program verbatim.
    Literal(String),
    /// Path expression such as `$HOME/.local/share/junest`; variables are
    /// expanded by the remote shell, nothing else is.
    Path(String),
}

impl Arg {
    pub fn as_str(&self) -> &str {
        match self {
            Arg::Literal(s) | Arg::Path(s) => s,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Literal(s) => f.write_str(&quote(s)),
            Arg::Path(s) => f.write_str(&quote_path(s)),
        }
    }
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c)
}

fn quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_safe) {
        return word.to_owned();
    }
    format!("'{}'", word.replace('\'', r#"'\''"#))
}

fn quote_path(path: &str) -> String {
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for c in path.chars() {
        if matches!(c, '"' | '\\' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Program plus arguments, rendered to a shell line only when it is sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteCommand {
    program: String,
    args: Vec<Arg>,
    search_path: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            search_path: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Arg::Literal(arg.into()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args
            .extend(args.into_iter().map(|a| Arg::Literal(a.into())));
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.args.push(Arg::Path(path.into()));
        self
    }

    /// Run this command through `program flags...`, e.g. `junest -f`.
    pub fn wrapped_in(self, program: &str, flags: &[&str]) -> Self {
        let mut args: Vec<Arg> = flags.iter().map(|f| Arg::Literal((*f).to_owned())).collect();
        args.push(Arg::Literal(self.program));
        args.extend(self.args);
        Self {
            program: program.to_owned(),
            args,
            search_path: self.search_path,
        }
    }

    /// Directories prepended to the remote `PATH` for this command only.
    pub fn with_search_path(mut self, dirs: Vec<String>) -> Self {
        self.search_path = dirs;
        self
    }

    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(Arg::as_str))
    }

    #[cfg(test)]
    pub fn search_path(&self) -> &[String] {
        &self.search_path
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.search_path.is_empty() {
            let mut dirs = self.search_path.join(":");
            dirs.push_str(":$PATH");
            write!(f, "export PATH={} && ", quote_path(&dirs))?;
        }
        f.write_str(&quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Stack of directories temporarily prepended to the remote search path.
#[derive(Debug, Default)]
pub struct SearchPath {
    dirs: RefCell<Vec<String>>,
}

impl SearchPath {
    /// Prepend `dir` until the returned guard is dropped.
    pub fn prepend(&self, dir: impl Into<String>) -> SearchPathGuard<'_> {
        let dir = dir.into();
        self.dirs.borrow_mut().insert(0, dir.clone());
        SearchPathGuard { owner: self, dir }
    }

    pub fn current(&self) -> Vec<String> {
        self.dirs.borrow().clone()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.dirs.borrow().is_empty()
    }
}

#[must_use = "the directory is removed from the search path as soon as the guard is dropped"]
pub struct SearchPathGuard<'a> {
    owner: &'a SearchPath,
    dir: String,
}

impl Drop for SearchPathGuard<'_> {
    fn drop(&mut self) {
        let mut dirs = self.owner.dirs.borrow_mut();
        if let Some(index) = dirs.iter().position(|d| *d == self.dir) {
            dirs.remove(index);
        }
    }
}
