//! Shell selection for commands run on behalf of the user.
//!
//! Two policies:
//! - [`ShellResolver::preferred`]: the user's `SHELL`, else the platform default.
//! - [`ShellResolver::acceptable`]: like `preferred`, but shells whose
//!   scripting semantics break programmatic command injection
//!   ([`BLACKLIST`]) are replaced by the platform default.
//!
//! The resolver snapshots the relevant environment once, so every lookup
//! is deterministic for a given snapshot.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::{AppError, Result};

/// Shell names rejected by [`ShellResolver::acceptable`].
pub const BLACKLIST: &[&str] = &["fish", "nu"];

/// Explicit override for the Windows shell.
pub const GIT_BASH_ENV: &str = "TETHER_GIT_BASH_PATH";

/// Host platform family, as far as shell defaults are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// macOS.
    MacOs,
    /// Windows.
    Windows,
    /// Any other POSIX system.
    Posix,
}

impl Platform {
    /// Platform the binary was compiled for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }
}

/// Snapshot of the environment used to resolve a shell.
#[derive(Debug, Clone)]
pub struct ShellResolver {
    platform: Platform,
    shell: Option<String>,
    path: Option<OsString>,
    git_bash: Option<String>,
    comspec: Option<String>,
}

impl ShellResolver {
    /// Resolver for the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            platform: Platform::current(),
            shell: non_empty(env::var("SHELL").ok()),
            path: env::var_os("PATH"),
            git_bash: non_empty(env::var(GIT_BASH_ENV).ok()),
            comspec: non_empty(env::var("COMSPEC").ok()),
        }
    }

    /// Resolver with an empty environment for `platform`.
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            shell: None,
            path: None,
            git_bash: None,
            comspec: None,
        }
    }

    /// Set the configured user shell (`SHELL`).
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = non_empty(Some(shell.into()));
        self
    }

    /// Set the executable search path (`PATH`).
    #[must_use]
    pub fn with_path(mut self, path: impl Into<OsString>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the Windows shell override.
    #[must_use]
    pub fn with_git_bash(mut self, path: impl Into<String>) -> Self {
        self.git_bash = non_empty(Some(path.into()));
        self
    }

    /// Set the Windows command interpreter (`COMSPEC`).
    #[must_use]
    pub fn with_comspec(mut self, comspec: impl Into<String>) -> Self {
        self.comspec = non_empty(Some(comspec.into()));
        self
    }

    /// The user's configured shell, else the platform default.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Shell` if no shell is configured and no platform
    /// default exists.
    pub fn preferred(&self) -> Result<PathBuf> {
        match &self.shell {
            Some(shell) => Ok(PathBuf::from(shell)),
            None => self.fallback(),
        }
    }

    /// Like [`Self::preferred`], but never returns a [`BLACKLIST`]ed shell.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Shell` if the platform default cannot be resolved.
    pub fn acceptable(&self) -> Result<PathBuf> {
        match &self.shell {
            Some(shell) if !is_blacklisted(Path::new(shell)) => Ok(PathBuf::from(shell)),
            _ => self.fallback(),
        }
    }

    /// Platform default shell, ignoring `SHELL`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Shell` on a POSIX host without `bash` on `PATH`
    /// and without `/bin/sh`.
    pub fn fallback(&self) -> Result<PathBuf> {
        match self.platform {
            Platform::MacOs => Ok(PathBuf::from("/bin/zsh")),
            Platform::Posix => {
                if let Some(bash) = self.which("bash") {
                    return Ok(bash);
                }
                let sh = PathBuf::from("/bin/sh");
                if sh.exists() {
                    Ok(sh)
                } else {
                    Err(AppError::Shell(
                        "no usable shell: bash not on PATH and /bin/sh missing".into(),
                    ))
                }
            }
            Platform::Windows => {
                if let Some(shell) = &self.git_bash {
                    return Ok(PathBuf::from(shell));
                }
                if let Some(bash) = self.git_bash_beside_git() {
                    return Ok(bash);
                }
                Ok(PathBuf::from(
                    self.comspec.clone().unwrap_or_else(|| "cmd.exe".into()),
                ))
            }
        }
    }

    // git.exe lives in <root>/cmd, bash.exe in <root>/bin.
    fn git_bash_beside_git(&self) -> Option<PathBuf> {
        let git = self.which("git.exe").or_else(|| self.which("git"))?;
        let root = git.parent()?.parent()?;
        let bash = root.join("bin").join("bash.exe");
        bash.is_file().then_some(bash)
    }

    fn which(&self, bin: &str) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        env::split_paths(path)
            .map(|dir| dir.join(bin))
            .find(|candidate| candidate.is_file())
    }
}

/// [`ShellResolver::preferred`] for the current environment.
///
/// # Errors
///
/// See [`ShellResolver::preferred`].
pub fn preferred() -> Result<PathBuf> {
    ShellResolver::from_env().preferred()
}

/// [`ShellResolver::acceptable`] for the current environment.
///
/// # Errors
///
/// See [`ShellResolver::acceptable`].
pub fn acceptable() -> Result<PathBuf> {
    ShellResolver::from_env().acceptable()
}

/// Lower-cased executable name without directory or `.exe` suffix.
///
/// Both `/` and `\` separate directories, whatever the host platform.
#[must_use]
pub fn shell_name(shell: &Path) -> String {
    let path = shell.to_string_lossy();
    let name = path
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_lowercase();
    match name.strip_suffix(".exe") {
        Some(stem) => stem.to_owned(),
        None => name,
    }
}

fn is_blacklisted(shell: &Path) -> bool {
    BLACKLIST.contains(&shell_name(shell).as_str())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Arguments that run one command string through a given shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    /// Shell executable.
    pub shell: PathBuf,
    /// Arguments, ending with the command (or a script wrapping it).
    pub args: Vec<String>,
}

impl ShellInvocation {
    /// Build the invocation for `command` under `shell`.
    ///
    /// Login shells (`bash`, `zsh`) source the user's rc files first so
    /// aliases and `PATH` tweaks apply, then `eval` the command.
    #[must_use]
    pub fn build(shell: &Path, command: &str) -> Self {
        let args = match shell_name(shell).as_str() {
            "zsh" => vec![
                "-c".to_owned(),
                "-l".to_owned(),
                format!(
                    "\n  [[ -f ~/.zshenv ]] && source ~/.zshenv >/dev/null 2>&1 || true\n  \
                     [[ -f \"${{ZDOTDIR:-$HOME}}/.zshrc\" ]] && source \"${{ZDOTDIR:-$HOME}}/.zshrc\" >/dev/null 2>&1 || true\n  \
                     eval {}\n",
                    quote(command)
                ),
            ],
            "bash" => vec![
                "-c".to_owned(),
                "-l".to_owned(),
                format!(
                    "\n  shopt -s expand_aliases\n  \
                     [[ -f ~/.bashrc ]] && source ~/.bashrc >/dev/null 2>&1 || true\n  \
                     eval {}\n",
                    quote(command)
                ),
            ],
            "cmd" => vec!["/c".to_owned(), command.to_owned()],
            "powershell" | "pwsh" => vec![
                "-NoProfile".to_owned(),
                "-Command".to_owned(),
                command.to_owned(),
            ],
            // nu, fish, and anything unknown: plain -c, no login flag.
            _ => vec!["-c".to_owned(), command.to_owned()],
        };

        Self {
            shell: shell.to_path_buf(),
            args,
        }
    }
}

// Double-quoted so `eval` sees the command verbatim; expansion happens
// once, inside `eval`.
fn quote(command: &str) -> String {
    let mut out = String::with_capacity(command.len() + 2);
    out.push('"');
    for ch in command.chars() {
        if matches!(ch, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}
