//! Command allowlist, argument validation, and path confinement.

use ry_common::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Argument substrings that enable command injection under a shell.
const UNSAFE_SEQUENCES: &[&str] = &[";", "&&", "||", "`", "$(", ">", ">>", "<", "|"];

/// Validates commands and their arguments before a process definition is
/// accepted.
#[derive(Debug, Clone)]
pub struct CommandGate {
    allowed: HashSet<String>,
}

impl CommandGate {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    /// Default allowlist covering the Rails/web development toolchain.
    pub fn with_defaults() -> Self {
        Self::new([
            "ruby", "rails", "bundle", "bundler", "rake", "puma", "sidekiq", "foreman", "rackup",
            "node", "npm", "npx", "yarn", "pnpm", "bun", "vite",
            "python", "python3", "flask", "gunicorn",
            "bin/rails", "bin/dev", "bin/vite", "bin/setup",
            "sh", "bash", "zsh", "env", "make", "docker", "docker-compose",
        ])
    }

    /// Check a command and its arguments.
    ///
    /// The command is compared by its final path component, so `/usr/bin/ruby`
    /// and `ruby` both match, but glob characters anywhere are refused.
    pub fn check(&self, command: &str, args: &[String]) -> Result<()> {
        if command.contains('*') || command.contains('?') || command.contains('[') {
            return Err(Error::CommandNotAllowed {
                command: command.to_string(),
            });
        }

        let basename = Path::new(command)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(command);

        // `bin/rails`-style project scripts are allowlisted by their
        // two-component form, everything else by basename.
        if !self.allowed.contains(basename) && !self.allowed.contains(command) {
            return Err(Error::CommandNotAllowed {
                command: command.to_string(),
            });
        }

        for arg in args {
            Self::check_argument(arg)?;
        }
        Ok(())
    }

    /// Reject arguments carrying shell-metacharacter sequences.
    pub fn check_argument(arg: &str) -> Result<()> {
        for seq in UNSAFE_SEQUENCES {
            if arg.contains(seq) {
                return Err(Error::UnsafeArgument {
                    argument: arg.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Confines working directories to an allowlisted set of roots.
#[derive(Debug, Clone)]
pub struct PathGate {
    roots: Vec<PathBuf>,
}

impl PathGate {
    /// Gate allowing the given roots. Roots that cannot be canonicalized
    /// are dropped.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            roots: roots
                .into_iter()
                .filter_map(|p| p.as_ref().canonicalize().ok())
                .collect(),
        }
    }

    /// Default confinement: the project root and the user's home directory.
    pub fn with_defaults(project_root: impl AsRef<Path>) -> Self {
        let mut roots = vec![project_root.as_ref().to_path_buf()];
        if let Some(home) = dirs::home_dir() {
            roots.push(home);
        }
        Self::new(roots)
    }

    /// Resolve `path` (following symlinks) and verify it lives under one of
    /// the allowed roots.
    pub fn check(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let resolved = path.canonicalize().map_err(|_| Error::PathNotAllowed {
            path: path.display().to_string(),
        })?;

        if self.roots.iter().any(|root| resolved.starts_with(root)) {
            Ok(resolved)
        } else {
            Err(Error::PathNotAllowed {
                path: path.display().to_string(),
            })
        }
    }
}
