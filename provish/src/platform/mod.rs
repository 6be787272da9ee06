//! Target operating system families.
//!
//! The OS of a target decides which solution from the plan runs (`shell`
//! over SSH or `batch` over the administrative share), which shell wraps the
//! compound command, and whether the garbled-echo heuristic is needed.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::solution::SolutionKind;

/// Port the administrative-share executor listens on.
pub const ADMIN_SHARE_PORT: u16 = 445;

/// Operating system family of a target host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetOs {
    #[default]
    Linux,
    Aix,
    Solaris,
    Darwin,
    FreeBsd,
    Windows,
    Other,
}

impl TargetOs {
    /// Shell used for the compound invocation.
    pub fn shell(&self) -> &'static str {
        match self {
            Self::Aix => "ksh",
            _ => "bash",
        }
    }

    /// Whether the shell may echo a truncated or garbled copy of input.
    pub fn echoes_garbled(&self) -> bool {
        matches!(self, Self::Aix)
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }

    /// Which solution runs for this OS reached on `port`.
    ///
    /// Only Windows on the administrative share port uses `batch`; a Windows
    /// host with an SSH server gets the `shell` solution like everyone else.
    pub fn solution_kind(&self, port: u16) -> SolutionKind {
        if self.is_windows() && port == ADMIN_SHARE_PORT {
            SolutionKind::Batch
        } else {
            SolutionKind::Shell
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Aix => "aix",
            Self::Solaris => "solaris",
            Self::Darwin => "darwin",
            Self::FreeBsd => "freebsd",
            Self::Windows => "windows",
            Self::Other => "other",
        }
    }
}

impl FromStr for TargetOs {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "linux" => Self::Linux,
            "aix" => Self::Aix,
            "solaris" | "sunos" => Self::Solaris,
            "darwin" | "macos" => Self::Darwin,
            "freebsd" => Self::FreeBsd,
            "windows" => Self::Windows,
            _ => Self::Other,
        })
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(s: &str) -> TargetOs {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(os("AIX"), TargetOs::Aix);
        assert_eq!(os(" linux "), TargetOs::Linux);
        assert_eq!(os("macos"), TargetOs::Darwin);
        assert_eq!(os("plan9"), TargetOs::Other);
    }

    #[test]
    fn test_shell_per_os() {
        assert_eq!(TargetOs::Aix.shell(), "ksh");
        assert_eq!(TargetOs::Linux.shell(), "bash");
        assert!(TargetOs::Aix.echoes_garbled());
        assert!(!TargetOs::Solaris.echoes_garbled());
    }

    #[test]
    fn test_solution_selection() {
        assert_eq!(TargetOs::Windows.solution_kind(445), SolutionKind::Batch);
        assert_eq!(TargetOs::Windows.solution_kind(22), SolutionKind::Shell);
        assert_eq!(TargetOs::Linux.solution_kind(445), SolutionKind::Shell);
    }
}
