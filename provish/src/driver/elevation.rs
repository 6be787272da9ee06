//! Automatic privilege elevation for non-administrative accounts.

/// A command line prepared for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevatedCommand {
    /// What is written to the shell.
    pub line: String,

    /// The unprefixed command, when a prefix was added.
    pub bare: Option<String>,
}

/// Which accounts are administrative and how everyone else elevates.
///
/// Elevation is unconditional: every command sent by a non-administrative
/// account is prefixed. There is no per-command opt-out.
#[derive(Debug, Clone)]
pub struct ElevationPolicy {
    admin_accounts: Vec<String>,
    prefix: String,
}

impl Default for ElevationPolicy {
    fn default() -> Self {
        Self {
            admin_accounts: vec![
                "root".to_string(),
                "Administrator".to_string(),
                "administrator".to_string(),
            ],
            prefix: "sudo ".to_string(),
        }
    }
}

impl ElevationPolicy {
    /// Use a different elevation prefix (e.g. `"pfexec "`).
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Replace the set of administrative account names.
    pub fn with_admin_accounts<I, A>(mut self, accounts: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.admin_accounts = accounts.into_iter().map(Into::into).collect();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_admin(&self, account: &str) -> bool {
        self.admin_accounts.iter().any(|a| a == account)
    }

    /// Prefix `command` unless `account` is administrative.
    pub fn apply(&self, account: &str, command: &str) -> ElevatedCommand {
        if self.is_admin(account) || command.starts_with(&self.prefix) {
            return ElevatedCommand {
                line: command.to_string(),
                bare: None,
            };
        }
        ElevatedCommand {
            line: format!("{}{}", self.prefix, command),
            bare: Some(command.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_accounts_are_not_prefixed() {
        let policy = ElevationPolicy::default();
        for account in ["root", "Administrator", "administrator"] {
            let cmd = policy.apply(account, "id");
            assert_eq!(cmd.line, "id");
            assert_eq!(cmd.bare, None);
        }
    }

    #[test]
    fn test_other_accounts_are_prefixed() {
        let cmd = ElevationPolicy::default().apply("deploy", "systemctl restart agent");
        assert_eq!(cmd.line, "sudo systemctl restart agent");
        assert_eq!(cmd.bare.as_deref(), Some("systemctl restart agent"));
    }

    #[test]
    fn test_already_prefixed_is_left_alone() {
        let cmd = ElevationPolicy::default().apply("deploy", "sudo id");
        assert_eq!(cmd.line, "sudo id");
        assert_eq!(cmd.bare, None);
    }

    #[test]
    fn test_custom_policy() {
        let policy = ElevationPolicy::default()
            .with_prefix("pfexec ")
            .with_admin_accounts(["ops"]);
        assert!(policy.is_admin("ops"));
        assert!(!policy.is_admin("root"));
        assert_eq!(policy.apply("root", "id").line, "pfexec id");
    }
}
