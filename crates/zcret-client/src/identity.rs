//! Account identity as reported by the identity provider.

/// Connection status of the user's account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Whether an account is connected
    pub connected: bool,
    /// Account identifier (wallet address); meaningful only when connected
    pub account_id: String,
}

impl Identity {
    /// A connected account.
    pub fn connected(account_id: impl Into<String>) -> Self {
        Self { connected: true, account_id: account_id.into() }
    }

    /// No account.
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Check the account id is usable on the wire.
    ///
    /// Returns the trimmed id.
    pub fn validated_account(&self) -> Result<&str, String> {
        let account = self.account_id.trim();
        if account.is_empty() {
            return Err("account id is empty".into());
        }
        if account.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(format!("account id {account:?} contains whitespace"));
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        assert_eq!(Identity::connected("  W1 ").validated_account(), Ok("W1"));
        assert!(Identity::connected("   ").validated_account().is_err());
        assert!(Identity::connected("W 1").validated_account().is_err());
        assert!(Identity::disconnected().validated_account().is_err());
    }
}
