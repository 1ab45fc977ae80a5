// SecretMasker: replaces registered secret values (API keys, SSH passphrases)
// in log lines before they are emitted.

use parking_lot::RwLock;
use std::sync::Arc;

const MASK: &str = "***";

/// Secrets shorter than this are not registered; masking them would mangle
/// unrelated log text.
const MIN_SECRET_LENGTH: usize = 4;

/// A cheaply cloneable, thread-safe set of secret values.
#[derive(Debug, Clone, Default)]
pub struct SecretMasker {
    /// Kept sorted longest first so a secret containing another is masked whole.
    secrets: Arc<RwLock<Vec<String>>>,
}

impl SecretMasker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret. Blank, too short or duplicate values are ignored.
    pub fn add_value(&self, secret: &str) {
        let secret = secret.trim();
        if secret.len() < MIN_SECRET_LENGTH {
            return;
        }

        let mut secrets = self.secrets.write();
        if secrets.iter().any(|s| s == secret) {
            return;
        }
        secrets.push(secret.to_string());
        secrets.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    /// Replace every registered secret in `input` with `***`.
    pub fn mask_secrets(&self, input: &str) -> String {
        let secrets = self.secrets.read();
        secrets
            .iter()
            .fold(input.to_string(), |masked, secret| {
                if masked.contains(secret.as_str()) {
                    masked.replace(secret.as_str(), MASK)
                } else {
                    masked
                }
            })
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_api_key_in_url() {
        let masker = SecretMasker::new();
        masker.add_value("c9f1-44aa-key");
        assert_eq!(
            masker.mask_secrets("POST https://api.example.com?apiKey=c9f1-44aa-key failed"),
            "POST https://api.example.com?apiKey=*** failed"
        );
    }

    #[test]
    fn longer_secret_wins_over_contained_secret() {
        let masker = SecretMasker::new();
        masker.add_value("pass");
        masker.add_value("passphrase-42");
        assert_eq!(masker.mask_secrets("using passphrase-42"), "using ***");
    }

    #[test]
    fn short_blank_and_duplicate_values_are_ignored() {
        let masker = SecretMasker::new();
        masker.add_value("");
        masker.add_value("  ");
        masker.add_value("abc");
        masker.add_value("secret-value");
        masker.add_value(" secret-value ");
        assert_eq!(masker.secret_count(), 1);
    }

    #[test]
    fn clones_share_registered_secrets() {
        let masker = SecretMasker::new();
        let clone = masker.clone();
        masker.add_value("shared-secret");
        assert_eq!(clone.mask_secrets("shared-secret"), "***");
    }
}
