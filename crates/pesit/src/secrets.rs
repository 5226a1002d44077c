//! Secrets oracle (§6, §9): an opaque encrypt/decrypt seam so the core never
//! handles key material directly. A shared salt must yield deterministic
//! decryption across cluster instances; that guarantee is the
//! implementation's responsibility, not the core's.

use async_trait::async_trait;

#[async_trait]
pub trait SecretsOracle: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<String, String>;
    async fn decrypt(&self, token: &str) -> Result<String, String>;
}

/// Non-production reference implementation: the "ciphertext" is the
/// plaintext, clearly marked so nobody mistakes it for real protection.
#[derive(Debug, Clone, Default)]
pub struct PlaintextSecretsOracle;

#[async_trait]
impl SecretsOracle for PlaintextSecretsOracle {
    async fn encrypt(&self, plaintext: &str) -> Result<String, String> {
        Ok(format!("plaintext:{plaintext}"))
    }

    async fn decrypt(&self, token: &str) -> Result<String, String> {
        token.strip_prefix("plaintext:").map(str::to_string).ok_or_else(|| "not a plaintext token".to_string())
    }
}
