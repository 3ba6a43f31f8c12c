use std::env;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::CrawlError;

/// Process configuration, read once at startup.
///
/// The credential key is mandatory: credentials encrypted under an ephemeral
/// key would become undecryptable after a restart, so a missing or malformed
/// `CREDENTIAL_KEY` aborts startup instead of silently generating one.
pub struct Config {
    pub database_url: String,
    pub credential_key: [u8; 32],
    pub proxy_servers: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, CrawlError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| CrawlError::Config("DATABASE_URL must be set".to_string()))?;

        let key_b64 = env::var("CREDENTIAL_KEY")
            .map_err(|_| CrawlError::Config("CREDENTIAL_KEY must be set".to_string()))?;
        let credential_key = parse_key(&key_b64)?;

        let proxy_servers = env::var("PROXY_SERVERS").ok().filter(|s| !s.trim().is_empty());

        Ok(Config {
            database_url,
            credential_key,
            proxy_servers,
        })
    }
}

/// Decode a base64 encoded 256-bit key.
pub fn parse_key(encoded: &str) -> Result<[u8; 32], CrawlError> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CrawlError::Config(format!("CREDENTIAL_KEY is not valid base64: {e}")))?;

    raw.as_slice()
        .try_into()
        .map_err(|_| {
            CrawlError::Config(format!(
                "CREDENTIAL_KEY must decode to 32 bytes, got {}",
                raw.len()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    #[test]
    fn parse_key_accepts_32_byte_key() {
        let encoded = STANDARD.encode([7u8; 32]);
        assert_eq!(parse_key(&encoded).unwrap(), [7u8; 32]);
    }

    #[test]
    fn parse_key_rejects_wrong_length() {
        let encoded = STANDARD.encode([7u8; 16]);
        assert!(parse_key(&encoded).is_err());
    }

    #[test]
    fn parse_key_rejects_garbage() {
        assert!(parse_key("not base64 at all!!!").is_err());
    }
}
