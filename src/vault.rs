use std::time::Duration;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CrawlError;
use crate::session::BrowserSession;

const NONCE_LEN: usize = 12;

const AUTH_LANDING_URL: &str = "https://new.smartplace.naver.com/";
// The page shell must render before the login check is meaningful.
const LANDING_SHELL_SELECTOR: &str = "#app, #root, main";
// Presence of any of these means the session is not logged in.
const LOGIN_PROMPT_SELECTOR: &str = "a[href*='nidlogin'], form#frmNIDLogin, .login_wrap";

/// One captured authentication cookie, serialized inside the encrypted blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub expires: Option<f64>,
}

/// Opaque ciphertext wrapping a serialized cookie set. Safe to persist and
/// log; the plaintext only exists transiently inside vault calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedCredential {
    pub cipher_text: String,
}

/// Encrypts, decrypts and injects captured authentication material.
///
/// AES-256-GCM keyed by the process-wide `CREDENTIAL_KEY`. Layout of the
/// ciphertext is base64(nonce || sealed bytes) with a fresh nonce per call.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    pub fn new(key: &[u8; 32]) -> Self {
        CredentialVault {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn encrypt(&self, cookies: &[StoredCookie]) -> Result<EncryptedCredential, CrawlError> {
        let plain = serde_json::to_vec(cookies)
            .map_err(|e| CrawlError::Credential(format!("cookie serialization failed: {e}")))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plain.as_slice())
            .map_err(|_| CrawlError::Credential("encryption failed".to_string()))?;

        let mut buf = nonce.to_vec();
        buf.extend_from_slice(&sealed);
        Ok(EncryptedCredential {
            cipher_text: STANDARD.encode(buf),
        })
    }

    /// Fails closed: tampered or truncated ciphertext is an error, never
    /// corrupted cookie data.
    pub fn decrypt(&self, cred: &EncryptedCredential) -> Result<Vec<StoredCookie>, CrawlError> {
        let raw = STANDARD
            .decode(&cred.cipher_text)
            .map_err(|e| CrawlError::Credential(format!("ciphertext is not valid base64: {e}")))?;
        if raw.len() <= NONCE_LEN {
            return Err(CrawlError::Credential("ciphertext too short".to_string()));
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CrawlError::Credential("authentication failed".to_string()))?;

        serde_json::from_slice(&plain)
            .map_err(|e| CrawlError::Credential(format!("cookie deserialization failed: {e}")))
    }

    /// Load the credential into a session and verify the logged-in state.
    ///
    /// Verification is fail-closed: success requires the landing page shell
    /// to render *and* no login prompt to be present. An ambiguous DOM (shell
    /// never appears, snapshot fails) counts as a failed login, because
    /// acting on an unauthenticated session is the expensive mistake.
    pub fn inject(
        &self,
        session: &BrowserSession,
        cred: &EncryptedCredential,
    ) -> Result<bool, CrawlError> {
        let cookies = self.decrypt(cred)?;
        info!(count = cookies.len(), "injecting credential cookie set");
        session.install_cookies(&cookies);

        session.navigate(AUTH_LANDING_URL)?;
        if !session.wait_for(LANDING_SHELL_SELECTOR, Duration::from_secs(10)) {
            warn!("auth landing shell never rendered, treating as login failure");
            return Ok(false);
        }
        session.settle(Duration::from_millis(800));

        let html = match session.content() {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "could not snapshot auth landing page");
                return Ok(false);
            }
        };

        Ok(!has_login_prompt(&html))
    }
}

fn has_login_prompt(html: &str) -> bool {
    let document = Html::parse_document(html);
    match Selector::parse(LOGIN_PROMPT_SELECTOR) {
        Ok(selector) => document.select(&selector).next().is_some(),
        // Unparseable selector would be a programming error; fail closed.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cookies() -> Vec<StoredCookie> {
        vec![
            StoredCookie {
                name: "NID_AUT".to_string(),
                value: "abc123".to_string(),
                domain: ".naver.com".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: true,
                expires: None,
            },
            StoredCookie {
                name: "NID_SES".to_string(),
                value: "xyz789".to_string(),
                domain: ".naver.com".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: false,
                expires: Some(1_900_000_000.0),
            },
        ]
    }

    #[test]
    fn round_trip_preserves_cookie_set() {
        let vault = CredentialVault::new(&[42u8; 32]);
        let cookies = sample_cookies();
        let cred = vault.encrypt(&cookies).unwrap();
        assert_eq!(vault.decrypt(&cred).unwrap(), cookies);
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let vault = CredentialVault::new(&[42u8; 32]);
        let cookies = sample_cookies();
        let a = vault.encrypt(&cookies).unwrap();
        let b = vault.encrypt(&cookies).unwrap();
        assert_ne!(a.cipher_text, b.cipher_text);
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let vault = CredentialVault::new(&[42u8; 32]);
        let cred = vault.encrypt(&sample_cookies()).unwrap();

        let mut raw = STANDARD.decode(&cred.cipher_text).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = EncryptedCredential {
            cipher_text: STANDARD.encode(raw),
        };

        assert!(vault.decrypt(&tampered).is_err());
    }

    #[test]
    fn wrong_key_fails_closed() {
        let vault = CredentialVault::new(&[42u8; 32]);
        let other = CredentialVault::new(&[43u8; 32]);
        let cred = vault.encrypt(&sample_cookies()).unwrap();
        assert!(other.decrypt(&cred).is_err());
    }

    #[test]
    fn truncated_ciphertext_fails_closed() {
        let vault = CredentialVault::new(&[42u8; 32]);
        let cred = EncryptedCredential {
            cipher_text: STANDARD.encode([0u8; 8]),
        };
        assert!(vault.decrypt(&cred).is_err());
    }

    #[test]
    fn login_prompt_detection() {
        let logged_out = r#"<html><body><div id="app">
            <a href="https://nid.naver.com/nidlogin.login">로그인</a>
        </div></body></html>"#;
        assert!(has_login_prompt(logged_out));

        let logged_in = r#"<html><body><div id="app">
            <nav>내 업체</nav><main>대시보드</main>
        </div></body></html>"#;
        assert!(!has_login_prompt(logged_in));
    }
}
