use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::domain::entity::account::EncryptedCredentials;
use crate::domain::entity::credentials::CredentialBundle;
use crate::domain::error::IntegrationError;

const NONCE_LEN: usize = 12;

/// MasterKey は認証情報の暗号化/復号化に使用するマスター鍵を保持する。
/// AES-256-GCM を使用し、各暗号化操作で一意の 12 バイト nonce を生成する。
pub struct MasterKey {
    key: Key<Aes256Gcm>,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

impl MasterKey {
    /// hex エンコードされた 32 バイト鍵から生成する。
    pub fn from_hex(key_hex: &str) -> anyhow::Result<Self> {
        let key_bytes = hex::decode(key_hex.trim())?;
        if key_bytes.len() != 32 {
            return Err(anyhow::anyhow!(
                "master key must be 32 bytes (64 hex chars), got {} bytes",
                key_bytes.len()
            ));
        }
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self { key: *key })
    }

    /// 指定した環境変数から鍵を読み込む。未設定の場合はゼロ鍵（開発用デフォルト）を使用し、
    /// その旨を 2 番目の戻り値で返す。
    pub fn from_env(var_name: &str) -> anyhow::Result<(Self, bool)> {
        match std::env::var(var_name) {
            Ok(key_hex) => Ok((Self::from_hex(&key_hex)?, false)),
            Err(_) => Ok((Self::from_hex(&"0".repeat(64))?, true)),
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<(Vec<u8>, Vec<u8>)> {
        let cipher = Aes256Gcm::new(&self.key);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("encryption failed: {}", e))?;
        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> anyhow::Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            anyhow::bail!("nonce must be {} bytes, got {}", NONCE_LEN, nonce.len());
        }
        let cipher = Aes256Gcm::new(&self.key);
        let nonce = Nonce::from_slice(nonce);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decryption failed: {}", e))
    }
}

/// CredentialVault は認証情報バンドルを JSON 化して暗号化し、保存用の形式に変換する。
/// 鍵は初期化後は読み取り専用で、プロセス全体で共有される。
#[derive(Debug)]
pub struct CredentialVault {
    key: MasterKey,
}

impl CredentialVault {
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }

    pub fn seal(&self, bundle: &CredentialBundle) -> Result<EncryptedCredentials, IntegrationError> {
        let plaintext = serde_json::to_vec(bundle)
            .map_err(|e| IntegrationError::Internal(format!("credential serialization failed: {e}")))?;
        let (ciphertext, nonce) = self
            .key
            .encrypt(&plaintext)
            .map_err(|e| IntegrationError::Internal(e.to_string()))?;
        Ok(EncryptedCredentials {
            ciphertext: STANDARD.encode(ciphertext),
            nonce: STANDARD.encode(nonce),
        })
    }

    /// open は暗号化済み認証情報を復号する。鍵の不一致や改ざんは CredentialError になる。
    pub fn open(&self, sealed: &EncryptedCredentials) -> Result<CredentialBundle, IntegrationError> {
        let ciphertext = STANDARD
            .decode(&sealed.ciphertext)
            .map_err(|e| IntegrationError::Credential(format!("malformed ciphertext: {e}")))?;
        let nonce = STANDARD
            .decode(&sealed.nonce)
            .map_err(|e| IntegrationError::Credential(format!("malformed nonce: {e}")))?;
        let plaintext = self
            .key
            .decrypt(&ciphertext, &nonce)
            .map_err(|e| IntegrationError::Credential(e.to_string()))?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| IntegrationError::Credential(format!("stored credentials are unreadable: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::credentials::{
        HubSpotCredentials, LinkedInCredentials, ProxySettings, SalesforceCredentials,
    };

    fn vault() -> CredentialVault {
        CredentialVault::new(MasterKey::from_hex(&"ab".repeat(32)).unwrap())
    }

    fn bundles() -> Vec<CredentialBundle> {
        vec![
            CredentialBundle::Linkedin(LinkedInCredentials {
                username: "scout@example.com".into(),
                password: "p@ss".into(),
                cookies: Some("JSESSIONID=1".into()),
                session_token: Some("li_at".into()),
                csrf_token: Some("ajax:1".into()),
                user_agent: Some("Mozilla/5.0".into()),
                proxy: Some(ProxySettings {
                    host: "10.0.0.1".into(),
                    port: 3128,
                    username: Some("proxy".into()),
                    password: Some("secret".into()),
                }),
            }),
            CredentialBundle::Salesforce(SalesforceCredentials {
                username: "ops@example.com".into(),
                security_token: "tok".into(),
                client_id: Some("cid".into()),
                client_secret: Some("cs".into()),
                instance_url: Some("https://example.my.salesforce.com".into()),
                access_token: None,
                refresh_token: None,
            }),
            CredentialBundle::Hubspot(HubSpotCredentials {
                api_key: "pat-na1-123".into(),
                portal_id: Some("4242".into()),
                access_token: None,
                refresh_token: Some("rt".into()),
            }),
        ]
    }

    #[test]
    fn test_seal_open_round_trip_for_every_provider() {
        let vault = vault();
        for bundle in bundles() {
            let sealed = vault.seal(&bundle).unwrap();
            assert!(!sealed.ciphertext.contains("p@ss"));
            assert_eq!(vault.open(&sealed).unwrap(), bundle);
        }
    }

    #[test]
    fn test_each_seal_uses_fresh_nonce() {
        let vault = vault();
        let bundle = bundles().remove(2);
        let a = vault.seal(&bundle).unwrap();
        let b = vault.seal(&bundle).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_open_with_other_key_is_credential_error() {
        let sealed = vault().seal(&bundles().remove(0)).unwrap();
        let other = CredentialVault::new(MasterKey::from_hex(&"cd".repeat(32)).unwrap());
        assert!(matches!(
            other.open(&sealed),
            Err(IntegrationError::Credential(_))
        ));
    }

    #[test]
    fn test_open_with_truncated_nonce_is_credential_error() {
        let vault = vault();
        let mut sealed = vault.seal(&bundles().remove(1)).unwrap();
        sealed.nonce = STANDARD.encode([0u8; 4]);
        assert!(matches!(
            vault.open(&sealed),
            Err(IntegrationError::Credential(_))
        ));
    }

    #[test]
    fn test_master_key_rejects_wrong_length() {
        let err = MasterKey::from_hex("aabb").unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
        assert!(MasterKey::from_hex("not-valid-hex").is_err());
    }

    #[test]
    fn test_master_key_from_unset_env_uses_dev_default() {
        let (_, used_default) =
            MasterKey::from_env("WORKLOOM_TEST_UNSET_MASTER_KEY_VAR").unwrap();
        assert!(used_default);
    }

    #[test]
    fn test_master_key_debug_is_redacted() {
        let key = MasterKey::from_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(format!("{key:?}"), "MasterKey([REDACTED])");
    }
}
