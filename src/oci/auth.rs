//! OCI Authentication
//!
//! Resolves API key credentials from the connection config, environment
//! variables or the OCI CLI config file (`~/.oci/config`), and signs requests
//! with the OCI HTTP signature scheme (version 1, `rsa-sha256`).

use super::regions::is_valid_ocid;
use crate::config::{AuthType, ConnectionConfig};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Profile used when none is configured
pub const DEFAULT_PROFILE: &str = "DEFAULT";

/// Headers covered by the signature for GET requests, in signing order
const SIGNED_HEADERS: &str = "date (request-target) host";

/// The parts of a request that go into the signing string
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    pub method: &'a str,
    /// Path plus query string, e.g. `/20160918/users?compartmentId=...`
    pub path_and_query: &'a str,
    pub host: &'a str,
    /// RFC 7231 date, also sent as the `date` header
    pub date: &'a str,
}

/// Produces the `authorization` header for a request
pub trait RequestSigner: Send + Sync {
    fn key_id(&self) -> String;

    fn authorization(&self, request: &SigningRequest<'_>) -> Result<String>;
}

/// API key / security token signer
pub struct ApiKeySigner {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl ApiKeySigner {
    /// Signer for `tenancy/user/fingerprint` API key auth
    pub fn api_key(
        tenancy: &str,
        user: &str,
        fingerprint: &str,
        private_key_pem: &str,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            key_id: format!("{}/{}/{}", tenancy, user, fingerprint),
            signing_key: SigningKey::<Sha256>::new(parse_private_key(private_key_pem, passphrase)?),
        })
    }

    /// Signer for session (security token) auth
    pub fn security_token(token: &str, private_key_pem: &str, passphrase: Option<&str>) -> Result<Self> {
        Ok(Self {
            key_id: format!("ST${}", token.trim()),
            signing_key: SigningKey::<Sha256>::new(parse_private_key(private_key_pem, passphrase)?),
        })
    }
}

impl RequestSigner for ApiKeySigner {
    fn key_id(&self) -> String {
        self.key_id.clone()
    }

    fn authorization(&self, request: &SigningRequest<'_>) -> Result<String> {
        let signature = self.signing_key.sign(signing_string(request).as_bytes());
        Ok(format!(
            "Signature version=\"1\",headers=\"{}\",keyId=\"{}\",algorithm=\"rsa-sha256\",signature=\"{}\"",
            SIGNED_HEADERS,
            self.key_id,
            BASE64.encode(signature.to_bytes())
        ))
    }
}

/// Build the string that gets signed, one `name: value` line per header
pub fn signing_string(request: &SigningRequest<'_>) -> String {
    format!(
        "date: {}\n(request-target): {} {}\nhost: {}",
        request.date,
        request.method.to_ascii_lowercase(),
        request.path_and_query,
        request.host
    )
}

/// Parse a PEM RSA key: PKCS#8, encrypted PKCS#8 or PKCS#1
fn parse_private_key(pem: &str, passphrase: Option<&str>) -> Result<RsaPrivateKey> {
    let pem = pem.trim();
    if pem.contains("ENCRYPTED PRIVATE KEY") {
        let Some(passphrase) = passphrase else {
            bail!("Private key is encrypted but no private_key_password is configured");
        };
        return RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())
            .context("Failed to decrypt private key");
    }
    if pem.contains("BEGIN RSA PRIVATE KEY") {
        return RsaPrivateKey::from_pkcs1_pem(pem).context("Failed to parse PKCS#1 private key");
    }
    RsaPrivateKey::from_pkcs8_pem(pem).context("Failed to parse PKCS#8 private key")
}

/// One profile from the OCI CLI config file
#[derive(Debug, Clone, Default)]
pub struct ConfigFileProfile {
    pub user: Option<String>,
    pub fingerprint: Option<String>,
    pub tenancy: Option<String>,
    pub region: Option<String>,
    pub key_file: Option<String>,
    pub pass_phrase: Option<String>,
    pub security_token_file: Option<String>,
}

impl ConfigFileProfile {
    /// Parse `profile` out of INI-style config content. Keys from the
    /// `DEFAULT` section are inherited by every other profile.
    pub fn parse(content: &str, profile: &str) -> Option<Self> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;

        for line in content.lines() {
            let line = line.trim();
            // Security: Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
            } else if let (Some(section), Some((key, value))) = (&current, line.split_once('=')) {
                sections
                    .entry(section.clone())
                    .or_default()
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let mut merged = sections.get(DEFAULT_PROFILE).cloned().unwrap_or_default();
        match sections.get(profile) {
            Some(values) => merged.extend(values.clone()),
            None if profile == DEFAULT_PROFILE && !merged.is_empty() => {},
            None => return None,
        }

        let mut take = |key: &str| merged.remove(key).filter(|v| !v.is_empty());
        Some(Self {
            user: take("user"),
            fingerprint: take("fingerprint"),
            tenancy: take("tenancy"),
            region: take("region"),
            key_file: take("key_file"),
            pass_phrase: take("pass_phrase"),
            security_token_file: take("security_token_file"),
        })
    }

    /// Load a profile from disk
    pub fn load(path: &Path, profile: &str) -> Result<Option<Self>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read OCI config file {}", path.display()))?;
        Ok(Self::parse(&content, profile))
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// OCI CLI config file location (`OCI_CLI_CONFIG_FILE` or `~/.oci/config`)
pub fn config_file_path(configured: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(expand_home(path));
    }
    if let Ok(path) = std::env::var("OCI_CLI_CONFIG_FILE") {
        return Some(expand_home(&path));
    }
    dirs::home_dir().map(|home| home.join(".oci").join("config"))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Resolved credentials
#[derive(Clone)]
pub struct Credentials {
    pub auth: AuthType,
    pub tenancy_ocid: String,
    pub user_ocid: Option<String>,
    pub fingerprint: Option<String>,
    pub private_key_pem: String,
    pub private_key_password: Option<String>,
    pub security_token: Option<String>,
    /// Region from the environment or profile
    pub region: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Security: never print key material or tokens
        f.debug_struct("Credentials")
            .field("auth", &self.auth)
            .field("tenancy_ocid", &self.tenancy_ocid)
            .field("user_ocid", &self.user_ocid)
            .field("fingerprint", &self.fingerprint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Resolve credentials: connection config > environment > config file
    pub fn resolve(config: &ConnectionConfig) -> Result<Self> {
        let profile_name = config
            .config_file_profile
            .clone()
            .or_else(|| env_var("OCI_CLI_PROFILE"))
            .unwrap_or_else(|| DEFAULT_PROFILE.to_string());

        let profile = match config_file_path(config.config_path.as_deref()) {
            Some(path) if path.exists() => match ConfigFileProfile::load(&path, &profile_name)? {
                Some(profile) => profile,
                None if profile_name == DEFAULT_PROFILE => ConfigFileProfile::default(),
                None => bail!("Profile '{}' not found in {}", profile_name, path.display()),
            },
            _ => {
                tracing::debug!("No OCI config file found, using connection config and environment");
                ConfigFileProfile::default()
            },
        };

        let tenancy_ocid = config
            .tenancy_ocid
            .clone()
            .or_else(|| env_var("OCI_TENANCY_OCID"))
            .or(profile.tenancy.clone())
            .context("tenancy_ocid is not configured")?;
        if !is_valid_ocid(&tenancy_ocid) {
            bail!("Invalid tenancy OCID: {}", tenancy_ocid);
        }

        let user_ocid = config
            .user_ocid
            .clone()
            .or_else(|| env_var("OCI_USER_OCID"))
            .or(profile.user.clone());
        let fingerprint = config
            .fingerprint
            .clone()
            .or_else(|| env_var("OCI_FINGERPRINT"))
            .or(profile.fingerprint.clone());

        let private_key_pem = match &config.private_key {
            Some(pem) => pem.clone(),
            None => {
                let path = config
                    .private_key_path
                    .clone()
                    .or_else(|| env_var("OCI_PRIVATE_KEY_PATH"))
                    .or(profile.key_file.clone())
                    .context("private_key or private_key_path is not configured")?;
                let path = expand_home(&path);
                std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read private key {}", path.display()))?
            },
        };

        let security_token = match (&config.auth, &profile.security_token_file) {
            (AuthType::SecurityToken, Some(file)) => {
                let path = expand_home(file);
                Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read security token {}", path.display()))?,
                )
            },
            (AuthType::SecurityToken, None) => {
                bail!("security_token auth requires security_token_file in the config profile")
            },
            _ => None,
        };

        if config.auth == AuthType::ApiKey {
            if user_ocid.is_none() {
                bail!("user_ocid is not configured");
            }
            if fingerprint.is_none() {
                bail!("fingerprint is not configured");
            }
        }

        Ok(Self {
            auth: config.auth,
            tenancy_ocid,
            user_ocid,
            fingerprint,
            private_key_pem,
            private_key_password: config.private_key_password.clone().or(profile.pass_phrase),
            security_token,
            region: env_var("OCI_REGION").or(profile.region),
        })
    }

    /// Build the request signer for these credentials
    pub fn signer(&self) -> Result<Arc<dyn RequestSigner>> {
        let passphrase = self.private_key_password.as_deref();
        let signer = match self.auth {
            AuthType::SecurityToken => {
                let token = self
                    .security_token
                    .as_deref()
                    .context("security token is not loaded")?;
                ApiKeySigner::security_token(token, &self.private_key_pem, passphrase)?
            },
            AuthType::ApiKey => ApiKeySigner::api_key(
                &self.tenancy_ocid,
                self.user_ocid.as_deref().context("user_ocid is not configured")?,
                self.fingerprint.as_deref().context("fingerprint is not configured")?,
                &self.private_key_pem,
                passphrase,
            )?,
        };
        Ok(Arc::new(signer))
    }
}
