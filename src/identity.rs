//! Client TLS identity used to authenticate against the remote host.
//!
//! The identity is a long-lived self-signed certificate and its private key,
//! persisted as PEM files. They are generated on first use and reused on
//! every later run; an existing identity is never overwritten.

use crate::env;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SerialNumber};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Identity errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Filesystem failure around the identity files
    #[error("Identity I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key generation or certificate signing failed
    #[error("Failed to generate client identity: {0}")]
    Generation(String),

    /// Only one of the two files exists
    #[error(
        "Incomplete identity: {present} exists but {missing} does not; remove it to regenerate both"
    )]
    Incomplete { present: PathBuf, missing: PathBuf },
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Where and how the identity is created.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Directory holding both files
    pub cert_dir: PathBuf,
    /// Subject common name
    pub common_name: String,
    /// Validity window length in days
    pub validity_days: u64,
    /// Backdating of `not_before`
    pub clock_skew: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self::in_dir(env::cert_dir())
    }
}

impl IdentityConfig {
    /// Default settings rooted at a specific directory.
    pub fn in_dir(cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            common_name: env::identity::COMMON_NAME.to_string(),
            validity_days: env::identity::VALIDITY_DAYS,
            clock_skew: Duration::from_secs(env::identity::CLOCK_SKEW_SECS),
        }
    }
}

/// Paths of a persisted identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl IdentityPaths {
    /// Concatenated certificate and key PEM, as TLS client libraries expect it.
    ///
    /// # Errors
    ///
    /// Returns error if either file cannot be read.
    pub fn read_pem_bundle(&self) -> Result<Vec<u8>> {
        let mut bundle = read(&self.cert_path)?;
        if !bundle.ends_with(b"\n") {
            bundle.push(b'\n');
        }
        bundle.extend(read(&self.key_path)?);
        Ok(bundle)
    }
}

/// Make sure a certificate and key exist, generating them when absent.
///
/// Safe to call repeatedly: when both files are present nothing is written.
///
/// # Errors
///
/// Returns error if the directory cannot be created, generation fails, or
/// only half of an identity is on disk.
pub fn ensure_identity(config: &IdentityConfig) -> Result<IdentityPaths> {
    let paths = IdentityPaths {
        cert_path: env::cert_file_path(&config.cert_dir),
        key_path: env::key_file_path(&config.cert_dir),
    };

    match (paths.cert_path.exists(), paths.key_path.exists()) {
        (true, true) => {
            debug!("Reusing client identity at {}", config.cert_dir.display());
            return Ok(paths);
        }
        (true, false) => {
            return Err(IdentityError::Incomplete {
                present: paths.cert_path,
                missing: paths.key_path,
            });
        }
        (false, true) => {
            return Err(IdentityError::Incomplete {
                present: paths.key_path,
                missing: paths.cert_path,
            });
        }
        (false, false) => {}
    }

    fs::create_dir_all(&config.cert_dir).map_err(|source| IdentityError::Io {
        path: config.cert_dir.clone(),
        source,
    })?;

    info!(
        "Generating client identity '{}' in {}",
        config.common_name,
        config.cert_dir.display()
    );
    let (cert_pem, key_pem) = generate_identity(config)?;

    write_new(&paths.key_path, key_pem.as_bytes(), true)?;
    write_new(&paths.cert_path, cert_pem.as_bytes(), false)?;

    Ok(paths)
}

/// Generate a self-signed certificate and RSA key, returned as PEM.
fn generate_identity(config: &IdentityConfig) -> Result<(String, String)> {
    let mut rng = rsa::rand_core::OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, env::identity::KEY_BITS)
        .map_err(|e| IdentityError::Generation(format!("RSA key generation failed: {}", e)))?;
    let key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| IdentityError::Generation(format!("Failed to encode key: {}", e)))?;

    let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| IdentityError::Generation(format!("Failed to load key pair: {}", e)))?;

    let mut params = CertificateParams::new(Vec::<String>::new())
        .map_err(|e| IdentityError::Generation(format!("Invalid certificate params: {}", e)))?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, config.common_name.as_str());

    // Positive serial: clear the sign bit of the leading byte
    let mut serial: [u8; 16] = rand::random();
    serial[0] &= 0x7f;
    params.serial_number = Some(SerialNumber::from_slice(&serial));

    let now = SystemTime::now();
    params.not_before = (now - config.clock_skew).into();
    params.not_after = (now + Duration::from_secs(config.validity_days * 24 * 60 * 60)).into();

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| IdentityError::Generation(format!("Failed to sign certificate: {}", e)))?;

    Ok((cert.pem(), key_pem.as_str().to_owned()))
}

/// Write a file that must not exist yet.
fn write_new(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    let io_err = |source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(path).map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    })
}
