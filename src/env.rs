//! Environment constants and path utilities for the image generator.
//!
//! This module centralizes the fixed paths, names and default durations used
//! throughout the application, making them easier to maintain and modify.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the identity directory
pub const CERT_DIR_ENV: &str = "IMAGE_GENERATOR_CERT_DIR";

/// Client identity constants
pub mod identity {
    /// Default directory holding the client certificate and key
    pub const DEFAULT_CERT_DIR: &str = "/etc/image-generator/lxd";

    /// File stem shared by the certificate and the key
    pub const KEY_NAME: &str = "image-generator";

    /// Common name written into the self-signed certificate
    pub const COMMON_NAME: &str = "image-generator-lxd";

    /// Certificate validity in days
    pub const VALIDITY_DAYS: u64 = 364;

    /// How far `not_before` is moved into the past to absorb clock skew
    pub const CLOCK_SKEW_SECS: u64 = 600;

    /// RSA modulus size
    pub const KEY_BITS: usize = 2048;
}

/// Remote side constants
pub mod remote {
    /// Connection timeout towards the management endpoint, in seconds
    pub const CONNECT_TIMEOUT_SECS: u64 = 5;

    /// Where the base64 payload is uploaded inside the container
    pub const TMP_PAYLOAD_PATH: &str = "/root/tarball-base64-encoded";

    /// Description attached to the alias of a produced image
    pub const ALIAS_DESCRIPTION: &str = "Published by image-generator";

    /// Seconds the remote side gets to stop a container gracefully
    pub const STOP_TIMEOUT_SECS: u64 = 30;
}

/// Default pipeline timings
pub mod timing {
    use super::Duration;

    /// Minimum wait after starting the container
    pub const START_SETTLE: Duration = Duration::from_secs(4);

    /// Minimum wait between publishing and aliasing the image
    pub const PUBLISH_SETTLE: Duration = Duration::from_secs(2);

    /// Sleep inside the injected shell command before decoding
    pub const SHELL_SETTLE: Duration = Duration::from_secs(4);

    /// Interval of the injected shell loop waiting for the payload
    pub const SHELL_POLL: Duration = Duration::from_secs(2);

    /// Interval between readiness checks
    pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

    /// Upper bound for any readiness wait
    pub const READINESS_TIMEOUT: Duration = Duration::from_secs(120);
}

/// Required suffix of the exported image file
pub const EXPORT_SUFFIX: &str = "tar.gz";

/// Build the certificate path inside an identity directory
pub fn cert_file_path(cert_dir: &Path) -> PathBuf {
    cert_dir.join(format!("{}.crt", identity::KEY_NAME))
}

/// Build the private key path inside an identity directory
pub fn key_file_path(cert_dir: &Path) -> PathBuf {
    cert_dir.join(format!("{}.key", identity::KEY_NAME))
}

/// Resolve the identity directory, honouring [`CERT_DIR_ENV`]
pub fn cert_dir() -> PathBuf {
    std::env::var_os(CERT_DIR_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(identity::DEFAULT_CERT_DIR))
}

/// Normalize an export destination so it always ends in `.tar.gz`.
///
/// Mirrors the historical check on the bare `tar.gz` ending, so
/// `image.tar.gz` and `imagetar.gz` are both left untouched.
pub fn export_file_path(destination: &str) -> PathBuf {
    if destination.ends_with(EXPORT_SUFFIX) {
        PathBuf::from(destination)
    } else {
        PathBuf::from(format!("{}.{}", destination, EXPORT_SUFFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_identity_paths() {
        let dir = Path::new("/etc/image-generator/lxd");

        assert_eq!(
            cert_file_path(dir),
            Path::new("/etc/image-generator/lxd/image-generator.crt")
        );
        assert_eq!(
            key_file_path(dir),
            Path::new("/etc/image-generator/lxd/image-generator.key")
        );
    }

    #[test]
    fn test_export_file_path() {
        assert_eq!(export_file_path("out"), Path::new("out.tar.gz"));
        assert_eq!(export_file_path("out.tar.gz"), Path::new("out.tar.gz"));
        assert_eq!(
            export_file_path("/srv/images/builder"),
            Path::new("/srv/images/builder.tar.gz")
        );
        assert_eq!(export_file_path("out.tar"), Path::new("out.tar.tar.gz"));
    }

    #[test]
    #[serial]
    fn test_cert_dir_override() {
        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::set_var(CERT_DIR_ENV, "/tmp/custom-identity") };
        assert_eq!(cert_dir(), Path::new("/tmp/custom-identity"));

        unsafe { std::env::remove_var(CERT_DIR_ENV) };
        assert_eq!(cert_dir(), Path::new(identity::DEFAULT_CERT_DIR));
    }
}
