//! TLS configuration and certificate loading.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

/// Load listener TLS material from PEM files. Missing files are
/// reported by path before the parse is attempted.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("certificate file not found: {}", cert_path.display()),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("private key file not found: {}", key_path.display()),
        ));
    }

    tracing::info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "Loading listener TLS material"
    );
    RustlsConfig::from_pem_file(cert_path, key_path).await
}
