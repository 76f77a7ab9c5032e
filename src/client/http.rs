use crate::config::Tls;
use anyhow::{Context, Result};
use reqwest::{Certificate, Client};
use std::fs;
use std::time::Duration;
use tracing::info;

/// Upper bound for establishing a connection to a registry API.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound between two reads of a registry API response.
pub const READ_TIMEOUT: Duration = Duration::from_secs(120);
/// Per-request ceiling, applied even when the client was built elsewhere.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Shared HTTP client for registry API calls. System roots come from
/// rustls-tls-native-roots, extra CAs from the `tls` config section.
pub fn create_http_client(tls: &Tls) -> Result<Client> {
    info!("Initializing registry API HTTP client");
    let mut client_builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .user_agent(concat!("kube-version-checker/", env!("CARGO_PKG_VERSION")));

    for file_path in &tls.ca_certificate_paths {
        let file_content = fs::read(file_path)
            .with_context(|| format!("Failed to read CA certificate {}", file_path.display()))?;
        let cert = Certificate::from_pem(&file_content).with_context(|| {
            format!("Failed to parse CA certificate {}", file_path.display())
        })?;
        info!("Trusting additional CA certificate {}", file_path.display());
        client_builder = client_builder.add_root_certificate(cert);
    }

    client_builder.build().context("Failed to build HTTP client")
}
