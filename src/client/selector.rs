use super::RegistryClient;
use std::sync::Arc;
use tracing::debug;

/// The registry clients known to the process, tried in registration order.
#[derive(Clone, Default)]
pub struct Registries {
    clients: Vec<Arc<dyn RegistryClient>>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn RegistryClient>) {
        debug!("Registered registry client {}", client.name());
        self.clients.push(client);
    }

    /// First client whose host grammar matches `host`.
    pub fn for_host(&self, host: &str) -> Option<&Arc<dyn RegistryClient>> {
        let client = self.clients.iter().find(|client| client.is_host(host));
        if let Some(client) = client {
            debug!("Selected registry client {} for host {}", client.name(), host);
        }
        client
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.clients.iter().map(|client| client.name()).collect()
    }
}
