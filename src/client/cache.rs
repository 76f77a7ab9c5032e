use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Per-region API handles, built on first use and shared afterwards.
///
/// Lookup, construction and insertion happen under one lock, so the map is
/// never mutated concurrently. Builders must not do network I/O; the returned
/// handle is used after the lock is released.
pub struct RegionalClientCache<H> {
    clients: Mutex<HashMap<String, Arc<H>>>,
}

impl<H> Default for RegionalClientCache<H> {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl<H> RegionalClientCache<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `region`, building and storing it on a miss.
    /// A failed build leaves the cache untouched.
    pub fn get_or_try_insert_with<E, F>(&self, region: &str, build: F) -> Result<Arc<H>, E>
    where
        F: FnOnce(&str) -> Result<H, E>,
    {
        // Handles are stateless, a poisoned map is still consistent.
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(client) = clients.get(region) {
            return Ok(Arc::clone(client));
        }

        debug!("Constructing registry API handle for region {}", region);
        let client = Arc::new(build(region)?);
        clients.insert(region.to_owned(), Arc::clone(&client));
        Ok(client)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
