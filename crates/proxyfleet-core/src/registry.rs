//! Ordered mapping from [`Endpoint`] to worker handle.

use crate::endpoint::Endpoint;
use crate::error::{FleetError, Result};
use std::collections::HashMap;

/// The authoritative registry of provisioned workers.
///
/// Entries are kept in ascending port order; insertion rejects a port that is
/// not strictly greater than the last one, which also makes keys unique.
/// After [`seal`](Self::seal) no entry can be added. After
/// [`drain`](Self::drain) the registry is terminated and stays empty.
#[derive(Debug)]
pub struct FleetRegistry<H> {
    entries: Vec<(Endpoint, H)>,
    index: HashMap<String, usize>,
    sealed: bool,
    terminated: bool,
}

impl<H> Default for FleetRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            sealed: false,
            terminated: false,
        }
    }
}

impl<H> FleetRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks whether `endpoint` could be inserted next.
    pub fn check_insert(&self, endpoint: &Endpoint) -> Result<()> {
        if self.terminated {
            return Err(FleetError::Terminated);
        }
        if self.sealed {
            return Err(FleetError::AlreadyProvisioned {
                count: self.entries.len(),
            });
        }
        if let Some((last, _)) = self.entries.last() {
            if endpoint.port() <= last.port() {
                return Err(FleetError::OutOfOrder {
                    endpoint: endpoint.clone(),
                    last_port: last.port(),
                });
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, endpoint: Endpoint, handle: H) -> Result<()> {
        self.check_insert(&endpoint)?;

        self.index
            .insert(endpoint.as_str().to_string(), self.entries.len());
        self.entries.push((endpoint, handle));
        Ok(())
    }

    pub fn get(&self, endpoint: &str) -> Option<(&Endpoint, &H)> {
        self.index.get(endpoint).map(|&i| {
            let (endpoint, handle) = &self.entries[i];
            (endpoint, handle)
        })
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.index.contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the key set once provisioning has completed.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Endpoint, &H)> {
        self.entries.iter().map(|(e, h)| (e, h))
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.entries.iter().map(|(e, _)| e)
    }

    /// Removes every entry, yielding them in ascending port order.
    ///
    /// The registry is empty and terminated afterwards; further inserts fail.
    pub fn drain(&mut self) -> Vec<(Endpoint, H)> {
        self.index.clear();
        self.terminated = true;
        std::mem::take(&mut self.entries)
    }
}
