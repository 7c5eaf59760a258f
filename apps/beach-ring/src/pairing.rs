use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{busy:?} is already in a call")]
pub struct PairingError {
    /// The first of the two identities found busy.
    pub busy: String,
}

/// Symmetric identity -> partner map.
///
/// Entries are always written and removed in mirrored pairs, so
/// `partner_of(a) == Some(b)` implies `partner_of(b) == Some(a)`.
#[derive(Debug, Default)]
pub struct PairingTable {
    partners: HashMap<String, String>,
}

impl PairingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair two free identities. Fails without touching the table if either is busy.
    pub fn begin(&mut self, a: &str, b: &str) -> Result<(), PairingError> {
        for side in [a, b] {
            if self.partners.contains_key(side) {
                return Err(PairingError {
                    busy: side.to_string(),
                });
            }
        }

        self.partners.insert(a.to_string(), b.to_string());
        self.partners.insert(b.to_string(), a.to_string());
        Ok(())
    }

    /// Remove `identity`'s pairing and its mirror, returning the former partner.
    pub fn end(&mut self, identity: &str) -> Option<String> {
        let partner = self.partners.remove(identity)?;
        if self.partners.get(&partner).map(String::as_str) == Some(identity) {
            self.partners.remove(&partner);
        }
        Some(partner)
    }

    pub fn partner_of(&self, identity: &str) -> Option<&str> {
        self.partners.get(identity).map(String::as_str)
    }

    /// Number of active calls (pairs, not entries).
    pub fn active_calls(&self) -> usize {
        self.partners.len() / 2
    }
}
