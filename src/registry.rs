//! Duplicate-instance detection
//!
//! One process-wide registry of (account, execution instrument) claims,
//! checked at start-of-day and released at shutdown. Explicit object
//! with one mutex rather than a bare static, so lifetime and contention
//! are reviewable.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::types::ExecutionInstrument;

#[derive(Debug, Default)]
struct RegistryInner {
    claimed: HashSet<(String, String)>,
}

/// Shared registry. Clone is cheap; all clones see the same claims.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim (account, instrument). Fails if another engine instance in
    /// this process already holds the pair. The claim is released when
    /// the returned guard drops.
    pub fn claim(
        &self,
        account: &str,
        instrument: &ExecutionInstrument,
    ) -> Result<InstanceClaim> {
        let key = (account.to_string(), instrument.0.clone());
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if !inner.claimed.insert(key.clone()) {
            bail!(
                "duplicate instance for account {} on {}",
                account,
                instrument
            );
        }
        drop(inner);
        Ok(InstanceClaim {
            registry: self.clone(),
            key,
        })
    }

    fn release(&self, key: &(String, String)) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.claimed.remove(key);
    }

    pub fn active_claims(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").claimed.len()
    }
}

/// RAII guard for one (account, instrument) claim.
#[derive(Debug)]
pub struct InstanceClaim {
    registry: InstanceRegistry,
    key: (String, String),
}

impl Drop for InstanceClaim {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mnq() -> ExecutionInstrument {
        ExecutionInstrument("MNQ".to_string())
    }

    #[test]
    fn second_claim_for_same_pair_fails() {
        let registry = InstanceRegistry::new();
        let _claim = registry.claim("ACCT-1", &mnq()).unwrap();
        assert!(registry.claim("ACCT-1", &mnq()).is_err());
    }

    #[test]
    fn different_accounts_coexist() {
        let registry = InstanceRegistry::new();
        let _a = registry.claim("ACCT-1", &mnq()).unwrap();
        let _b = registry.claim("ACCT-2", &mnq()).unwrap();
        assert_eq!(registry.active_claims(), 2);
    }

    #[test]
    fn drop_releases_claim() {
        let registry = InstanceRegistry::new();
        {
            let _claim = registry.claim("ACCT-1", &mnq()).unwrap();
            assert_eq!(registry.active_claims(), 1);
        }
        assert_eq!(registry.active_claims(), 0);
        assert!(registry.claim("ACCT-1", &mnq()).is_ok());
    }
}
