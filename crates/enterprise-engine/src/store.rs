use std::collections::BTreeMap;

use crate::error::{EngineError, Result};
use crate::types::{Enterprise, EnterpriseId, SupplyCounters, SupplyTier};

/// Enterprise rows and global supply counters. Plain storage, no rules.
#[derive(Clone, Debug, Default)]
pub struct EnterpriseStore {
    enterprises: BTreeMap<EnterpriseId, Enterprise>,
    supply: SupplyCounters,
}

impl EnterpriseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: EnterpriseId) -> Option<&Enterprise> {
        self.enterprises.get(&id)
    }

    pub fn contains(&self, id: EnterpriseId) -> bool {
        self.enterprises.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.enterprises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enterprises.is_empty()
    }

    pub fn supply(&self) -> &SupplyCounters {
        &self.supply
    }

    /// Open a unit of work. Nothing reaches the store until it commits;
    /// dropping it discards every staged change.
    pub fn begin(&mut self) -> UnitOfWork<'_> {
        let supply = self.supply;
        UnitOfWork {
            store: self,
            staged: BTreeMap::new(),
            supply,
        }
    }
}

/// Staged changes spanning any number of rows plus the supply counters.
pub struct UnitOfWork<'s> {
    store: &'s mut EnterpriseStore,
    staged: BTreeMap<EnterpriseId, Enterprise>,
    supply: SupplyCounters,
}

impl UnitOfWork<'_> {
    /// Latest view of a row: staged if touched in this unit, else stored.
    pub fn load(&self, id: EnterpriseId) -> Result<Enterprise> {
        self.staged
            .get(&id)
            .or_else(|| self.store.enterprises.get(&id))
            .copied()
            .ok_or(EngineError::UnknownEnterprise(id))
    }

    pub fn contains(&self, id: EnterpriseId) -> bool {
        self.staged.contains_key(&id) || self.store.enterprises.contains_key(&id)
    }

    pub fn stage(&mut self, enterprise: Enterprise) {
        self.staged.insert(enterprise.id, enterprise);
    }

    pub fn supply(&self) -> &SupplyCounters {
        &self.supply
    }

    pub fn record_mint(&mut self, tier: SupplyTier) {
        self.supply.record_mint(tier);
    }

    pub fn commit(self) {
        let UnitOfWork { store, staged, supply } = self;
        store.enterprises.extend(staged);
        store.supply = supply;
    }
}
