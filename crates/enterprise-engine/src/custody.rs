use std::collections::BTreeMap;

use crate::types::{AccountId, EnterpriseId};

/// Identity and control of enterprises, owned outside the economy.
///
/// The engine only reads through this trait; minting, transfer and burning
/// belong to whoever implements it.
pub trait CustodyRegistry {
    fn owner_of(&self, id: EnterpriseId) -> Option<AccountId>;

    fn exists(&self, id: EnterpriseId) -> bool {
        self.owner_of(id).is_some()
    }

    /// The `index`-th enterprise held by `owner`, in registry order.
    fn token_of_owner_by_index(&self, owner: AccountId, index: usize) -> Option<EnterpriseId>;

    fn balance_of_owner(&self, owner: AccountId) -> usize;
}

/// Map-backed registry for hosts without an external custody system.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCustody {
    owners: BTreeMap<EnterpriseId, AccountId>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id is already taken.
    pub fn mint(&mut self, id: EnterpriseId, owner: AccountId) -> bool {
        if self.owners.contains_key(&id) {
            return false;
        }
        self.owners.insert(id, owner);
        true
    }

    pub fn transfer(&mut self, id: EnterpriseId, to: AccountId) -> bool {
        match self.owners.get_mut(&id) {
            Some(owner) => {
                *owner = to;
                true
            }
            None => false,
        }
    }

    pub fn burn(&mut self, id: EnterpriseId) -> bool {
        self.owners.remove(&id).is_some()
    }
}

impl CustodyRegistry for InMemoryCustody {
    fn owner_of(&self, id: EnterpriseId) -> Option<AccountId> {
        self.owners.get(&id).copied()
    }

    fn token_of_owner_by_index(&self, owner: AccountId, index: usize) -> Option<EnterpriseId> {
        self.owners
            .iter()
            .filter(|(_, holder)| **holder == owner)
            .map(|(id, _)| *id)
            .nth(index)
    }

    fn balance_of_owner(&self, owner: AccountId) -> usize {
        self.owners.values().filter(|holder| **holder == owner).count()
    }
}
