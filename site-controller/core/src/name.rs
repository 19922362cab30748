use crate::{
    error::Result,
    store::{CredentialStore, Selector},
};
use ahash::AHashSet;
use std::sync::Arc;

/// Assigns the first unused `conn{N}` name, computed from a fresh read of
/// what exists at call time.
///
/// Two racing allocations may pick the same name; the losing create then
/// surfaces `AlreadyExists` rather than overwriting anything.
pub struct NameAllocator {
    store: Arc<dyn CredentialStore>,
    kind: &'static str,
}

impl NameAllocator {
    pub const PREFIX: &'static str = "conn";

    /// Allocates names scoped to one record kind, e.g. connector records or
    /// issued tokens.
    pub fn new(store: Arc<dyn CredentialStore>, kind: &'static str) -> Self {
        Self { store, kind }
    }

    pub async fn allocate(&self) -> Result<String> {
        let mut used = AHashSet::new();
        for cred in self.store.list(&Selector::record_type(self.kind)).await? {
            used.insert(cred.name);
        }
        Ok(Self::first_unused(&used))
    }

    fn first_unused(used: &AHashSet<String>) -> String {
        let mut i = 1usize;
        loop {
            let name = format!("{}{i}", Self::PREFIX);
            if !used.contains(&name) {
                return name;
            }
            i += 1;
        }
    }
}
