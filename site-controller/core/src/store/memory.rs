use super::{Credential, CredentialEvent, CredentialStore, CredentialWatch, Selector};
use crate::error::{Entity, Error, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

const EVENT_BUFFER: usize = 256;

/// In-memory [`CredentialStore`]; the stand-in for a live cluster.
pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<CredentialEvent>,
}

#[derive(Default)]
struct State {
    records: BTreeMap<String, Credential>,
    next_revision: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn publish(&self, ev: CredentialEvent) {
        // Nobody watching is fine.
        let _ = self.events.send(ev);
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryStore {
    async fn create(&self, mut cred: Credential) -> Result<Credential> {
        let mut state = self.state.lock();
        if state.records.contains_key(&cred.name) {
            return Err(Error::AlreadyExists {
                entity: Entity::Credential,
                name: cred.name,
            });
        }
        state.next_revision += 1;
        cred.revision = Some(state.next_revision.to_string());
        state.records.insert(cred.name.clone(), cred.clone());
        drop(state);
        self.publish(CredentialEvent::Added(cred.clone()));
        Ok(cred)
    }

    async fn get(&self, name: &str) -> Result<Credential> {
        self.state
            .lock()
            .records
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                entity: Entity::Credential,
                name: name.to_string(),
            })
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<Credential>> {
        Ok(self
            .state
            .lock()
            .records
            .values()
            .filter(|c| selector.matches(&c.labels))
            .cloned()
            .collect())
    }

    async fn update(&self, mut cred: Credential) -> Result<Credential> {
        let mut state = self.state.lock();
        let current = state
            .records
            .get(&cred.name)
            .ok_or_else(|| Error::NotFound {
                entity: Entity::Credential,
                name: cred.name.clone(),
            })?;
        if cred.revision != current.revision {
            return Err(Error::Conflict { name: cred.name });
        }
        state.next_revision += 1;
        cred.revision = Some(state.next_revision.to_string());
        state.records.insert(cred.name.clone(), cred.clone());
        drop(state);
        self.publish(CredentialEvent::Modified(cred.clone()));
        Ok(cred)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let removed = self.state.lock().records.remove(name);
        match removed {
            Some(_) => {
                self.publish(CredentialEvent::Deleted(name.to_string()));
                Ok(())
            }
            None => Err(Error::NotFound {
                entity: Entity::Credential,
                name: name.to_string(),
            }),
        }
    }

    async fn watch(&self, selector: &Selector) -> Result<CredentialWatch> {
        // Subscribe before snapshotting so nothing is missed; the overlap
        // may re-deliver an event, which consumers tolerate anyway.
        let rx = self.events.subscribe();
        let snapshot = self.list(selector).await?;
        let selector = selector.clone();
        let live = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(move |ev| {
            let out = match ev {
                Ok(CredentialEvent::Added(c)) if selector.matches(&c.labels) => {
                    Some(CredentialEvent::Added(c))
                }
                Ok(CredentialEvent::Modified(c)) if selector.matches(&c.labels) => {
                    Some(CredentialEvent::Modified(c))
                }
                // Deletions carry no labels; consumers drop unknown names.
                Ok(CredentialEvent::Deleted(name)) => Some(CredentialEvent::Deleted(name)),
                // Filtered out, or the subscriber lagged; the next full
                // list reconciles what was dropped.
                _ => None,
            };
            futures::future::ready(out)
        });
        let snapshot = futures::stream::iter(snapshot.into_iter().map(CredentialEvent::Added));
        Ok(snapshot.chain(live).boxed())
    }
}
