use crate::error::Result;
use futures::stream::BoxStream;
use std::collections::BTreeMap;

pub mod memory;

/// A namespaced, labeled, opaque record in the site's credential store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credential {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub data: BTreeMap<String, Vec<u8>>,
    pub owner: Option<OwnerRef>,
    /// Opaque version tag set by the store; `update` refuses stale revisions.
    pub revision: Option<String>,
}

impl Credential {
    pub fn new(name: impl Into<String>, kind: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(crate::TYPE_LABEL.to_string(), kind.to_string());
        Self {
            name: name.into(),
            labels,
            ..Default::default()
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Reference to the store object owning a record; deleting the owner takes
/// the record with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// A label selector; every entry must match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector(BTreeMap<String, String>);

impl Selector {
    pub fn record_type(kind: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(crate::TYPE_LABEL.to_string(), kind.to_string());
        Self(labels)
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    pub fn to_label_query(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A change notification from the store. Delivery is at-least-once and only
/// ordered per name; consumers reconcile from a full list before applying
/// incremental events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialEvent {
    Added(Credential),
    Modified(Credential),
    Deleted(String),
}

pub type CredentialWatch = BoxStream<'static, CredentialEvent>;

/// The persistence contract the whole site controller is written against.
/// Backed by Kubernetes Secrets in production and by
/// [`memory::MemoryStore`] in tests and single-process deployments.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    async fn create(&self, cred: Credential) -> Result<Credential>;

    async fn get(&self, name: &str) -> Result<Credential>;

    async fn list(&self, selector: &Selector) -> Result<Vec<Credential>>;

    /// Replaces an existing record. Fails with [`crate::Error::Conflict`]
    /// when the given revision is no longer current.
    async fn update(&self, cred: Credential) -> Result<Credential>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// Streams changes matching `selector`, starting with an `Added` event
    /// for every record currently present.
    async fn watch(&self, selector: &Selector) -> Result<CredentialWatch>;
}
