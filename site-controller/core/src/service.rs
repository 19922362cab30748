use crate::{
    error::{Entity, Error, Result},
    store::{Credential, CredentialStore, Selector},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

const DEFINITION_KEY: &str = "definition";
const UPDATE_RETRIES: usize = 5;

/// Application protocol exposed at a service address.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Http,
    Http2,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Http => "http",
            Protocol::Http2 => "http2",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// The kind of workload a target name refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Deployment,
    Statefulset,
    Pod,
    Service,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Deployment => "deployment",
            TargetType::Statefulset => "statefulset",
            TargetType::Pod => "pod",
            TargetType::Service => "service",
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for TargetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deployment" => Ok(TargetType::Deployment),
            "statefulset" => Ok(TargetType::Statefulset),
            "pod" | "pods" => Ok(TargetType::Pod),
            "service" => Ok(TargetType::Service),
            other => Err(Error::UnsupportedTargetType(other.to_string())),
        }
    }
}

/// A workload bound behind a service address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub name: String,
    pub port: u16,
}

/// The exposed-service definition persisted on its record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInterface {
    pub address: String,
    pub protocol: Protocol,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl ServiceInterface {
    fn record_name(address: &str) -> String {
        format!("service-{address}")
    }

    /// Two definitions describe the same interface when protocol and port
    /// agree; targets are additive and excluded from the comparison.
    fn definition_matches(&self, other: &ServiceInterface) -> bool {
        self.protocol == other.protocol && self.port == other.port
    }

    fn to_credential(&self) -> Result<Credential> {
        let mut cred = Credential::new(&Self::record_name(&self.address), crate::SERVICE_TYPE);
        let doc = serde_json::to_vec(self).map_err(|e| Error::Store(e.into()))?;
        cred.data.insert(DEFINITION_KEY.to_string(), doc);
        Ok(cred)
    }

    fn from_credential(cred: &Credential) -> Result<Self> {
        let doc = cred.data.get(DEFINITION_KEY).ok_or_else(|| {
            Error::Store(anyhow::anyhow!(
                "service record {:?} has no definition",
                cred.name
            ))
        })?;
        serde_json::from_slice(doc).map_err(|e| Error::Store(e.into()))
    }
}

/// Resolves the port a workload serves on, proving the workload exists.
#[async_trait::async_trait]
pub trait WorkloadLookup: Send + Sync + 'static {
    async fn resolve_port(&self, target_type: TargetType, name: &str) -> Result<u16>;
}

/// Manages service-interface records and their target bindings.
pub struct ServiceRegistry {
    store: Arc<dyn CredentialStore>,
    lookup: Arc<dyn WorkloadLookup>,
}

impl ServiceRegistry {
    pub fn new(store: Arc<dyn CredentialStore>, lookup: Arc<dyn WorkloadLookup>) -> Self {
        Self { store, lookup }
    }

    /// Declares an address. Re-declaring an identical interface is a no-op;
    /// re-declaring with a different protocol or port is a collision.
    pub async fn create(&self, interface: ServiceInterface) -> Result<ServiceInterface> {
        match self.store.create(interface.to_credential()?).await {
            Ok(_) => {
                tracing::info!(address = %interface.address, protocol = %interface.protocol, "service interface created");
                Ok(interface)
            }
            Err(Error::AlreadyExists { .. }) => {
                let existing = self.inspect(&interface.address).await?;
                if existing.definition_matches(&interface) {
                    Ok(existing)
                } else {
                    Err(Error::AlreadyExists {
                        entity: Entity::ServiceInterface,
                        name: interface.address,
                    })
                }
            }
            Err(e) => Err(e),
        }
    }

    pub async fn inspect(&self, address: &str) -> Result<ServiceInterface> {
        let cred = self
            .store
            .get(&ServiceInterface::record_name(address))
            .await
            .map_err(|e| match e {
                Error::NotFound { .. } => Error::NotFound {
                    entity: Entity::ServiceInterface,
                    name: address.to_string(),
                },
                e => e,
            })?;
        ServiceInterface::from_credential(&cred)
    }

    pub async fn list(&self) -> Result<Vec<ServiceInterface>> {
        let creds = self
            .store
            .list(&Selector::record_type(crate::SERVICE_TYPE))
            .await?;
        creds.iter().map(ServiceInterface::from_credential).collect()
    }

    /// Attaches a workload behind `address`. The target port defaults to
    /// what the workload itself serves on; an explicit `port` overrides it.
    /// Binding an already-bound target refreshes it in place.
    pub async fn bind(
        &self,
        address: &str,
        target_type: &str,
        target_name: &str,
        protocol: Option<Protocol>,
        port: Option<u16>,
    ) -> Result<ServiceInterface> {
        let target_type: TargetType = target_type.parse()?;
        // Resolve unconditionally so a bind against a nonexistent workload
        // fails even when the port was given.
        let resolved = self.lookup.resolve_port(target_type, target_name).await?;
        let port = port.unwrap_or(resolved);

        for _ in 0..UPDATE_RETRIES {
            let name = ServiceInterface::record_name(address);
            let cred = self.store.get(&name).await.map_err(|e| match e {
                Error::NotFound { .. } => Error::NotFound {
                    entity: Entity::ServiceInterface,
                    name: address.to_string(),
                },
                e => e,
            })?;
            let mut interface = ServiceInterface::from_credential(&cred)?;

            if let Some(given) = protocol {
                if given != interface.protocol {
                    return Err(Error::ProtocolMismatch {
                        address: address.to_string(),
                        expected: interface.protocol,
                        given,
                    });
                }
            }

            let target = Target {
                target_type,
                name: target_name.to_string(),
                port,
            };
            interface
                .targets
                .retain(|t| !(t.target_type == target_type && t.name == target.name));
            interface.targets.push(target);

            let mut updated = interface.to_credential()?;
            updated.revision = cred.revision;
            match self.store.update(updated).await {
                Ok(_) => {
                    tracing::info!(
                        %address,
                        target = %format!("{target_type}/{target_name}"),
                        port,
                        "target bound",
                    );
                    return Ok(interface);
                }
                Err(Error::Conflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict {
            name: address.to_string(),
        })
    }

    /// Detaches a workload. With `delete_if_no_targets`, removing the last
    /// target also removes the address itself.
    pub async fn unbind(
        &self,
        target_type: &str,
        target_name: &str,
        address: &str,
        delete_if_no_targets: bool,
    ) -> Result<()> {
        let target_type: TargetType = target_type.parse()?;

        for _ in 0..UPDATE_RETRIES {
            let name = ServiceInterface::record_name(address);
            let cred = self.store.get(&name).await.map_err(|e| match e {
                Error::NotFound { .. } => Error::NotFound {
                    entity: Entity::ServiceInterface,
                    name: address.to_string(),
                },
                e => e,
            })?;
            let mut interface = ServiceInterface::from_credential(&cred)?;

            let before = interface.targets.len();
            interface
                .targets
                .retain(|t| !(t.target_type == target_type && t.name == target_name));
            if interface.targets.len() == before {
                return Err(Error::NotFound {
                    entity: Entity::Target,
                    name: format!("{target_type}/{target_name}"),
                });
            }

            if interface.targets.is_empty() && delete_if_no_targets {
                self.store.delete(&name).await?;
                tracing::info!(%address, "service interface removed with its last target");
                return Ok(());
            }

            let mut updated = interface.to_credential()?;
            updated.revision = cred.revision;
            match self.store.update(updated).await {
                Ok(_) => {
                    tracing::info!(
                        %address,
                        target = %format!("{target_type}/{target_name}"),
                        "target unbound",
                    );
                    return Ok(());
                }
                Err(Error::Conflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict {
            name: address.to_string(),
        })
    }

    /// Deletes the address and every binding behind it.
    pub async fn remove(&self, address: &str) -> Result<()> {
        self.store
            .delete(&ServiceInterface::record_name(address))
            .await
            .map_err(|e| match e {
                Error::NotFound { .. } => Error::NotFound {
                    entity: Entity::ServiceInterface,
                    name: address.to_string(),
                },
                e => e,
            })?;
        tracing::info!(%address, "service interface removed");
        Ok(())
    }
}
