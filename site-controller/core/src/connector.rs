use crate::{
    error::{Entity, Error, Result},
    name::NameAllocator,
    status::{LinkStatus, StatusReconciler},
    store::{Credential, CredentialStore, Selector},
    token::{self, ConnectionToken, LinkClass},
};
use std::{fmt, path::Path, str::FromStr, sync::Arc};

pub const COST_ANNOTATION: &str = "vanlink.io/cost";
pub const STATE_ANNOTATION: &str = "vanlink.io/state";
/// Marks the connector carrying the site's own upstream control traffic.
pub const CURRENT_ANNOTATION: &str = "vanlink.io/current";

/// Lifecycle of a connector as tracked on its record. Only the
/// [`StatusReconciler`] writes transitions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ConnectorState {
    #[default]
    Created,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorState::Created => "created",
            ConnectorState::Connecting => "connecting",
            ConnectorState::Connected => "connected",
            ConnectorState::Disconnected => "disconnected",
            ConnectorState::Failed => "failed",
        }
    }

    /// Advances the state given the link the router reports, if any.
    /// `Connected` never moves straight back to `Connecting`; a dropped
    /// link is observed as `Disconnected` first.
    pub fn step(self, link: Option<&LinkStatus>) -> Self {
        use ConnectorState::*;
        match (self, link) {
            // The record was published; the router is now attempting the
            // dial whether or not it reports the link yet.
            (Created, _) => Connecting,
            (Connecting, Some(l)) if l.up => Connected,
            (Connecting, Some(l)) if l.error.is_some() => Failed,
            // No give-up on an unreachable remote; the caller decides how
            // long to wait.
            (Connecting, _) => Connecting,
            (Connected, Some(l)) if l.up => Connected,
            (Connected, _) => Disconnected,
            (Disconnected, Some(l)) if l.up => Connected,
            (Disconnected, Some(l)) if l.error.is_some() => Failed,
            (Disconnected, Some(_)) => Connecting,
            (Disconnected, None) => Disconnected,
            (Failed, Some(l)) if l.up => Connected,
            (Failed, Some(l)) if l.error.is_none() => Connecting,
            (Failed, _) => Failed,
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for ConnectorState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(ConnectorState::Created),
            "connecting" => Ok(ConnectorState::Connecting),
            "connected" => Ok(ConnectorState::Connected),
            "disconnected" => Ok(ConnectorState::Disconnected),
            "failed" => Ok(ConnectorState::Failed),
            _ => Err(Error::Store(anyhow::anyhow!(
                "unknown connector state {s:?}"
            ))),
        }
    }
}

/// A site's record of a desired outbound link to another site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connector {
    pub name: String,
    pub cost: u32,
    pub link_class: LinkClass,
    pub host: String,
    pub port: u16,
    pub state: ConnectorState,
}

impl Connector {
    pub(crate) fn from_credential(cred: &Credential) -> Result<Self> {
        fn ann<'c>(cred: &'c Credential, key: &str) -> Result<&'c str> {
            cred.annotation(key).ok_or_else(|| {
                Error::Store(anyhow::anyhow!(
                    "connector record {:?} is missing the {key} annotation",
                    cred.name
                ))
            })
        }
        fn number<T: FromStr>(cred: &Credential, key: &str) -> Result<T> {
            ann(cred, key)?.parse().map_err(|_| {
                Error::Store(anyhow::anyhow!(
                    "connector record {:?} has a malformed {key} annotation",
                    cred.name
                ))
            })
        }
        Ok(Self {
            name: cred.name.clone(),
            cost: number(cred, COST_ANNOTATION)?,
            link_class: ann(cred, token::LINK_CLASS_ANNOTATION)?.parse()?,
            host: ann(cred, token::HOST_ANNOTATION)?.to_string(),
            port: number(cred, token::PORT_ANNOTATION)?,
            state: ann(cred, STATE_ANNOTATION)?.parse()?,
        })
    }
}

/// Options for [`ConnectorManager::create`].
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub name: Option<String>,
    pub cost: u32,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RemoveOptions {
    pub force_current: bool,
}

/// A connector record augmented with a live connectivity check.
#[derive(Clone, Debug)]
pub struct ConnectorInspectResponse {
    pub connector: Connector,
    pub connected: bool,
}

/// Registers and manages connector records on the initiating site.
pub struct ConnectorManager {
    store: Arc<dyn CredentialStore>,
    status: StatusReconciler,
}

impl ConnectorManager {
    pub fn new(store: Arc<dyn CredentialStore>, status: StatusReconciler) -> Self {
        Self { store, status }
    }

    /// Redeems the token at `path`. Returns with the record in `Created`;
    /// connectivity is an asynchronous fact answered later by [`inspect`]
    /// or [`StatusReconciler::wait_until_connected`].
    ///
    /// [`inspect`]: ConnectorManager::inspect
    pub async fn create(&self, path: &Path, opts: CreateOptions) -> Result<Connector> {
        let token = ConnectionToken::read_file(path)?;
        self.create_from_token(&token, opts).await
    }

    /// As [`create`], for a token already in memory (e.g. handed over by a
    /// claims channel rather than a file).
    ///
    /// [`create`]: ConnectorManager::create
    pub async fn create_from_token(
        &self,
        token: &ConnectionToken,
        opts: CreateOptions,
    ) -> Result<Connector> {
        let name = match opts.name {
            Some(name) if !name.is_empty() => name,
            _ => {
                NameAllocator::new(self.store.clone(), crate::CONNECTOR_TYPE)
                    .allocate()
                    .await?
            }
        };

        let connector = Connector {
            name: name.clone(),
            cost: opts.cost,
            link_class: token.link_class,
            host: token.host.clone(),
            port: token.port,
            state: ConnectorState::Created,
        };

        let mut cred = Credential::new(&name, crate::CONNECTOR_TYPE);
        cred.annotations
            .insert(COST_ANNOTATION.to_string(), connector.cost.to_string());
        cred.annotations.insert(
            token::LINK_CLASS_ANNOTATION.to_string(),
            token.link_class.to_string(),
        );
        cred.annotations
            .insert(token::HOST_ANNOTATION.to_string(), token.host.clone());
        cred.annotations
            .insert(token::PORT_ANNOTATION.to_string(), token.port.to_string());
        cred.annotations.insert(
            STATE_ANNOTATION.to_string(),
            ConnectorState::Created.to_string(),
        );
        // The router reconciliation path picks the TLS material up from the
        // published record and dials out with it.
        cred.data = token.tls.to_data();

        match self.store.create(cred).await {
            Ok(_) => {
                tracing::info!(
                    name = %connector.name,
                    host = %connector.host,
                    port = connector.port,
                    cost = connector.cost,
                    "connector created",
                );
                Ok(connector)
            }
            Err(Error::AlreadyExists { .. }) => Err(Error::AlreadyExists {
                entity: Entity::Connector,
                name,
            }),
            Err(e) => Err(e),
        }
    }

    /// Returns the record with the latest link observation folded into its
    /// state, plus a live connectivity check. A dropped link is what moves
    /// `Connected` to `Disconnected` here; nothing pushes that transition.
    ///
    /// Inspecting `"all"` on a site that never issued a token reports that
    /// absence rather than a missing connector.
    pub async fn inspect(&self, name: &str) -> Result<ConnectorInspectResponse> {
        if let Err(e) = self.store.get(crate::SITE_RECORD).await {
            if e.is_not_found() {
                return Err(Error::NotDeployed);
            }
            return Err(e);
        }

        match self.store.get(name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                if name == "all" {
                    let tokens = self
                        .store
                        .list(&Selector::record_type(crate::TOKEN_TYPE))
                        .await?;
                    if tokens.is_empty() {
                        return Err(Error::NotFound {
                            entity: Entity::IssuedToken,
                            name: name.to_string(),
                        });
                    }
                }
                return Err(Error::NotFound {
                    entity: Entity::Connector,
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e),
        }

        let connector = self.status.reconcile(name).await?;
        let connected = self.status.is_connected(name).await?;
        Ok(ConnectorInspectResponse {
            connector,
            connected,
        })
    }

    /// All connectors on the site, in no particular order.
    pub async fn list(&self) -> Result<Vec<Connector>> {
        let creds = self
            .store
            .list(&Selector::record_type(crate::CONNECTOR_TYPE))
            .await?;
        creds.iter().map(Connector::from_credential).collect()
    }

    /// Deletes the record regardless of its state. Removing the connector
    /// the site's own control traffic rides on requires `force_current`.
    pub async fn remove(&self, name: &str, opts: RemoveOptions) -> Result<()> {
        let cred = self.store.get(name).await.map_err(|e| match e {
            Error::NotFound { .. } => Error::NotFound {
                entity: Entity::Connector,
                name: name.to_string(),
            },
            e => e,
        })?;
        if cred.annotation(CURRENT_ANNOTATION) == Some("true") && !opts.force_current {
            return Err(Error::CurrentConnector {
                name: name.to_string(),
            });
        }
        self.store.delete(name).await?;
        tracing::info!(%name, "connector removed");
        Ok(())
    }
}
