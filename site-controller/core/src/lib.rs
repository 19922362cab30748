#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod connector;
pub mod error;
pub mod name;
pub mod service;
pub mod status;
pub mod store;
pub mod token;

pub use self::{
    connector::{
        Connector, ConnectorInspectResponse, ConnectorManager, ConnectorState, CreateOptions,
        RemoveOptions,
    },
    error::{Entity, Error, Result},
    name::NameAllocator,
    service::{Protocol, ServiceInterface, ServiceRegistry, Target, TargetType, WorkloadLookup},
    status::{LinkDirection, LinkStatus, RouterManagement, StatusReconciler},
    store::{Credential, CredentialEvent, CredentialStore, CredentialWatch, OwnerRef, Selector},
    token::{ConnectionToken, LinkClass, TlsBundle, TokenIssuer},
};

/// Label key distinguishing the kinds of records a site keeps in its store.
pub const TYPE_LABEL: &str = "vanlink.io/type";

/// Label value for a redeemed token, i.e. a connector record.
pub const CONNECTOR_TYPE: &str = "connection-token";

/// Label value for a token issued by this site.
pub const TOKEN_TYPE: &str = "token";

/// Label value for a service-interface definition.
pub const SERVICE_TYPE: &str = "service-interface";

/// Well-known record carrying the site's router endpoints in its
/// annotations. Its absence means the router is not provisioned.
pub const SITE_RECORD: &str = "vanlink-site";

/// Well-known record holding the TLS material issued tokens carry.
pub const SITE_CA_RECORD: &str = "vanlink-site-ca";
