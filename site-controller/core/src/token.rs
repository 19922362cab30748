use crate::{
    error::{Entity, Error, Result},
    name::NameAllocator,
    store::{Credential, CredentialStore},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::Path, str::FromStr, sync::Arc};

pub const LINK_CLASS_ANNOTATION: &str = "vanlink.io/link-class";
pub const HOST_ANNOTATION: &str = "vanlink.io/host";
pub const PORT_ANNOTATION: &str = "vanlink.io/port";

// Site-record annotations carrying the router's listener endpoints.
pub const EDGE_HOST_ANNOTATION: &str = "vanlink.io/edge-host";
pub const EDGE_PORT_ANNOTATION: &str = "vanlink.io/edge-port";
pub const INTER_ROUTER_HOST_ANNOTATION: &str = "vanlink.io/inter-router-host";
pub const INTER_ROUTER_PORT_ANNOTATION: &str = "vanlink.io/inter-router-port";

// Data keys for TLS material, both on records and in token documents.
pub const CERT_DATA_KEY: &str = "tls.crt";
pub const KEY_DATA_KEY: &str = "tls.key";
pub const CA_DATA_KEY: &str = "ca.crt";

/// Which router listener a token targets.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkClass {
    Edge,
    InterRouter,
}

impl LinkClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkClass::Edge => "edge",
            LinkClass::InterRouter => "inter-router",
        }
    }
}

impl fmt::Display for LinkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for LinkClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "edge" => Ok(LinkClass::Edge),
            "inter-router" => Ok(LinkClass::InterRouter),
            _ => Err(Error::TokenInvalid {
                reason: format!("unknown link class {s:?}"),
            }),
        }
    }
}

/// PEM material carried by a token: the client cert/key pair and the CA the
/// dial is validated against. Nothing beyond what the dial requires.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsBundle {
    pub cert: String,
    pub key: String,
    pub ca: String,
}

impl TlsBundle {
    pub fn validate(&self) -> Result<()> {
        for (field, pem) in [("cert", &self.cert), ("ca", &self.ca)] {
            let certs = rustls_pemfile::certs(&mut pem.as_bytes())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::TokenInvalid {
                    reason: format!("{field}: {e}"),
                })?;
            if certs.is_empty() {
                return Err(Error::TokenInvalid {
                    reason: format!("{field} holds no certificate"),
                });
            }
        }
        match rustls_pemfile::private_key(&mut self.key.as_bytes()) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::TokenInvalid {
                reason: "key holds no private key".to_string(),
            }),
            Err(e) => Err(Error::TokenInvalid {
                reason: format!("key: {e}"),
            }),
        }
    }

    pub(crate) fn to_data(&self) -> BTreeMap<String, Vec<u8>> {
        let mut data = BTreeMap::new();
        data.insert(CERT_DATA_KEY.to_string(), self.cert.clone().into_bytes());
        data.insert(KEY_DATA_KEY.to_string(), self.key.clone().into_bytes());
        data.insert(CA_DATA_KEY.to_string(), self.ca.clone().into_bytes());
        data
    }

    pub(crate) fn from_data(data: &BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let field = |key: &str| -> Result<String> {
            let bytes = data.get(key).ok_or_else(|| Error::TokenInvalid {
                reason: format!("missing {key}"),
            })?;
            String::from_utf8(bytes.clone()).map_err(|_| Error::TokenInvalid {
                reason: format!("{key} is not UTF-8 PEM"),
            })
        };
        Ok(Self {
            cert: field(CERT_DATA_KEY)?,
            key: field(KEY_DATA_KEY)?,
            ca: field(CA_DATA_KEY)?,
        })
    }
}

/// An exportable credential bundle authorizing a dial into the issuing site.
/// Round-trips byte-for-byte through its YAML form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectionToken {
    pub name: String,
    pub link_class: LinkClass,
    pub host: String,
    pub port: u16,
    pub tls: TlsBundle,
}

impl ConnectionToken {
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Store(e.into()))
    }

    pub fn from_yaml(doc: &str) -> Result<Self> {
        let token: Self = serde_yaml::from_str(doc).map_err(|e| Error::TokenInvalid {
            reason: e.to_string(),
        })?;
        token.tls.validate()?;
        Ok(token)
    }

    pub fn write_file(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let doc = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::TokenNotFound {
                    path: path.display().to_string(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        Self::from_yaml(&doc)
    }

    /// The store form of an issued token; `link status all` looks these up.
    pub fn to_credential(&self) -> Credential {
        let mut cred = Credential::new(&self.name, crate::TOKEN_TYPE);
        cred.annotations
            .insert(LINK_CLASS_ANNOTATION.to_string(), self.link_class.to_string());
        cred.annotations
            .insert(HOST_ANNOTATION.to_string(), self.host.clone());
        cred.annotations
            .insert(PORT_ANNOTATION.to_string(), self.port.to_string());
        cred.data = self.tls.to_data();
        cred
    }
}

/// Issues connection tokens against the site's current router identity.
pub struct TokenIssuer {
    store: Arc<dyn CredentialStore>,
}

impl TokenIssuer {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Reads the site's endpoint for `link_class` and packages it with the
    /// current TLS identity. Read-only with respect to router state; export
    /// is the caller's choice of [`ConnectionToken::write_file`] or
    /// [`TokenIssuer::record`].
    pub async fn issue(&self, link_class: LinkClass, name: Option<String>) -> Result<ConnectionToken> {
        let site = match self.store.get(crate::SITE_RECORD).await {
            Ok(site) => site,
            Err(e) if e.is_not_found() => return Err(Error::NotDeployed),
            Err(e) => return Err(e),
        };
        let (host_key, port_key) = match link_class {
            LinkClass::Edge => (EDGE_HOST_ANNOTATION, EDGE_PORT_ANNOTATION),
            LinkClass::InterRouter => (INTER_ROUTER_HOST_ANNOTATION, INTER_ROUTER_PORT_ANNOTATION),
        };
        let host = site
            .annotation(host_key)
            .ok_or(Error::NotDeployed)?
            .to_string();
        let port = site
            .annotation(port_key)
            .and_then(|p| p.parse().ok())
            .ok_or(Error::NotDeployed)?;

        let ca = match self.store.get(crate::SITE_CA_RECORD).await {
            Ok(ca) => ca,
            Err(e) if e.is_not_found() => return Err(Error::NotDeployed),
            Err(e) => return Err(e),
        };
        let tls = TlsBundle::from_data(&ca.data)?;

        let name = match name {
            Some(name) if !name.is_empty() => name,
            _ => {
                NameAllocator::new(self.store.clone(), crate::TOKEN_TYPE)
                    .allocate()
                    .await?
            }
        };

        tracing::info!(%name, %link_class, %host, port, "token issued");
        Ok(ConnectionToken {
            name,
            link_class,
            host,
            port,
            tls,
        })
    }

    /// Records the issuance in the store so it is visible to status queries.
    pub async fn record(&self, token: &ConnectionToken) -> Result<Credential> {
        self.store
            .create(token.to_credential())
            .await
            .map_err(|e| match e {
                Error::AlreadyExists { .. } => Error::AlreadyExists {
                    entity: Entity::IssuedToken,
                    name: token.name.clone(),
                },
                e => e,
            })
    }
}

#[cfg(test)]
pub(crate) fn test_bundle() -> TlsBundle {
    let key_pair = rcgen::KeyPair::generate().expect("key pair");
    let cert = rcgen::CertificateParams::new(vec!["vanlink-router.test".to_string()])
        .expect("cert params")
        .self_signed(&key_pair)
        .expect("self-signed cert");
    TlsBundle {
        cert: cert.pem(),
        key: key_pair.serialize_pem(),
        ca: cert.pem(),
    }
}

#[cfg(test)]
pub(crate) async fn seed_site(store: &dyn CredentialStore) {
    let mut site = Credential::new(crate::SITE_RECORD, "site");
    site.annotations
        .insert(EDGE_HOST_ANNOTATION.to_string(), "edge.test".to_string());
    site.annotations
        .insert(EDGE_PORT_ANNOTATION.to_string(), "45671".to_string());
    site.annotations.insert(
        INTER_ROUTER_HOST_ANNOTATION.to_string(),
        "router.test".to_string(),
    );
    site.annotations
        .insert(INTER_ROUTER_PORT_ANNOTATION.to_string(), "55671".to_string());
    store.create(site).await.expect("site record");

    let mut ca = Credential::new(crate::SITE_CA_RECORD, "site-ca");
    ca.data = test_bundle().to_data();
    store.create(ca).await.expect("site ca record");
}
