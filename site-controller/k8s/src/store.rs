use futures::StreamExt;
use k8s_openapi::{api::core::v1 as corev1, ByteString};
use kube::{
    api::{DeleteParams, ListParams, ObjectMeta, PostParams},
    runtime::watcher,
    ResourceExt,
};
use std::collections::{BTreeMap, HashSet};
use vanlink_site_controller_core::{
    Credential, CredentialEvent, CredentialStore, CredentialWatch, Entity, Error, OwnerRef, Result,
    Selector,
};

/// [`CredentialStore`] backed by Secrets in a single namespace.
///
/// Revisions map onto `resourceVersion`, so `update` conflicts exactly when
/// the apiserver reports a stale write.
#[derive(Clone)]
pub struct SecretStore {
    api: kube::Api<corev1::Secret>,
}

impl SecretStore {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: kube::Api::namespaced(client, namespace),
        }
    }

    fn to_secret(cred: &Credential) -> corev1::Secret {
        let data = cred
            .data
            .iter()
            .map(|(k, v)| (k.clone(), ByteString(v.clone())))
            .collect::<BTreeMap<_, _>>();
        let owner_references = cred.owner.as_ref().map(|owner| {
            vec![k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                api_version: "v1".to_string(),
                kind: owner.kind.clone(),
                name: owner.name.clone(),
                uid: owner.uid.clone(),
                ..Default::default()
            }]
        });
        corev1::Secret {
            metadata: ObjectMeta {
                name: Some(cred.name.clone()),
                labels: Some(cred.labels.clone()),
                annotations: Some(cred.annotations.clone()),
                owner_references,
                resource_version: cred.revision.clone(),
                ..Default::default()
            },
            data: (!data.is_empty()).then_some(data),
            ..Default::default()
        }
    }

    fn from_secret(secret: &corev1::Secret) -> Credential {
        let owner = secret
            .metadata
            .owner_references
            .as_ref()
            .and_then(|refs| refs.first())
            .map(|r| OwnerRef {
                kind: r.kind.clone(),
                name: r.name.clone(),
                uid: r.uid.clone(),
            });
        Credential {
            name: secret.name_any(),
            labels: secret.metadata.labels.clone().unwrap_or_default(),
            annotations: secret.metadata.annotations.clone().unwrap_or_default(),
            data: secret
                .data
                .clone()
                .unwrap_or_default()
                .into_iter()
                .map(|(k, ByteString(v))| (k, v))
                .collect(),
            owner,
            revision: secret.metadata.resource_version.clone(),
        }
    }
}

fn status_code(error: &kube::Error) -> Option<u16> {
    match error {
        kube::Error::Api(rsp) => Some(rsp.code),
        _ => None,
    }
}

fn store_error(error: kube::Error) -> Error {
    Error::Store(error.into())
}

#[async_trait::async_trait]
impl CredentialStore for SecretStore {
    async fn create(&self, cred: Credential) -> Result<Credential> {
        let secret = Self::to_secret(&cred);
        match self.api.create(&PostParams::default(), &secret).await {
            Ok(created) => Ok(Self::from_secret(&created)),
            Err(e) if status_code(&e) == Some(409) => Err(Error::AlreadyExists {
                entity: Entity::Credential,
                name: cred.name,
            }),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn get(&self, name: &str) -> Result<Credential> {
        match self.api.get(name).await {
            Ok(secret) => Ok(Self::from_secret(&secret)),
            Err(e) if status_code(&e) == Some(404) => Err(Error::NotFound {
                entity: Entity::Credential,
                name: name.to_string(),
            }),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<Credential>> {
        let params = ListParams::default().labels(&selector.to_label_query());
        let secrets = self.api.list(&params).await.map_err(store_error)?;
        Ok(secrets.iter().map(Self::from_secret).collect())
    }

    async fn update(&self, cred: Credential) -> Result<Credential> {
        let secret = Self::to_secret(&cred);
        match self
            .api
            .replace(&cred.name, &PostParams::default(), &secret)
            .await
        {
            Ok(updated) => Ok(Self::from_secret(&updated)),
            Err(e) if status_code(&e) == Some(409) => {
                Err(Error::Conflict { name: cred.name })
            }
            Err(e) if status_code(&e) == Some(404) => Err(Error::NotFound {
                entity: Entity::Credential,
                name: cred.name,
            }),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if status_code(&e) == Some(404) => Err(Error::NotFound {
                entity: Entity::Credential,
                name: name.to_string(),
            }),
            Err(e) => Err(store_error(e)),
        }
    }

    async fn watch(&self, selector: &Selector) -> Result<CredentialWatch> {
        let config = watcher::Config::default().labels(&selector.to_label_query());
        // The watcher relists on restart, replaying records it already
        // delivered. The seen set turns those replays into Modified so
        // consumers keep the at-least-once, Added-then-Modified contract.
        let mut seen = HashSet::new();
        let stream = watcher(self.api.clone(), config).filter_map(move |ev| {
            let out = match ev {
                Ok(watcher::Event::Apply(secret))
                | Ok(watcher::Event::InitApply(secret)) => {
                    let cred = Self::from_secret(&secret);
                    if seen.insert(cred.name.clone()) {
                        Some(CredentialEvent::Added(cred))
                    } else {
                        Some(CredentialEvent::Modified(cred))
                    }
                }
                Ok(watcher::Event::Delete(secret)) => {
                    let name = secret.name_any();
                    seen.remove(&name);
                    Some(CredentialEvent::Deleted(name))
                }
                Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
                Err(error) => {
                    tracing::debug!(%error, "credential watch failed; the watcher restarts it");
                    None
                }
            };
            futures::future::ready(out)
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Credential {
        let mut cred = Credential::new("conn1", "connection-token");
        cred.annotations
            .insert("vanlink.io/cost".to_string(), "1".to_string());
        cred.data
            .insert("tls.crt".to_string(), b"pem".to_vec());
        cred.owner = Some(OwnerRef {
            kind: "ConfigMap".to_string(),
            name: "vanlink-site".to_string(),
            uid: "abc-123".to_string(),
        });
        cred.revision = Some("42".to_string());
        cred
    }

    #[test]
    fn secret_round_trip_preserves_every_field() {
        let cred = fixture();
        let secret = SecretStore::to_secret(&cred);
        assert_eq!(secret.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(SecretStore::from_secret(&secret), cred);
    }

    #[test]
    fn empty_data_is_omitted_from_the_secret() {
        let cred = Credential::new("conn1", "connection-token");
        let secret = SecretStore::to_secret(&cred);
        assert!(secret.data.is_none());
        assert_eq!(SecretStore::from_secret(&secret).data.len(), 0);
    }

    #[test]
    fn selector_becomes_a_label_query() {
        let selector = Selector::record_type("connection-token");
        assert_eq!(selector.to_label_query(), "vanlink.io/type=connection-token");
    }
}
