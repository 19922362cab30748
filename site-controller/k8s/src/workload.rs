use k8s_openapi::api::{apps::v1 as appsv1, core::v1 as corev1};
use kube::core::NamespaceResourceScope;
use vanlink_site_controller_core::{Entity, Error, Result, TargetType, WorkloadLookup};

/// [`WorkloadLookup`] answered from the cluster the records live in. A bind
/// target must exist here before it is recorded.
#[derive(Clone)]
pub struct WorkloadPorts {
    client: kube::Client,
    namespace: String,
}

impl WorkloadPorts {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    async fn fetch<K>(&self, target_type: TargetType, name: &str) -> Result<K>
    where
        K: kube::Resource<Scope = NamespaceResourceScope>
            + serde::de::DeserializeOwned
            + Clone
            + std::fmt::Debug,
        K::DynamicType: Default,
    {
        kube::Api::<K>::namespaced(self.client.clone(), &self.namespace)
            .get(name)
            .await
            .map_err(|e| match &e {
                kube::Error::Api(rsp) if rsp.code == 404 => Error::NotFound {
                    entity: Entity::Target,
                    name: format!("{target_type}/{name}"),
                },
                _ => Error::Store(e.into()),
            })
    }
}

fn no_port(target_type: TargetType, name: &str) -> Error {
    Error::Store(anyhow::anyhow!(
        "{target_type} {name:?} exposes no port to default to"
    ))
}

fn pod_port(spec: Option<&corev1::PodSpec>) -> Option<u16> {
    spec?
        .containers
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .find_map(|p| u16::try_from(p.container_port).ok())
}

fn service_port(spec: Option<&corev1::ServiceSpec>) -> Option<u16> {
    spec?
        .ports
        .iter()
        .flatten()
        .find_map(|p| u16::try_from(p.port).ok())
}

#[async_trait::async_trait]
impl WorkloadLookup for WorkloadPorts {
    async fn resolve_port(&self, target_type: TargetType, name: &str) -> Result<u16> {
        let port = match target_type {
            TargetType::Deployment => {
                let workload: appsv1::Deployment = self.fetch(target_type, name).await?;
                pod_port(
                    workload
                        .spec
                        .and_then(|s| s.template.spec)
                        .as_ref(),
                )
            }
            TargetType::Statefulset => {
                let workload: appsv1::StatefulSet = self.fetch(target_type, name).await?;
                pod_port(
                    workload
                        .spec
                        .and_then(|s| s.template.spec)
                        .as_ref(),
                )
            }
            TargetType::Pod => {
                let pod: corev1::Pod = self.fetch(target_type, name).await?;
                pod_port(pod.spec.as_ref())
            }
            TargetType::Service => {
                let svc: corev1::Service = self.fetch(target_type, name).await?;
                service_port(svc.spec.as_ref())
            }
        };
        port.ok_or_else(|| no_port(target_type, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod_spec(ports: &[i32]) -> corev1::PodSpec {
        corev1::PodSpec {
            containers: vec![corev1::Container {
                name: "app".to_string(),
                ports: Some(
                    ports
                        .iter()
                        .map(|&p| corev1::ContainerPort {
                            container_port: p,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn first_container_port_wins() {
        assert_eq!(pod_port(Some(&pod_spec(&[8080, 9090]))), Some(8080));
    }

    #[test]
    fn portless_pods_default_to_nothing() {
        assert_eq!(pod_port(Some(&pod_spec(&[]))), None);
        assert_eq!(pod_port(None), None);
    }

    #[test]
    fn first_service_port_wins() {
        let spec = corev1::ServiceSpec {
            ports: Some(vec![
                corev1::ServicePort {
                    port: 80,
                    ..Default::default()
                },
                corev1::ServicePort {
                    port: 443,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };
        assert_eq!(service_port(Some(&spec)), Some(80));
    }
}
