//! End-to-end exercise of the site workflow against the in-memory store:
//! issue a token on one side, redeem it on the other, watch the connector
//! move through its lifecycle, and expose a service behind the link.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use vanlink_site_controller_core::{
    store::memory::MemoryStore,
    token::{
        CA_DATA_KEY, CERT_DATA_KEY, EDGE_HOST_ANNOTATION, EDGE_PORT_ANNOTATION,
        INTER_ROUTER_HOST_ANNOTATION, INTER_ROUTER_PORT_ANNOTATION, KEY_DATA_KEY,
    },
    ConnectionToken, ConnectorManager, ConnectorState, CreateOptions, Credential, CredentialStore,
    Entity, Error, LinkClass, LinkDirection, LinkStatus, Protocol, RemoveOptions, RouterManagement,
    ServiceInterface, ServiceRegistry, StatusReconciler, TargetType, TokenIssuer, WorkloadLookup,
    SITE_CA_RECORD, SITE_RECORD,
};

/// Scriptable stand-in for the router management endpoint.
#[derive(Default)]
struct FakeRouter {
    links: Mutex<HashMap<String, LinkStatus>>,
}

impl FakeRouter {
    fn set_link(&self, name: &str, up: bool, error: Option<&str>) {
        self.links.lock().insert(
            name.to_string(),
            LinkStatus {
                name: name.to_string(),
                direction: LinkDirection::Outgoing,
                up,
                error: error.map(|e| e.to_string()),
            },
        );
    }
}

#[async_trait::async_trait]
impl RouterManagement for FakeRouter {
    async fn active_links(&self) -> anyhow::Result<Vec<LinkStatus>> {
        Ok(self.links.lock().values().cloned().collect())
    }
}

struct FakeWorkloads;

#[async_trait::async_trait]
impl WorkloadLookup for FakeWorkloads {
    async fn resolve_port(&self, target_type: TargetType, name: &str) -> Result<u16, Error> {
        match (target_type, name) {
            (TargetType::Deployment, "backend") => Ok(8080),
            _ => Err(Error::NotFound {
                entity: Entity::Target,
                name: format!("{target_type}/{name}"),
            }),
        }
    }
}

fn tls_pem() -> (String, String) {
    let key_pair = rcgen::KeyPair::generate().expect("key pair");
    let cert = rcgen::CertificateParams::new(vec!["vanlink-router.test".to_string()])
        .expect("cert params")
        .self_signed(&key_pair)
        .expect("self-signed cert");
    (cert.pem(), key_pair.serialize_pem())
}

async fn deploy_site(store: &dyn CredentialStore) {
    let mut site = Credential::new(SITE_RECORD, "site");
    for (key, value) in [
        (EDGE_HOST_ANNOTATION, "edge.issuing.test"),
        (EDGE_PORT_ANNOTATION, "45671"),
        (INTER_ROUTER_HOST_ANNOTATION, "router.issuing.test"),
        (INTER_ROUTER_PORT_ANNOTATION, "55671"),
    ] {
        site.annotations.insert(key.to_string(), value.to_string());
    }
    store.create(site).await.expect("site record");

    let (cert, key) = tls_pem();
    let mut ca = Credential::new(SITE_CA_RECORD, "site-ca");
    ca.data.insert(CERT_DATA_KEY.to_string(), cert.clone().into_bytes());
    ca.data.insert(KEY_DATA_KEY.to_string(), key.into_bytes());
    ca.data.insert(CA_DATA_KEY.to_string(), cert.into_bytes());
    store.create(ca).await.expect("site ca record");
}

struct Site {
    store: Arc<MemoryStore>,
    router: Arc<FakeRouter>,
    status: StatusReconciler,
    connectors: ConnectorManager,
    services: ServiceRegistry,
}

fn site() -> Site {
    let store = Arc::new(MemoryStore::new());
    let router = Arc::new(FakeRouter::default());
    let status = StatusReconciler::new(store.clone(), router.clone());
    let connectors = ConnectorManager::new(store.clone(), status.clone());
    let services = ServiceRegistry::new(store.clone(), Arc::new(FakeWorkloads));
    Site {
        store,
        router,
        status,
        connectors,
        services,
    }
}

#[tokio::test]
async fn token_issued_on_one_site_links_another() {
    let issuing = site();
    deploy_site(&*issuing.store).await;
    let issuer = TokenIssuer::new(issuing.store.clone());
    let token = issuer
        .issue(LinkClass::InterRouter, None)
        .await
        .expect("issue");
    issuer.record(&token).await.expect("record");
    assert_eq!(token.host, "router.issuing.test");
    assert_eq!(token.port, 55671);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("token.yaml");
    token.write_file(&path).expect("write token");

    let joining = site();
    deploy_site(&*joining.store).await;
    let connector = joining
        .connectors
        .create(&path, CreateOptions::default())
        .await
        .expect("redeem");
    assert_eq!(connector.name, "conn1");
    assert_eq!(connector.state, ConnectorState::Created);
    assert_eq!(connector.host, "router.issuing.test");

    // The router has not dialed yet.
    let inspected = joining.connectors.inspect("conn1").await.expect("inspect");
    assert!(!inspected.connected);

    joining.router.set_link("conn1", true, None);
    let inspected = joining.connectors.inspect("conn1").await.expect("inspect");
    assert!(inspected.connected);
}

#[tokio::test(start_paused = true)]
async fn wait_for_link_is_bounded_and_short_circuits() {
    let joining = site();
    deploy_site(&*joining.store).await;

    let token = redeemable_token();
    joining
        .connectors
        .create_from_token(&token, CreateOptions::default())
        .await
        .expect("redeem");

    // Never comes up; the wait expires at its bound.
    let status = joining.status.clone().with_tick(Duration::from_secs(1));
    let connected = status
        .wait_until_connected(&["conn1".to_string()], Duration::from_secs(5))
        .await;
    assert_eq!(connected.get("conn1"), Some(&false));

    // Comes up before the bound; the wait returns early.
    joining.router.set_link("conn1", true, None);
    let start = tokio::time::Instant::now();
    let connected = status
        .wait_until_connected(&["conn1".to_string()], Duration::from_secs(120))
        .await;
    assert_eq!(connected.get("conn1"), Some(&true));
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn reconcile_tracks_the_router() {
    let joining = site();
    deploy_site(&*joining.store).await;
    joining
        .connectors
        .create_from_token(&redeemable_token(), CreateOptions::default())
        .await
        .expect("redeem");

    let reconciled = joining.status.reconcile("conn1").await.expect("reconcile");
    assert_eq!(reconciled.state, ConnectorState::Connecting);

    joining.router.set_link("conn1", true, None);
    let reconciled = joining.status.reconcile("conn1").await.expect("reconcile");
    assert_eq!(reconciled.state, ConnectorState::Connected);

    joining.router.set_link("conn1", false, None);
    let reconciled = joining.status.reconcile("conn1").await.expect("reconcile");
    assert_eq!(reconciled.state, ConnectorState::Disconnected);

    joining
        .router
        .set_link("conn1", false, Some("connection refused"));
    let reconciled = joining.status.reconcile("conn1").await.expect("reconcile");
    assert_eq!(reconciled.state, ConnectorState::Failed);
}

#[tokio::test]
async fn connector_names_survive_removal_and_reuse() {
    let joining = site();
    deploy_site(&*joining.store).await;
    let token = redeemable_token();

    for expected in ["conn1", "conn2", "conn3"] {
        let connector = joining
            .connectors
            .create_from_token(&token, CreateOptions::default())
            .await
            .expect("redeem");
        assert_eq!(connector.name, expected);
    }

    joining
        .connectors
        .remove("conn2", RemoveOptions::default())
        .await
        .expect("remove");
    let connector = joining
        .connectors
        .create_from_token(&token, CreateOptions::default())
        .await
        .expect("redeem");
    assert_eq!(connector.name, "conn2");
}

#[tokio::test]
async fn service_exposed_behind_the_link() {
    let joining = site();
    deploy_site(&*joining.store).await;

    joining
        .services
        .create(ServiceInterface {
            address: "backend".to_string(),
            protocol: Protocol::Http,
            port: Some(8080),
            targets: Vec::new(),
        })
        .await
        .expect("create service");
    let interface = joining
        .services
        .bind("backend", "deployment", "backend", None, None)
        .await
        .expect("bind");
    assert_eq!(interface.targets.len(), 1);
    assert_eq!(interface.targets[0].port, 8080);

    joining
        .services
        .unbind("deployment", "backend", "backend", true)
        .await
        .expect("unbind");
    let err = joining.services.inspect("backend").await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
}

fn redeemable_token() -> ConnectionToken {
    let (cert, key) = tls_pem();
    ConnectionToken {
        name: "issued".to_string(),
        link_class: LinkClass::InterRouter,
        host: "router.issuing.test".to_string(),
        port: 55671,
        tls: vanlink_site_controller_core::TlsBundle {
            cert: cert.clone(),
            key,
            ca: cert,
        },
    }
}
