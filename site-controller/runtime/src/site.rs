use std::sync::Arc;
use vanlink_site_controller_core::{
    ConnectorManager, CredentialStore, RouterManagement, ServiceRegistry, StatusReconciler,
    TokenIssuer, WorkloadLookup,
};
use vanlink_site_controller_k8s::{RouterMgmtClient, SecretStore, WorkloadPorts};

/// Everything a command needs to act on one site.
pub struct SiteHandle {
    store: Arc<dyn CredentialStore>,
    status: StatusReconciler,
    connectors: ConnectorManager,
    services: ServiceRegistry,
    issuer: TokenIssuer,
}

impl SiteHandle {
    pub fn new(client: kubert::client::Client, namespace: &str, mgmt_url: http::Uri) -> Self {
        let store = Arc::new(SecretStore::new(client.clone(), namespace));
        let mgmt = Arc::new(RouterMgmtClient::new(mgmt_url));
        let lookup = Arc::new(WorkloadPorts::new(client, namespace));
        Self::with_parts(store, mgmt, lookup)
    }

    /// Assembles a handle from arbitrary backends; the tests below exercise
    /// commands against the in-memory store this way.
    pub fn with_parts(
        store: Arc<dyn CredentialStore>,
        mgmt: Arc<dyn RouterManagement>,
        lookup: Arc<dyn WorkloadLookup>,
    ) -> Self {
        let status = StatusReconciler::new(store.clone(), mgmt);
        let connectors = ConnectorManager::new(store.clone(), status.clone());
        let services = ServiceRegistry::new(store.clone(), lookup);
        let issuer = TokenIssuer::new(store.clone());
        Self {
            store,
            status,
            connectors,
            services,
            issuer,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn status(&self) -> &StatusReconciler {
        &self.status
    }

    pub fn connectors(&self) -> &ConnectorManager {
        &self.connectors
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }
}
