use crate::{
    connector::{Connector, STATE_ANNOTATION},
    error::{Entity, Error, Result},
    store::CredentialStore,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::{self, Instant};

/// One link as reported by the router's management interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub name: String,
    pub direction: LinkDirection,
    pub up: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    Incoming,
    Outgoing,
}

/// Live source of truth for link state. A credential object only proves a
/// token was redeemed; whether the link is established is only ever read
/// from here.
#[async_trait::async_trait]
pub trait RouterManagement: Send + Sync + 'static {
    async fn active_links(&self) -> anyhow::Result<Vec<LinkStatus>>;
}

/// Polls `condition` every `interval` until it holds or `max_wait` elapses;
/// returns whether it held. Dropping the future cancels the wait and no
/// timer outlives it.
pub async fn poll_until<F, Fut>(mut condition: F, interval: Duration, max_wait: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + max_wait;
    loop {
        if condition().await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        time::sleep_until(deadline.min(now + interval)).await;
        if Instant::now() >= deadline {
            return false;
        }
    }
}

/// Answers "is this link up" from live router state and folds the answer
/// into connector records.
#[derive(Clone)]
pub struct StatusReconciler {
    store: Arc<dyn CredentialStore>,
    mgmt: Arc<dyn RouterManagement>,
    tick: Duration,
}

impl StatusReconciler {
    const DEFAULT_TICK: Duration = Duration::from_secs(1);
    const UPDATE_RETRIES: usize = 3;

    pub fn new(store: Arc<dyn CredentialStore>, mgmt: Arc<dyn RouterManagement>) -> Self {
        Self {
            store,
            mgmt,
            tick: Self::DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Point-in-time check against the router; never cached.
    pub async fn is_connected(&self, name: &str) -> Result<bool> {
        let links = self.mgmt.active_links().await.map_err(Error::Store)?;
        Ok(links.iter().any(|l| l.name == name && l.up))
    }

    /// Polls once per tick for up to `max_wait`, short-circuiting once every
    /// requested connector is up. A failed management query counts as "not
    /// yet" for that tick only.
    ///
    /// Each entry in the returned map records whether the link was observed
    /// up at any tick during the wait. An observation is not revisited: a
    /// link that came up and dropped again before the wait expired still
    /// reads `true`, consistent with the short-circuit, which ends the wait
    /// the moment every name has been seen up. Callers needing the current
    /// answer use [`StatusReconciler::is_connected`].
    pub async fn wait_until_connected(
        &self,
        names: &[String],
        max_wait: Duration,
    ) -> HashMap<String, bool> {
        let connected: HashMap<String, bool> =
            names.iter().map(|n| (n.clone(), false)).collect();
        if connected.is_empty() {
            return connected;
        }

        let connected = Arc::new(parking_lot::Mutex::new(connected));
        let all_up = {
            let connected = connected.clone();
            let mgmt = self.mgmt.clone();
            move || {
                let connected = connected.clone();
                let mgmt = mgmt.clone();
                async move {
                    match mgmt.active_links().await {
                        Ok(links) => {
                            let mut connected = connected.lock();
                            for (name, up) in connected.iter_mut() {
                                if links.iter().any(|l| &l.name == name && l.up) {
                                    *up = true;
                                }
                            }
                            connected.values().all(|up| *up)
                        }
                        Err(error) => {
                            tracing::debug!(%error, "link status query failed; retrying next tick");
                            false
                        }
                    }
                }
            }
        };
        poll_until(all_up, self.tick, max_wait).await;

        let result = connected.lock().clone();
        result
    }

    /// Bounded synchronous form of the wait: `Err(Timeout)` unless every
    /// name connected within `max_wait`.
    pub async fn require_connected(&self, names: &[String], max_wait: Duration) -> Result<()> {
        let connected = self.wait_until_connected(names, max_wait).await;
        if connected.values().all(|up| *up) {
            Ok(())
        } else {
            Err(Error::Timeout(max_wait))
        }
    }

    /// Folds live link state into the record's state annotation. This is the
    /// only writer of connector state; conflicting writes are retried from a
    /// fresh read.
    pub async fn reconcile(&self, name: &str) -> Result<Connector> {
        for _ in 0..Self::UPDATE_RETRIES {
            let cred = self.store.get(name).await.map_err(|e| match e {
                Error::NotFound { .. } => Error::NotFound {
                    entity: Entity::Connector,
                    name: name.to_string(),
                },
                e => e,
            })?;
            let mut connector = Connector::from_credential(&cred)?;
            let links = self.mgmt.active_links().await.map_err(Error::Store)?;
            let link = links.iter().find(|l| l.name == name);
            let next = connector.state.step(link);
            if next == connector.state {
                return Ok(connector);
            }

            let mut cred = cred;
            cred.annotations
                .insert(STATE_ANNOTATION.to_string(), next.to_string());
            match self.store.update(cred).await {
                Ok(_) => {
                    tracing::debug!(%name, from = %connector.state, to = %next, "connector state");
                    connector.state = next;
                    return Ok(connector);
                }
                Err(Error::Conflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Conflict {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        connector::{ConnectorManager, ConnectorState, CreateOptions},
        store::memory::MemoryStore,
        token,
    };
    use parking_lot::Mutex;

    /// Router fake whose link table tests mutate between ticks.
    #[derive(Default)]
    struct FakeRouter {
        links: Mutex<Vec<LinkStatus>>,
        failures: Mutex<usize>,
    }

    impl FakeRouter {
        fn set_link(&self, name: &str, up: bool, error: Option<&str>) {
            let mut links = self.links.lock();
            links.retain(|l| l.name != name);
            links.push(LinkStatus {
                name: name.to_string(),
                direction: LinkDirection::Outgoing,
                up,
                error: error.map(str::to_string),
            });
        }

        fn clear(&self, name: &str) {
            self.links.lock().retain(|l| l.name != name);
        }

        fn fail_next(&self, n: usize) {
            *self.failures.lock() = n;
        }
    }

    #[async_trait::async_trait]
    impl RouterManagement for FakeRouter {
        async fn active_links(&self) -> anyhow::Result<Vec<LinkStatus>> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("management endpoint unavailable");
            }
            Ok(self.links.lock().clone())
        }
    }

    async fn connector_fixture(
        router: Arc<FakeRouter>,
    ) -> (Arc<MemoryStore>, StatusReconciler, Connector) {
        let store = Arc::new(MemoryStore::new());
        let reconciler = StatusReconciler::new(store.clone(), router);
        let manager = ConnectorManager::new(store.clone(), reconciler.clone());
        let token = crate::token::ConnectionToken {
            name: String::new(),
            link_class: token::LinkClass::InterRouter,
            host: "router.test".to_string(),
            port: 55671,
            tls: token::test_bundle(),
        };
        let connector = manager
            .create_from_token(&token, CreateOptions::default())
            .await
            .unwrap();
        (store, reconciler, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_respects_the_bound() {
        let start = Instant::now();
        let held = poll_until(
            || futures::future::ready(false),
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .await;
        assert!(!held);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(6), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_short_circuits() {
        let start = Instant::now();
        let mut remaining = 3;
        let held = poll_until(
            move || {
                remaining -= 1;
                futures::future::ready(remaining == 0)
            },
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await;
        assert!(held);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_within_the_bound_with_partial_results() {
        let router = Arc::new(FakeRouter::default());
        router.set_link("conn1", true, None);
        let (_store, reconciler, _) = connector_fixture(router).await;

        let start = Instant::now();
        let names = vec!["conn1".to_string(), "conn2".to_string()];
        let connected = reconciler
            .wait_until_connected(&names, Duration::from_secs(3))
            .await;
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(connected["conn1"], true);
        assert_eq!(connected["conn2"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_short_circuits_once_everything_is_up() {
        let router = Arc::new(FakeRouter::default());
        let (_store, reconciler, connector) = connector_fixture(router.clone()).await;
        router.set_link(&connector.name, true, None);

        let start = Instant::now();
        let connected = reconciler
            .wait_until_connected(&[connector.name.clone()], Duration::from_secs(600))
            .await;
        assert_eq!(connected[&connector.name], true);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_tolerates_query_errors_per_tick() {
        let router = Arc::new(FakeRouter::default());
        let (_store, reconciler, connector) = connector_fixture(router.clone()).await;
        router.set_link(&connector.name, true, None);
        router.fail_next(2);

        let connected = reconciler
            .wait_until_connected(&[connector.name.clone()], Duration::from_secs(30))
            .await;
        assert_eq!(connected[&connector.name], true);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_keeps_a_link_once_it_was_observed_up() {
        let router = Arc::new(FakeRouter::default());
        let (_store, reconciler, connector) = connector_fixture(router.clone()).await;
        router.set_link(&connector.name, true, None);

        // A second name that never connects keeps the wait running past the
        // point where the first link drops again.
        let dropper = router.clone();
        let name = connector.name.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(2)).await;
            dropper.clear(&name);
        });

        let names = vec![connector.name.clone(), "conn9".to_string()];
        let connected = reconciler
            .wait_until_connected(&names, Duration::from_secs(5))
            .await;
        assert_eq!(connected[&connector.name], true);
        assert_eq!(connected["conn9"], false);
    }

    #[tokio::test]
    async fn wait_with_no_names_returns_immediately() {
        let router = Arc::new(FakeRouter::default());
        let store = Arc::new(MemoryStore::new());
        let reconciler = StatusReconciler::new(store, router);
        let connected = reconciler
            .wait_until_connected(&[], Duration::from_secs(600))
            .await;
        assert!(connected.is_empty());
    }

    #[tokio::test]
    async fn require_connected_reports_timeout_distinctly() {
        let router = Arc::new(FakeRouter::default());
        let (_store, reconciler, connector) = connector_fixture(router).await;
        let err = reconciler
            .require_connected(&[connector.name.clone()], Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "{err}");
    }

    #[tokio::test]
    async fn reconcile_walks_the_lifecycle() {
        let router = Arc::new(FakeRouter::default());
        let (_store, reconciler, connector) = connector_fixture(router.clone()).await;
        let name = connector.name.clone();
        assert_eq!(connector.state, ConnectorState::Created);

        // The dial attempt is observed before any link is reported.
        let c = reconciler.reconcile(&name).await.unwrap();
        assert_eq!(c.state, ConnectorState::Connecting);

        router.set_link(&name, true, None);
        let c = reconciler.reconcile(&name).await.unwrap();
        assert_eq!(c.state, ConnectorState::Connected);

        // A drop is observed as Disconnected first, never Connecting.
        router.clear(&name);
        let c = reconciler.reconcile(&name).await.unwrap();
        assert_eq!(c.state, ConnectorState::Disconnected);

        router.set_link(&name, false, None);
        let c = reconciler.reconcile(&name).await.unwrap();
        assert_eq!(c.state, ConnectorState::Connecting);

        router.set_link(&name, false, Some("tls handshake failed"));
        let c = reconciler.reconcile(&name).await.unwrap();
        assert_eq!(c.state, ConnectorState::Failed);

        router.set_link(&name, true, None);
        let c = reconciler.reconcile(&name).await.unwrap();
        assert_eq!(c.state, ConnectorState::Connected);
    }

    #[tokio::test]
    async fn reconcile_unknown_connector_is_not_found() {
        let router = Arc::new(FakeRouter::default());
        let store = Arc::new(MemoryStore::new());
        let reconciler = StatusReconciler::new(store, router);
        let err = reconciler.reconcile("conn9").await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: Entity::Connector,
                ..
            }
        ));
    }
}
