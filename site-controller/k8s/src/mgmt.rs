use anyhow::{bail, Context, Result};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use vanlink_site_controller_core::{LinkStatus, RouterManagement};

const LINKS_PATH: &str = "/v1/links";

/// Queries the router's management endpoint for live link state.
#[derive(Clone)]
pub struct RouterMgmtClient {
    client: Client<HttpConnector, http_body_util::Empty<Bytes>>,
    endpoint: http::Uri,
}

impl RouterMgmtClient {
    pub fn new(endpoint: http::Uri) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self { client, endpoint }
    }

    fn links_uri(&self) -> Result<http::Uri> {
        let mut parts = self.endpoint.clone().into_parts();
        parts.path_and_query = Some(http::uri::PathAndQuery::from_static(LINKS_PATH));
        http::Uri::from_parts(parts).context("building links uri")
    }
}

#[async_trait::async_trait]
impl RouterManagement for RouterMgmtClient {
    async fn active_links(&self) -> Result<Vec<LinkStatus>> {
        let uri = self.links_uri()?;
        let rsp = self
            .client
            .get(uri.clone())
            .await
            .with_context(|| format!("querying {uri}"))?;
        let status = rsp.status();
        let body = rsp
            .into_body()
            .collect()
            .await
            .context("reading links response")?
            .to_bytes();
        if !status.is_success() {
            bail!("router management returned {status}");
        }
        serde_json::from_slice(&body).context("decoding links response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_uri_replaces_the_path() {
        let client = RouterMgmtClient::new("http://vanlink-router.west:9090".parse().unwrap());
        assert_eq!(
            client.links_uri().unwrap().to_string(),
            "http://vanlink-router.west:9090/v1/links"
        );
    }

    #[test]
    fn link_state_decodes_from_the_management_document() {
        let doc = r#"[
            {"name": "conn1", "direction": "outgoing", "up": true, "error": null},
            {"name": "conn2", "direction": "outgoing", "up": false, "error": "connection refused"}
        ]"#;
        let links: Vec<LinkStatus> = serde_json::from_str(doc).unwrap();
        assert!(links[0].up);
        assert_eq!(links[1].error.as_deref(), Some("connection refused"));
    }
}
