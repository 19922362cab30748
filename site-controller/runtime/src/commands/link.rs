use crate::SiteHandle;
use anyhow::Result;
use std::{path::PathBuf, time::Duration};
use vanlink_site_controller_core::{CreateOptions, Entity, Error, RemoveOptions};

#[derive(Debug, clap::Subcommand)]
pub enum LinkCommand {
    /// Redeem a connection token, linking this site to its issuer.
    Create {
        /// Token file to redeem.
        file: PathBuf,

        /// Name for the link. Generated if omitted.
        #[clap(long)]
        name: Option<String>,

        /// Routing cost over this link.
        #[clap(long, default_value = "1")]
        cost: u32,
    },

    /// Remove a link.
    Delete {
        name: String,

        /// Remove the link even if this site's own control traffic rides it.
        #[clap(long)]
        force: bool,
    },

    /// Report whether links are active.
    Status {
        /// A link name, or "all".
        #[clap(default_value = "all")]
        name: String,

        /// Keep checking for up to this many seconds before reporting.
        #[clap(long, default_value = "0")]
        wait: u64,
    },
}

impl LinkCommand {
    pub async fn run(self, site: &SiteHandle) -> Result<()> {
        match self {
            LinkCommand::Create { file, name, cost } => {
                let connector = site
                    .connectors()
                    .create(&file, CreateOptions { name, cost })
                    .await?;
                println!(
                    "Site configured to link to {}:{} (name={})",
                    connector.host, connector.port, connector.name
                );
                Ok(())
            }

            LinkCommand::Delete { name, force } => {
                site.connectors()
                    .remove(&name, RemoveOptions { force_current: force })
                    .await?;
                println!("Link '{name}' has been removed");
                Ok(())
            }

            LinkCommand::Status { name, wait } => status(site, &name, wait).await,
        }
    }
}

async fn status(site: &SiteHandle, name: &str, wait: u64) -> Result<()> {
    let names = if name == "all" {
        let connectors = site.connectors().list().await?;
        if connectors.is_empty() {
            match site.connectors().inspect("all").await {
                // A site that issued tokens simply has no redeemed links yet;
                // one that never issued any is told so the same way.
                Err(Error::NotFound {
                    entity: Entity::Connector | Entity::IssuedToken,
                    ..
                }) => {
                    println!("There are no links configured or active");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
                Ok(_) => {}
            }
            return Ok(());
        }
        connectors.into_iter().map(|c| c.name).collect()
    } else {
        // Surfaces NotFound before any waiting starts.
        site.connectors().inspect(name).await?;
        vec![name.to_string()]
    };

    let connected = if wait > 0 {
        site.status()
            .wait_until_connected(&names, Duration::from_secs(wait))
            .await
    } else {
        let mut connected = std::collections::HashMap::new();
        for name in &names {
            connected.insert(name.clone(), site.status().is_connected(name).await?);
        }
        connected
    };

    // Fold what we just observed into the persisted records.
    for name in &names {
        site.status().reconcile(name).await?;
    }

    for name in &names {
        let up = connected.get(name).copied().unwrap_or(false);
        println!("{}", status_line(name, up, wait));
    }
    Ok(())
}

fn status_line(name: &str, up: bool, wait: u64) -> String {
    if up {
        format!("Link {name} is active")
    } else if wait > 0 {
        format!("Link {name} did not become active within {wait}s")
    } else {
        format!("Link {name} is not yet active")
    }
}
