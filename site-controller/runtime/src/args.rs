use crate::{commands, SiteHandle};
use anyhow::Result;
use clap::Parser;

#[derive(Debug, Parser)]
#[clap(name = "vanlink", version, about = "Manage a service network site")]
pub struct Args {
    #[clap(long, default_value = "vanlink=info,warn", env = "VANLINK_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain", env = "VANLINK_LOG_FORMAT")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    /// Namespace holding the site's records.
    #[clap(long, short = 'n', default_value = "default", env = "VANLINK_NAMESPACE")]
    namespace: String,

    /// Management endpoint of the site router. Defaults to the in-cluster
    /// service address.
    #[clap(long, env = "VANLINK_ROUTER_MGMT_URL")]
    router_mgmt_url: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Issue connection tokens for other sites to redeem.
    #[clap(subcommand)]
    Token(commands::token::TokenCommand),

    /// Manage links to other sites.
    #[clap(subcommand)]
    Link(commands::link::LinkCommand),

    /// Expose workloads across the network.
    #[clap(subcommand)]
    Service(commands::service::ServiceCommand),
}

impl Args {
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Args {
            log_level,
            log_format,
            client,
            namespace,
            router_mgmt_url,
            command,
        } = self;
        log_format.try_init(log_level)?;

        let client = client.try_client().await?;
        let mgmt_url = router_mgmt_url
            .unwrap_or_else(|| format!("http://vanlink-router.{namespace}:9090"))
            .parse::<http::Uri>()?;
        let site = SiteHandle::new(client, &namespace, mgmt_url);

        match command {
            Command::Token(cmd) => cmd.run(&site).await,
            Command::Link(cmd) => cmd.run(&site).await,
            Command::Service(cmd) => cmd.run(&site).await,
        }
    }
}
