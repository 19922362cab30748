use super::ProtocolArg;
use crate::SiteHandle;
use anyhow::Result;
use vanlink_site_controller_core::ServiceInterface;

#[derive(Debug, clap::Subcommand)]
pub enum ServiceCommand {
    /// Declare a service address on the network.
    Create {
        address: String,

        #[clap(long, value_enum, default_value_t = ProtocolArg::Tcp)]
        protocol: ProtocolArg,

        /// Port the service listens on.
        #[clap(long)]
        port: Option<u16>,
    },

    /// Remove a service address and every binding behind it.
    Delete { address: String },

    /// Attach a local workload behind a service address.
    Bind {
        address: String,

        /// deployment, statefulset, pod or service.
        target_type: String,

        target_name: String,

        #[clap(long, value_enum)]
        protocol: Option<ProtocolArg>,

        /// Port the workload serves on. Defaults to what the workload
        /// declares.
        #[clap(long)]
        port: Option<u16>,
    },

    /// Detach a workload from a service address.
    Unbind {
        /// deployment, statefulset, pod or service.
        target_type: String,

        target_name: String,

        address: String,

        /// Also remove the address if this was its last target.
        #[clap(long)]
        delete_if_no_targets: bool,
    },

    /// List service addresses and their targets.
    Status,
}

impl ServiceCommand {
    pub async fn run(self, site: &SiteHandle) -> Result<()> {
        match self {
            ServiceCommand::Create {
                address,
                protocol,
                port,
            } => {
                let interface = site
                    .services()
                    .create(ServiceInterface {
                        address,
                        protocol: protocol.into(),
                        port,
                        targets: Vec::new(),
                    })
                    .await?;
                println!(
                    "Service '{}' created ({})",
                    interface.address, interface.protocol
                );
                Ok(())
            }

            ServiceCommand::Delete { address } => {
                site.services().remove(&address).await?;
                println!("Service '{address}' removed");
                Ok(())
            }

            ServiceCommand::Bind {
                address,
                target_type,
                target_name,
                protocol,
                port,
            } => {
                site.services()
                    .bind(
                        &address,
                        &target_type,
                        &target_name,
                        protocol.map(Into::into),
                        port,
                    )
                    .await?;
                println!("Bound {target_type}/{target_name} to '{address}'");
                Ok(())
            }

            ServiceCommand::Unbind {
                target_type,
                target_name,
                address,
                delete_if_no_targets,
            } => {
                site.services()
                    .unbind(&target_type, &target_name, &address, delete_if_no_targets)
                    .await?;
                println!("Unbound {target_type}/{target_name} from '{address}'");
                Ok(())
            }

            ServiceCommand::Status => {
                let interfaces = site.services().list().await?;
                if interfaces.is_empty() {
                    println!("No services defined");
                    return Ok(());
                }
                for interface in interfaces {
                    let port = interface
                        .port
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{} ({} port {})",
                        interface.address, interface.protocol, port
                    );
                    for target in &interface.targets {
                        println!(
                            "  {}/{} => port {}",
                            target.target_type, target.name, target.port
                        );
                    }
                }
                Ok(())
            }
        }
    }
}
