use super::LinkClassArg;
use crate::SiteHandle;
use anyhow::Result;
use std::path::PathBuf;

#[derive(Debug, clap::Subcommand)]
pub enum TokenCommand {
    /// Issue a token and write it to a file for another site to redeem.
    Create {
        /// Where to write the token.
        file: PathBuf,

        /// Which router listener the token targets.
        #[clap(long, value_enum, default_value_t = LinkClassArg::InterRouter)]
        link_class: LinkClassArg,

        /// Name under which the issuance is recorded. Generated if omitted.
        #[clap(long)]
        name: Option<String>,
    },
}

impl TokenCommand {
    pub async fn run(self, site: &SiteHandle) -> Result<()> {
        match self {
            TokenCommand::Create {
                file,
                link_class,
                name,
            } => {
                let token = site.issuer().issue(link_class.into(), name).await?;
                site.issuer().record(&token).await?;
                token.write_file(&file)?;
                println!("Token written to {}", file.display());
                Ok(())
            }
        }
    }
}
