use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use datastore::data::ListQuery;
use datastore::KStatus;

use crate::context::Context;
use crate::output;

#[derive(Parser)]
#[command(name = "datastore-cli")]
#[command(about = "Inspect and act on items through the datastore client", long_about = None)]
pub struct Cli {
    /// Verbosity, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend URL, overriding the config
    #[arg(short, long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one item
    Get {
        type_tag: String,
        id: String,
        #[arg(long, default_value = "PUBLISHED")]
        status: KStatus,
    },

    /// Fetch a list of items
    List {
        type_tag: String,
        #[arg(long, default_value = "ALL_BAR_TRASH")]
        status: KStatus,
        /// Search query
        #[arg(long)]
        q: Option<String>,
    },

    /// Publish the current draft of an item
    Publish { type_tag: String, id: String },

    /// Delete an item
    Delete { type_tag: String, id: String },
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn run(cli: Cli) -> Result<()> {
    let type_tag = match &cli.command {
        Commands::Get { type_tag, .. }
        | Commands::List { type_tag, .. }
        | Commands::Publish { type_tag, .. }
        | Commands::Delete { type_tag, .. } => type_tag.clone(),
    };
    let context = Context::new(cli.config.as_deref(), cli.server.as_deref(), &type_tag)?;

    match cli.command {
        Commands::Get { type_tag, id, status } => {
            let item = context.block_on(async {
                let handle = context.crud().get_data_item(&type_tag, &id, status, false)?;
                Ok::<_, anyhow::Error>(handle.wait().await?)
            })?;
            output::print_json(&item)?;
        }
        Commands::List { type_tag, status, q } => {
            let query = match q {
                Some(q) => ListQuery::new().q(q),
                None => ListQuery::new(),
            };
            let list = context.block_on(async {
                let handle = context.crud().list(&type_tag, status, &query)?;
                Ok::<_, anyhow::Error>(handle.wait().await?)
            })?;
            output::print_list(&list)?;
        }
        Commands::Publish { type_tag, id } => {
            let outcome = context.block_on(async {
                context.crud().get_data_item(&type_tag, &id, KStatus::Draft, false)?.wait().await?;
                Ok::<_, anyhow::Error>(context.crud().publish(&type_tag, &id, None).await?)
            })?;
            output::print_outcome("publish", &type_tag, &id, &outcome)?;
        }
        Commands::Delete { type_tag, id } => {
            let outcome = context.block_on(async { context.crud().delete(&type_tag, &id).await })?;
            output::print_outcome("delete", &type_tag, &id, &outcome)?;
        }
    }

    Ok(())
}
