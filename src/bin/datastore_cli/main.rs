mod app;
mod context;
mod output;

use anyhow::Result;
use log::info;

fn main() -> Result<()> {
    let cli = app::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("datastore-cli starting");
    let result = app::run(cli);
    info!("datastore-cli done");

    result
}
