use clap::Parser;
use refsync_server::cli::{Cli, Commands, EsiArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // JSON stdout logs unless REFSYNC_LOG_FORMAT=text.
    refsync_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    let cmd = cli.command.unwrap_or(Commands::Run {
        esi: EsiArgs::default(),
    });

    match cmd {
        Commands::Run { esi } => refsync_server::app::run(&cli.data_dir, &esi).await?,
        Commands::Tick { esi } => refsync_server::app::tick(&cli.data_dir, &esi).await?,
        Commands::Status => {
            let rows = refsync_server::app::status(&cli.data_dir).await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::History { kind, key } => {
            let versions = refsync_server::app::history(&cli.data_dir, &kind, &key).await?;
            println!("{}", serde_json::to_string_pretty(&versions)?);
        }
    }
    Ok(())
}
