use anyhow::Result;
use clap::Parser;
use dt_cli::cli::{Cli, Commands};
use dt_cli::config::Config;
use dt_cli::{logging, server};

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match cli.command {
		Commands::Serve(args) => server::run_server(Config::resolve(&args)?).await,
		Commands::Config(args) => {
			let config = Config::resolve(&args)?;
			println!("{}", serde_json::to_string_pretty(&config)?);
			Ok(())
		}
	}
}
