use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dtmux")]
#[command(about = "DevTools protocol session multiplexer")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the router with its client and agent WebSocket endpoints
	Serve(ServeArgs),
	/// Print the effective configuration as JSON
	Config(ServeArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
	/// JSON configuration file
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Address to bind (overrides the config file)
	#[arg(long)]
	pub host: Option<String>,

	/// Port to bind (overrides the config file)
	#[arg(short, long)]
	pub port: Option<u16>,
}
