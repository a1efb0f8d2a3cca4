//! `dtmux`: hosts the DevTools session router behind WebSocket endpoints.
//!
//! - `/devtools/browser`, `/devtools/page/{target}`: client connections
//! - `/agent/{target}`: agent links that register targets and execute
//!   forwarded commands
//! - `/json/version`, `/json/list`: discovery

pub mod agent_link;
pub mod cli;
pub mod config;
pub mod logging;
pub mod server;
