//! # FX Rate Client
//!
//! Sends one protocol command to `server_fx` and prints the JSON reply.
//! Exits non-zero when the service answers with an error.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use lib_common::core::{Command, FxServiceClient};

mod fx_logic;
use fx_logic::config::ClientArgs;

#[tokio::main]
async fn main() -> Result<()> {
    fx_logic::load_dotenv();
    let args = ClientArgs::parse();

    let addr = format!("{}:{}", args.host, args.port);
    let client = FxServiceClient::new(addr.clone(), Duration::from_millis(args.timeout_ms));
    let reply = client
        .send(&Command::parse(&args.command))
        .await
        .with_context(|| format!("request to {} failed", addr))?;

    println!("{}", serde_json::to_string_pretty(&reply)?);
    if !reply.is_success() {
        bail!("{}", reply.message.unwrap_or_default());
    }
    Ok(())
}
