//! Run commands through the connect-run-disconnect helper

use anyhow::Result;
use sshlink::{ssh_connect, ConnectConfig, SshConnect};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = std::env::var("SSHLINK_HOST").unwrap_or_else(|_| "example.com".to_string());

    let config = ConnectConfig::from_ssh_config(host.as_str())?;
    let listing = ssh_connect(&config, |ssh| {
        Box::pin(async move { ssh.execute("ls -l").await })
    })
    .await?;
    println!("{}", listing.output);

    let explicit = ConnectConfig::from_properties([
        ("hostname", host.as_str()),
        ("username", "user"),
        ("password", "password"),
        ("use_ssh_config", "false"),
    ])?;
    let status = SshConnect::new(explicit)
        .run(|ssh| Box::pin(async move { ssh.execute_realtime("uptime").await }))
        .await?;
    println!("exit status: {}", status);
    Ok(())
}
