//! Scoped connection with `SshContext`

use anyhow::Result;
use sshlink::{ConnectConfig, SshContext};
use tokio::fs::File;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = std::env::var("SSHLINK_HOST").unwrap_or_else(|_| "example.com".to_string());
    let config = ConnectConfig::from_ssh_config(host)?;

    let ssh = SshContext::connect(&config).await?;
    let result = ssh.execute("ls -l").await?;
    println!("{}", result.output);

    let mut file = File::create("listing.txt").await?;
    ssh.execute_file("ls -la /etc", &mut file).await?;

    ssh.close()?;
    Ok(())
}
