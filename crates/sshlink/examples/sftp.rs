//! List the remote home directory over SFTP

use anyhow::Result;
use sshlink::{ConnectConfig, SshContext};
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = std::env::var("SSHLINK_HOST").unwrap_or_else(|_| "example.com".to_string());
    let config = ConnectConfig::from_ssh_config(host)?;

    let ssh = SshContext::connect(&config).await?;
    let sftp = ssh.open_sftp().await?;
    let entries = tokio::task::spawn_blocking(move || sftp.readdir(Path::new("."))).await??;
    for (path, stat) in entries {
        println!("{:>10} {}", stat.size.unwrap_or(0), path.display());
    }

    ssh.close()?;
    Ok(())
}
