//! Connect with `Ssh` directly and run a command
//!
//! The first run resolves the host from `~/.ssh/config`; the second passes
//! credentials explicitly and skips the config file.
//!
//! ```text
//! SSHLINK_HOST=example.com RUST_LOG=sshlink=debug cargo run --example ssh
//! ```

use anyhow::Result;
use sshlink::{ConnectConfig, Ssh, SshError};
use tracing_subscriber::EnvFilter;

fn hostname() -> String {
    std::env::var("SSHLINK_HOST").unwrap_or_else(|_| "example.com".to_string())
}

async fn with_ssh_config() -> Result<()> {
    let config = ConnectConfig::from_ssh_config(hostname())?;
    let mut ssh = Ssh::new();
    ssh.connect(&config).await?;

    let result = ssh.execute("ls -l").await?;
    println!("{}", result.output);
    println!("exit status: {}", result.exit_status);
    Ok(())
}

async fn with_credentials() -> Result<()> {
    let config = ConnectConfig::builder(hostname())
        .use_ssh_config(false)
        .username("user")
        .password("password")
        .build()?;

    let mut ssh = Ssh::new();
    match ssh.connect(&config).await {
        Ok(()) => {
            let result = ssh.execute("ls -l").await?;
            println!("{}", result.output);
        }
        Err(err @ SshError::Connection(_)) => println!("SSH error: {}", err),
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    with_ssh_config().await?;
    with_credentials().await?;
    Ok(())
}
