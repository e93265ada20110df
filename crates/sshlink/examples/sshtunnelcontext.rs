//! Reach a host behind a jump host with `SshTunnelContext`
//!
//! ```text
//! SSHLINK_JUMP=bastion.example.com SSHLINK_HOST=db.internal cargo run --example sshtunnelcontext
//! ```

use anyhow::Result;
use sshlink::{ConnectConfig, SshTunnelContext};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let jump = std::env::var("SSHLINK_JUMP").unwrap_or_else(|_| "bastion.example.com".to_string());
    let target = std::env::var("SSHLINK_HOST").unwrap_or_else(|_| "example.com".to_string());

    let jump_config = ConnectConfig::from_ssh_config(jump)?;
    let target_config = ConnectConfig::from_ssh_config(target)?;

    let ssh = SshTunnelContext::connect(&jump_config, &target_config).await?;
    if let Some(tunnel) = ssh.tunnel() {
        println!("tunnel listening on {}", tunnel.local_addr());
    }
    let result = ssh.execute("hostname").await?;
    println!("{}", result.output.trim_end());

    ssh.close()?;
    Ok(())
}
