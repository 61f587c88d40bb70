//! Chatter membership server.
//!
//! Listens on a UDP welcome port, registers members by screen name, relays
//! chat to every member, and acknowledges leave requests. Runs until
//! Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Listen on 0.0.0.0:9000
//! cargo run --bin chatter-server -- 9000
//!
//! # Loopback only, small room
//! cargo run --bin chatter-server -- 9000 --bind-host 127.0.0.1 --max-members 8
//! ```

use clap::Parser;
use chatter_proto::transport::udp::UdpTransport;
use chatter_server::config::{ServerCliArgs, ServerConfig};
use chatter_server::dispatcher::Dispatcher;
use chatter_server::registry::MemberRegistry;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let bind_addr = config.bind_addr();
    tracing::info!(addr = %bind_addr, "starting chatter server");

    let transport = match UdpTransport::bind(bind_addr).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to open welcome port");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let dispatcher = Dispatcher::new(transport, MemberRegistry::with_capacity(config.max_members))
        .with_max_body_len(config.max_body_len)
        .with_member_timeout(config.member_timeout);
    if let Ok(addr) = dispatcher.local_addr() {
        tracing::info!(addr = %addr, "welcome port open");
    }

    dispatcher.run_until(shutdown_signal()).await;
    tracing::info!("chatter server stopped");
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
}
