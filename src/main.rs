//! Feedfleet shard process

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedfleet::{
    config::Args,
    db::MongoClient,
    directory::{LogNotifier, StaticDirectory},
    fabric::{spawn_listeners, NatsClient, NatsTransport, Subjects},
    sync::SyncContext,
    ShardNode,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("feedfleet={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let identity = args.identity();

    info!("======================================");
    info!("  Feedfleet shard");
    info!("======================================");
    info!("Instance ID: {}", args.instance_id);
    info!("Identity: {}", identity);
    info!("NATS: {}", args.nats.nats_url);
    info!("MongoDB: {} ({})", args.mongodb_uri, args.mongodb_db);
    info!("Subjects: {}.*", args.subject_prefix);
    info!(
        "Failure limit: {}",
        match args.fail_limit {
            0 => "disabled".to_string(),
            n => n.to_string(),
        }
    );
    info!("======================================");

    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            client
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };
    let stores = mongo.stores().await?;

    let nats = match NatsClient::new(&args.nats, &format!("feedfleet-{}", args.instance_id)).await {
        Ok(client) => {
            info!("NATS connected successfully");
            client
        }
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let subjects = Subjects::new(&args.subject_prefix);
    let transport = Arc::new(NatsTransport::new(
        nats.clone(),
        subjects.clone(),
        identity.partition(),
        args.shard_count as usize,
        args.query_window(),
    ));

    // Headless: no chat gateway is attached, so the directory starts empty
    // and alerts go to the log.
    warn!("Running without a chat gateway; guild ownership and alerts are log-only");
    let directory = Arc::new(StaticDirectory::new());
    let notifier = Arc::new(LogNotifier);

    let ctx = SyncContext::new(
        identity,
        stores,
        transport,
        directory,
        notifier,
        args.settings(),
    );
    let node = Arc::new(ShardNode::new(ctx));

    if let Err(e) = node.bootstrap().await {
        error!("Bootstrap failed: {}", e);
        std::process::exit(1);
    }

    let listeners = spawn_listeners(&nats, &subjects, node.clone()).await?;
    info!("{} listener(s) running", listeners.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    for handle in listeners {
        handle.abort();
    }
    if let Err(e) = nats.flush().await {
        warn!("Failed to flush NATS on shutdown: {}", e);
    }

    Ok(())
}
