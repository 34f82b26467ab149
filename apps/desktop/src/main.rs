use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{
    ControlPlane, DurableSessionStore, Endpoints, HttpControlPlane, SessionController,
    SimulatedControlPlane,
};
use shared::protocol::AuthAction;
use storage::Storage;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "SecureVPN demo client")]
struct Args {
    /// Base URL of the placeholder services; omit to run the offline simulation
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    /// Create an account instead of signing in
    #[arg(long)]
    register: bool,
    #[arg(long)]
    username: Option<String>,
    /// Directory id of the server to connect through; defaults to the first entry
    #[arg(long)]
    server_id: Option<String>,
    /// Local sqlite file remembering the signed-in user across runs
    #[arg(long, default_value = "sqlite://./data/client.db")]
    session_db: String,
    /// Write the downloaded .ovpn config into the working directory
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let control_plane: Arc<dyn ControlPlane> = match &args.server_url {
        Some(base) => Arc::new(HttpControlPlane::new(Endpoints::from_base(base)?)),
        None => {
            info!("no --server-url given, running the offline simulation");
            Arc::new(SimulatedControlPlane::new())
        }
    };

    let session_storage = Storage::new(&args.session_db).await?;
    let controller = SessionController::new(
        control_plane,
        Arc::new(DurableSessionStore::new(session_storage)),
    );

    let user = match controller.restore_session().await {
        Some(user) => {
            println!("Restored session for {} <{}>", user.username, user.email);
            user
        }
        None => {
            let action = if args.register {
                AuthAction::Register
            } else {
                AuthAction::Login
            };
            controller
                .authenticate(action, &args.email, &args.password, args.username.as_deref())
                .await?
        }
    };
    println!(
        "Signed in as {} ({:?} plan)",
        user.username, user.subscription_tier
    );

    let servers = controller.refresh_servers().await?;
    println!("Available servers:");
    for server in &servers {
        println!(
            "  [{}] {} {}, {} (load {}%, ping {}ms)",
            server.id, server.flag, server.city, server.country, server.load, server.ping_ms
        );
    }

    if let Some(id) = &args.server_id {
        if !controller.select_server_by_id(id).await {
            anyhow::bail!("server '{id}' is not in the directory");
        }
    }

    let link = controller.connect().await?;
    let badge = controller.badge().await;
    println!("{} (VPN IP {})", badge.label, link.vpn_ip);

    if let Some(config) = &link.config {
        if args.save_config {
            std::fs::write(&config.filename, &config.content)?;
            println!("Config written to {}", config.filename);
        } else {
            println!("Config available as {} (pass --save-config to write it)", config.filename);
        }
    }

    println!("Event log:");
    for entry in controller.logs().await {
        println!(
            "  {}  {:<14} {}",
            entry.timestamp_label(),
            entry.event,
            entry.details
        );
    }

    if args.server_url.is_some() {
        match controller.fetch_log_history().await {
            Ok(history) if !history.is_empty() => {
                println!("Service-side history:");
                for record in history {
                    println!("  {}  {:<14} {}", record.timestamp, record.event, record.details);
                }
            }
            Ok(_) => {}
            Err(err) => println!("History unavailable: {err}"),
        }
    }

    controller.disconnect().await?;
    println!("{}", controller.badge().await.label);

    Ok(())
}
