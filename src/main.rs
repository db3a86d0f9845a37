//! linkgate - operator CLI for the auth and quota core

use anyhow::Context;
use clap::Parser;
use std::io::Read;
use std::sync::Arc;
use tracing::{error, info};

use linkgate::{
    auth::{hash_secret, scope_listing, AuthProvider},
    config::{Args, Command, LedgerBackend},
    db::MongoClient,
    logging::{self, AuditEvent, AuditEventType},
    plans::PlanRegistry,
    quota::{CounterStore, MongoCounterStore, QuotaLedger, SqliteCounterStore, Window},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format)?;

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    match &args.command {
        Command::Check => check(&args).await,
        Command::Cleanup => cleanup(&args).await,
        Command::IssueToken { subject } => {
            let provider = AuthProvider::from_settings(&args.auth_settings()?)?;
            println!("{}", provider.issue_token(subject)?);
            Ok(())
        }
        Command::HashSecret => {
            let mut secret = String::new();
            std::io::stdin()
                .read_to_string(&mut secret)
                .context("Failed to read secret from stdin")?;
            let secret = secret.trim_end_matches(['\r', '\n']).to_string();
            anyhow::ensure!(!secret.is_empty(), "No secret on stdin");

            let hash = tokio::task::spawn_blocking(move || hash_secret(&secret)).await??;
            println!("{}", hash);
            Ok(())
        }
        Command::Scopes => {
            println!("{}", scope_listing());
            Ok(())
        }
        Command::QuotaStatus {
            identifier,
            subject_type,
            plan,
        } => {
            let ledger = QuotaLedger::new(open_counter_store(&args).await?);
            let limits = PlanRegistry::default().limits(*plan);

            let hourly = ledger
                .peek(identifier, *subject_type, Window::Hourly, limits.hourly_request_limit)
                .await?;
            let monthly = ledger
                .peek(identifier, *subject_type, Window::Monthly, limits.monthly_link_limit)
                .await?;

            let report = serde_json::json!({
                "identifier": identifier,
                "type": subject_type,
                "plan": plan,
                "hourly": hourly,
                "monthly": monthly,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn check(args: &Args) -> anyhow::Result<()> {
    let provider = AuthProvider::from_settings(&args.auth_settings()?)?;
    info!("Auth mode: {}", provider.mode());
    if let Some(alg) = &args.jwt_algorithm {
        info!("JWT algorithm: {}", alg);
    }

    open_counter_store(args).await?;
    info!("Ledger backend: {:?}", args.ledger_backend);
    println!("ok: auth mode {}, ledger {:?}", provider.mode(), args.ledger_backend);
    Ok(())
}

async fn cleanup(args: &Args) -> anyhow::Result<()> {
    let ledger = QuotaLedger::new(open_counter_store(args).await?);
    let audit = args.audit_logger().context("Failed to open audit log")?;
    let removed = ledger.cleanup(args.retention()).await?;
    audit
        .log(
            AuditEvent::new(AuditEventType::CountersSwept)
                .with_detail(format!("removed {} counters", removed)),
        )
        .await;
    info!(
        removed,
        retention_hours = args.retention_hours,
        "Expired quota counters removed"
    );
    println!("removed {} expired counters", removed);
    Ok(())
}

async fn open_counter_store(args: &Args) -> anyhow::Result<Arc<dyn CounterStore>> {
    match args.ledger_backend {
        LedgerBackend::Sqlite => {
            let store = SqliteCounterStore::open(&args.sqlite_path)?;
            Ok(Arc::new(store))
        }
        LedgerBackend::Mongodb => {
            let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
            Ok(Arc::new(MongoCounterStore::new(&client).await?))
        }
    }
}
