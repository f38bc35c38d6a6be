use clap::Parser;
use marketplace_core::application::ledger::LedgerClient;
use marketplace_core::application::orchestrator::{PurchaseOrchestrator, SettlementMode};
use marketplace_core::application::session_manager::SessionManager;
use marketplace_core::config::{Config, PaymentModeConfig};
use marketplace_core::domain::ports::{SharedProfileStore, SharedPurchaseStore};
use marketplace_core::domain::session::SubjectId;
use marketplace_core::infrastructure::in_memory::{
    InMemoryIdentityStore, InMemoryProfileStore, InMemoryPurchaseStore,
};
use marketplace_core::interfaces::csv::intent_reader::IntentReader;
use marketplace_core::interfaces::csv::purchase_writer::PurchaseWriter;
use miette::{IntoDiagnostic, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Secret given to every account the harness registers.
const BATCH_SECRET: &str = "batch-harness";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input purchase intents CSV file (subject,email,item,amount)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Simulated payment latency in milliseconds. Overrides MARKETPLACE_TEST_DELAY_MS.
    #[arg(long)]
    delay_ms: Option<u64>,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<(SharedProfileStore, SharedPurchaseStore)> {
    use marketplace_core::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(db_path) => {
            let store = RocksDBStore::open(db_path).into_diagnostic()?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory_stores()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<(SharedProfileStore, SharedPurchaseStore)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (SharedProfileStore, SharedPurchaseStore) {
    (
        Arc::new(InMemoryProfileStore::new()),
        Arc::new(InMemoryPurchaseStore::new()),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().into_diagnostic()?;

    let delay = match (&config.payment_mode, cli.delay_ms) {
        (PaymentModeConfig::Test { .. }, Some(ms)) => Duration::from_millis(ms),
        (PaymentModeConfig::Test { delay }, None) => *delay,
        (PaymentModeConfig::Live(_), _) => {
            miette::bail!("the batch harness has no checkout widget; set MARKETPLACE_PAYMENT_MODE=test")
        }
    };

    let (profiles, purchases) = open_stores(cli.db_path)?;
    let identity = Arc::new(InMemoryIdentityStore::new());
    let manager = SessionManager::start(identity.clone(), profiles, config.auth_timeout);
    let mut session = manager.handle();
    session.settled().await;

    let orchestrator = PurchaseOrchestrator::new(
        manager.handle(),
        LedgerClient::new(purchases.clone()),
        SettlementMode::Test { delay },
    );

    let mut registered: HashMap<String, SubjectId> = HashMap::new();
    let mut subjects: Vec<SubjectId> = Vec::new();

    let file = File::open(cli.input).into_diagnostic()?;
    for intent in IntentReader::new(file).intents() {
        let intent = match intent {
            Ok(intent) => intent,
            Err(e) => {
                eprintln!("Error reading purchase intent: {}", e);
                continue;
            }
        };

        let subject = SubjectId::new(intent.subject.as_str());
        match registered.get(&intent.email) {
            Some(owner) if *owner != subject => {
                eprintln!(
                    "Error signing in {}: {} is registered to {}",
                    intent.subject, intent.email, owner
                );
                continue;
            }
            Some(_) => {}
            None => {
                identity
                    .add_account(subject.clone(), &intent.email, BATCH_SECRET)
                    .await;
                registered.insert(intent.email.clone(), subject.clone());
            }
        }

        let signed_in = match manager.sign_in(&intent.email, BATCH_SECRET).await {
            Ok(signed_in) => signed_in,
            Err(e) => {
                eprintln!("Error signing in {}: {}", intent.subject, e);
                continue;
            }
        };
        let committed = tokio::time::timeout(
            config.auth_timeout,
            session.wait_for(|s| s.subject() == Some(&signed_in)),
        )
        .await;
        match committed {
            Ok(Some(_)) => {}
            Ok(None) => {
                eprintln!("Error signing in {}: session manager stopped", intent.subject);
                continue;
            }
            Err(_) => {
                eprintln!("Error signing in {}: session did not settle in time", intent.subject);
                continue;
            }
        }
        if !subjects.contains(&signed_in) {
            subjects.push(signed_in);
        }

        if let Err(e) = orchestrator.initiate(&intent.item, intent.amount).await {
            eprintln!(
                "Error purchasing {} for {}: {}",
                intent.item, intent.subject, e
            );
        }
    }

    let reconciled = orchestrator.reconcile().await;
    if reconciled.still_pending > 0 {
        eprintln!(
            "WARNING: {} confirmed purchases could not be recorded",
            reconciled.still_pending
        );
    }
    manager.shutdown();

    let mut ledger = Vec::new();
    for subject in &subjects {
        ledger.extend(purchases.list_completed(subject).await.into_diagnostic()?);
    }

    let stdout = io::stdout();
    let mut writer = PurchaseWriter::new(stdout.lock());
    writer.write_purchases(&ledger).into_diagnostic()?;

    Ok(())
}
