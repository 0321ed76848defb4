use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;

use invoice_match::api::{ApiState, api_routes};
use invoice_match::channels::email_poller;
use invoice_match::channels::{EmailConfig, GraphClient, GraphConfig, spawn_email_poller};
use invoice_match::config::AppConfig;
use invoice_match::invoices::import_invoice_dir;
use invoice_match::matching::reconcile;
use invoice_match::model::{MatchStatus, StoredEmailConfig, StoredPathConfig};
use invoice_match::pipeline::{process_statement, process_statement_dir};
use invoice_match::report::{export_csv, summarize};
use invoice_match::store::{Database, LibSqlBackend};

#[derive(Parser)]
#[command(
    name = "invoice-match",
    version,
    about = "Reconcile supplier invoices against bank-statement transactions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a single bank statement and print a summary.
    Process {
        /// Statement file (.pdf, .csv, .xlsx, .xls).
        file: PathBuf,
        /// Also write the transactions to a CSV file.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Process all statements in the statements directory and persist them.
    Scan {
        /// Override the statements directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Import invoice PDFs from the invoices directory and persist them.
    Invoices {
        /// Override the invoices directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// One-shot fetch of invoice documents from the configured mailboxes.
    Fetch,
    /// Match invoices against transactions and print a report.
    Reconcile {
        /// Matching window in days around the invoice date.
        #[arg(long)]
        window_days: Option<i64>,
    },
    /// Inspect stored configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Run the HTTP API with the background email poller.
    Serve {
        /// API port (default from INVOICE_MATCH_API_PORT, else 8080).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print email and path configuration (password masked).
    Show,
}

async fn open_db(config: &AppConfig) -> anyhow::Result<Arc<dyn Database>> {
    let backend = LibSqlBackend::new_local(&config.db_path).await?;
    Ok(Arc::new(backend))
}

/// Keep the DB-resident path config in sync with the effective paths.
async fn seed_path_config(db: &Arc<dyn Database>, config: &AppConfig) -> anyhow::Result<()> {
    db.set_path_config(&StoredPathConfig {
        statements_path: config.statements_dir.display().to_string(),
        invoices_path: config.invoices_dir.display().to_string(),
    })
    .await?;
    Ok(())
}

/// Persist mailbox credentials so `config show` reflects the active setup.
async fn seed_email_config(db: &Arc<dyn Database>, email: &EmailConfig) -> anyhow::Result<()> {
    db.set_email_config(&StoredEmailConfig {
        host: email.imap_host.clone(),
        port: email.imap_port,
        username: email.username.clone(),
        password: email.password.expose_secret().to_string(),
    })
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Command::Process { file, export } => {
            println!("Processing file: {}", file.display());
            let txns = process_statement(&file).await?;

            println!("\nProcessed transactions:");
            for txn in &txns {
                println!(
                    "  {}  {:<40}  {:>12}  {}",
                    txn.occurred_on
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "          ".into()),
                    txn.description.chars().take(40).collect::<String>(),
                    txn.amount,
                    txn.kind,
                );
            }
            println!("\n{}", summarize(&txns));

            if let Some(path) = export {
                export_csv(&txns, &path)?;
                println!("\nResults saved to: {}", path.display());
            }
        }

        Command::Scan { dir } => {
            config.ensure_dirs()?;
            let db = open_db(&config).await?;
            seed_path_config(&db, &config).await?;

            let dir = dir.unwrap_or_else(|| config.statements_dir.clone());
            let txns = process_statement_dir(&dir).await?;
            let inserted = db.insert_transactions(&txns).await?;

            println!(
                "Processed {} transactions ({} new) from {}",
                txns.len(),
                inserted,
                dir.display()
            );
        }

        Command::Invoices { dir } => {
            config.ensure_dirs()?;
            let db = open_db(&config).await?;
            seed_path_config(&db, &config).await?;

            let dir = dir.unwrap_or_else(|| config.invoices_dir.clone());
            let invoices = import_invoice_dir(&dir).await?;
            for invoice in &invoices {
                db.upsert_invoice(invoice).await?;
                let (filled, total) = invoice.coverage();
                println!(
                    "  {:<40}  fields {}/{}  total {}",
                    invoice.source_file.chars().take(40).collect::<String>(),
                    filled,
                    total,
                    invoice
                        .total
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "?".into()),
                );
            }
            println!("Imported {} invoices from {}", invoices.len(), dir.display());
        }

        Command::Fetch => {
            config.ensure_dirs()?;
            let db = open_db(&config).await?;

            let mut sources = 0;
            let mut saved = 0usize;

            if let Some(email_config) = EmailConfig::from_env() {
                sources += 1;
                seed_email_config(&db, &email_config).await?;
                saved += email_poller::poll_once(&email_config, &db, &config.invoices_dir).await;
            }

            if let Some(graph_config) = GraphConfig::from_env() {
                sources += 1;
                let client = GraphClient::new(graph_config);
                saved += client.fetch_unread(&db, &config.invoices_dir).await?;
            }

            if sources == 0 {
                eprintln!("No mailbox configured.");
                eprintln!("  Set EMAIL_IMAP_HOST (+ EMAIL_USERNAME/EMAIL_PASSWORD) for IMAP");
                eprintln!("  or GRAPH_ACCESS_TOKEN for Microsoft Graph.");
                std::process::exit(1);
            }

            println!("Fetched {saved} invoice attachments into {}", config.invoices_dir.display());
        }

        Command::Reconcile { window_days } => {
            let db = open_db(&config).await?;
            let invoices = db.list_invoices().await?;
            let transactions = db.list_transactions(None).await?;

            let window = window_days.unwrap_or(config.match_window_days);
            let report = reconcile(&invoices, &transactions, window);
            db.replace_matches(&report.results).await?;

            let by_id: HashMap<_, _> = invoices.iter().map(|i| (i.id, i)).collect();
            for result in &report.results {
                let source = by_id
                    .get(&result.invoice_id)
                    .map(|i| i.source_file.as_str())
                    .unwrap_or("?");
                match result.status {
                    MatchStatus::Matched => println!(
                        "  [matched]    {:<40}  delta {} days, score {:.2}",
                        source,
                        result.date_delta_days.unwrap_or(0),
                        result.score,
                    ),
                    MatchStatus::Ambiguous => {
                        println!("  [ambiguous]  {source:<40}  multiple candidates")
                    }
                    MatchStatus::Unmatched => println!("  [unmatched]  {source:<40}"),
                }
            }
            println!(
                "\n{} invoices: {} matched, {} ambiguous, {} unmatched",
                report.results.len(),
                report.matched,
                report.ambiguous,
                report.unmatched
            );
        }

        Command::Config { command } => match command {
            ConfigCommand::Show => {
                let db = open_db(&config).await?;

                println!("Email Configurations:");
                match db.get_email_config().await? {
                    None => println!("No email configurations found!"),
                    Some(email) => {
                        println!("Host: {}", email.host);
                        println!("Port: {}", email.port);
                        println!("Username: {}", email.username);
                        println!("Password: ********");
                        println!("---");
                    }
                }

                println!("\nPath Configurations:");
                match db.get_path_config().await? {
                    None => println!("No path configurations found!"),
                    Some(paths) => {
                        println!("Statements Path: {}", paths.statements_path);
                        println!("Invoices Path: {}", paths.invoices_path);
                        println!("---");
                    }
                }
            }
        },

        Command::Serve { port } => {
            config.ensure_dirs()?;
            let db = open_db(&config).await?;
            seed_path_config(&db, &config).await?;

            let port = port.unwrap_or(config.api_port);

            eprintln!("📄 invoice-match v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("   Database: {}", config.db_path.display());
            eprintln!("   Statements: {}", config.statements_dir.display());
            eprintln!("   Invoices: {}", config.invoices_dir.display());
            eprintln!("   API: http://0.0.0.0:{port}/api");

            let _poller = if let Some(email_config) = EmailConfig::from_env() {
                seed_email_config(&db, &email_config).await?;
                eprintln!(
                    "   Email: enabled (IMAP {}:{}, every {}s)",
                    email_config.imap_host, email_config.imap_port, email_config.poll_interval_secs
                );
                Some(spawn_email_poller(
                    email_config,
                    Arc::clone(&db),
                    config.invoices_dir.clone(),
                ))
            } else {
                eprintln!("   Email: disabled (EMAIL_IMAP_HOST not set)");
                None
            };

            let state = ApiState {
                db,
                window_days: config.match_window_days,
            };
            let app = api_routes(state);

            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
            tracing::info!(port, "API server started");
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
