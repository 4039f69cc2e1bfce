use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use clientvault::config::AppConfig;
use clientvault::conflict::ClientDraft;
use clientvault::context::AppContext;
use clientvault::identity::Preference;
use clientvault::resilience::ConnectivityStatus;
use clientvault_core::ClientRecord;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "clientvault", about = "Client records that survive a flaky network")]
struct Cli {
    /// Organization scope; overrides CLIENTVAULT_ORG.
    #[arg(long, global = true)]
    org: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Search clients; an empty term lists everything.
    Search {
        #[arg(default_value = "")]
        term: String,
    },
    /// Check a client about to be saved for duplicates.
    Check {
        #[arg(long, default_value = "")]
        company: String,
        #[arg(long, default_value = "")]
        tax_id: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        contact: String,
        /// Id of the record being edited.
        #[arg(long)]
        exclude_id: Option<i64>,
    },
    /// Show where a client's folder lives.
    Resolve {
        id: i64,
        #[arg(long, default_value = "active")]
        prefer: Preference,
    },
    /// Print the client's folder, creating it when missing.
    Open { id: i64 },
    /// Move, restore and rename folders to match the records.
    Migrate,
    /// Probe the service once.
    Status,
    /// Follow connectivity changes until interrupted.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let scope = cli.org.clone().or_else(|| config.org.clone());
    let context = AppContext::bootstrap(config).await?;
    run(&context, scope.as_deref(), cli.command).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("CLIENTVAULT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(context: &AppContext, scope: Option<&str>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Search { term } => {
            let outcome = context.search.search(&term, scope).await?;
            println!("source: {}", outcome.source.label());
            print_records(&outcome.records);
        }
        Command::Check {
            company,
            tax_id,
            name,
            contact,
            exclude_id,
        } => {
            let draft = ClientDraft {
                tax_id,
                name,
                company_name: company,
                contact_number: contact,
            };
            let report = context.detector.check(scope, &draft, exclude_id).await?;
            if let Some(existing) = &report.tax_id_conflict {
                println!(
                    "blocked: tax id already used by client {} ({})",
                    existing.id, existing.company_name
                );
            }
            for similar in &report.name_conflicts {
                println!(
                    "warning: client {} has the same company name with tax id '{}'",
                    similar.id, similar.tax_id
                );
            }
            if report.is_clear() {
                println!("no duplicates found");
            }
            if report.blocks_save() {
                anyhow::bail!("save would create a duplicate tax id");
            }
        }
        Command::Resolve { id, prefer } => {
            let record = lookup(context, scope, id).await;
            let resolved = context.resolver.resolve(id, record.as_ref());
            if let Some(slug) = &resolved.slug {
                println!("slug:   {slug}");
            }
            for (label, hit) in [("active", &resolved.active), ("trash", &resolved.trash)] {
                match hit {
                    Some(hit) => println!("{label}: {} ({:?})", hit.path.display(), hit.matched_by),
                    None => println!("{label}: -"),
                }
            }
            println!("chosen: {}", resolved.require(prefer)?.display());
        }
        Command::Open { id } => {
            let path = match lookup(context, scope, id).await {
                Some(record) => context.resolver.ensure_folder(&record)?,
                None => context
                    .resolver
                    .resolve(id, None)
                    .require(Preference::ActiveFirst)?
                    .to_path_buf(),
            };
            println!("{}", path.display());
        }
        Command::Migrate => {
            let scope = scope.context("no organization scope selected (use --org)")?;
            let records = context.all_records(scope).await?;
            let resolver = context.resolver.clone();
            let report = tokio::task::spawn_blocking(move || resolver.migrate(&records))
                .await
                .context("folder migration task failed")?;
            println!(
                "trashed {}, restored {}, renamed {}, marked {}, unchanged {}",
                report.trashed.len(),
                report.restored.len(),
                report.renamed.len(),
                report.marked.len(),
                report.unchanged
            );
            for failure in &report.failures {
                println!(
                    "failed: client {} at {}: {}",
                    failure.client_id,
                    failure.path.display(),
                    failure.error
                );
            }
        }
        Command::Status => {
            let state = context.monitor.probe_now().await;
            println!("{}", state.status_text());
            if let Some(scope) = scope
                && state.status != ConnectivityStatus::Offline
            {
                match context.search.refresh_listing(Some(scope)).await {
                    Ok(count) => println!("{count} clients in {scope}"),
                    Err(err) => tracing::warn!(error = %err, "listing refresh failed"),
                }
            }
        }
        Command::Watch => {
            let monitor = Arc::clone(&context.monitor);
            monitor.subscribe(|state| println!("{}", state.status_text()));
            monitor.start();
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for interrupt")?;
            monitor.stop().await;
        }
    }
    Ok(())
}

async fn lookup(context: &AppContext, scope: Option<&str>, id: i64) -> Option<ClientRecord> {
    let scope = scope?;
    match context.record(scope, id).await {
        Ok(record) => record,
        Err(err) => {
            tracing::warn!(client_id = id, error = %err, "record lookup failed, resolving by marker only");
            None
        }
    }
}

fn print_records(records: &[ClientRecord]) {
    if records.is_empty() {
        println!("no clients found");
        return;
    }
    for record in records {
        println!(
            "{:>6}  {:<40}  {:<18}  {}",
            record.id, record.company_name, record.tax_id, record.name
        );
    }
}
