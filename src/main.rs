use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use query_diagnostics::config::Config;
use query_diagnostics::diagnostics::{
    BulkAnalyzer, DiagnosticReportBuilder, HealthDashboard, PatternDetector,
};
use query_diagnostics::query::{
    ConnectionPool, PgBackend, QueryCatalog, QueryExecutor, SchemaAdapter, SubjectId,
};
use query_diagnostics::validation::ResultValidator;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "query-diagnostics")]
#[command(about = "Resilient query execution and cross-subject diagnostics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a diagnostic report for one subject
    Diagnose {
        #[arg(long)]
        subject: SubjectId,
    },
    /// Run diagnostics across a range of subjects
    Bulk {
        #[arg(long)]
        start: i64,
        #[arg(long)]
        end: i64,
        /// Analyze a random sample of this many subjects
        #[arg(long)]
        sample: Option<usize>,
        /// Run subjects one at a time
        #[arg(long)]
        sequential: bool,
    },
    /// Sample subjects and compute the system health score
    Health {
        #[arg(long)]
        sample: Option<usize>,
        #[arg(long, requires = "end")]
        start: Option<i64>,
        #[arg(long, requires = "start")]
        end: Option<i64>,
    },
    /// Show executor performance metrics
    PerfReport {
        /// Print the Prometheus text exposition instead of JSON
        #[arg(long)]
        prometheus: bool,
    },
    /// List the named queries in the catalog
    Queries,
}

struct Engine {
    executor: Arc<QueryExecutor>,
    catalog: Arc<QueryCatalog>,
    config: Config,
}

impl Engine {
    async fn open(config: Config) -> Result<Self> {
        let catalog = match &config.catalog_path {
            Some(path) => QueryCatalog::load_from_file(path)?,
            None => QueryCatalog::builtin(),
        };

        info!("Connecting to {}", config.safe_database_url());
        let pool = ConnectionPool::connect(&config.database_url, config.pool.clone())
            .await
            .context("Failed to connect to the database")?;
        let backend = Arc::new(PgBackend::new(Arc::new(pool)));

        let executor = QueryExecutor::new(
            backend,
            config.executor.clone(),
            config.cache.clone(),
            ResultValidator::default(),
        )?;

        Ok(Self {
            executor: Arc::new(executor),
            catalog: Arc::new(catalog),
            config,
        })
    }

    fn report_builder(&self) -> DiagnosticReportBuilder {
        DiagnosticReportBuilder::new(
            Arc::clone(&self.executor),
            self.catalog.clone(),
            self.config.diagnostics.clone(),
        )
    }

    fn bulk_analyzer(&self) -> BulkAnalyzer {
        BulkAnalyzer::new(self.report_builder(), self.config.bulk.clone())
    }

    fn health_dashboard(&self) -> HealthDashboard {
        HealthDashboard::new(
            self.bulk_analyzer(),
            PatternDetector::new(self.config.patterns.clone()),
        )
    }

    async fn close(&self) {
        self.executor.close().await;
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());

    // Logs go to stderr so stdout stays clean JSON
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env()?;
    init_tracing(&config);
    config.validate()?;

    let engine = Engine::open(config).await?;
    let result = run(&engine, cli.command).await;
    engine.close().await;
    result
}

async fn run(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Diagnose { subject } => {
            let report = engine
                .report_builder()
                .build_diagnostic_report(subject.get())
                .await;
            print_json(&report)
        }
        Commands::Bulk {
            start,
            end,
            sample,
            sequential,
        } => {
            let result = engine
                .bulk_analyzer()
                .run_bulk_analysis(start, end, sample, !sequential)
                .await;
            print_json(&result)
        }
        Commands::Health { sample, start, end } => {
            let sample = sample.unwrap_or(engine.config.bulk.sample_size);
            let range = start.zip(end);
            let summary = engine
                .health_dashboard()
                .generate_health_summary(sample, range)
                .await;
            print_json(&summary)
        }
        Commands::PerfReport { prometheus } => {
            if prometheus {
                print!("{}", engine.executor.metrics().render_prometheus()?);
                Ok(())
            } else {
                print_json(&engine.executor.performance_report().await)
            }
        }
        Commands::Queries => print_json(&engine.catalog.queries()),
    }
}
