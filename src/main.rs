use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use execution_history::config::{AppConfig, CliConfig, FileConfig};
use execution_history::execution_store::{parse_timestamp, BatchStatus, ExecutionFilter};
use execution_history::lifecycle::{ExecutionQuery, JobLifecycleService, UnmanagedLauncher};
use execution_history::{SqliteClient, SqliteExecutionReader, SqliteExecutionRepository};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().context("Error resolving current directory")?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[clap(about = "Inspect and control batch job execution history")]
struct CliArgs {
    /// Path to a TOML config file. Its values override the flags below.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite execution history database.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Schema target used when a command does not name one.
    #[clap(long)]
    pub default_target: Option<String>,

    /// Maximum length of short text columns.
    #[clap(long)]
    pub max_varchar_length: Option<usize>,

    /// How long shutdown waits for stopped executions to finish.
    #[clap(long)]
    pub shutdown_timeout_secs: Option<u64>,

    #[clap(subcommand)]
    pub command: Command,
}

impl CliArgs {
    fn cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            default_target: self.default_target.clone(),
            max_varchar_length: self.max_varchar_length,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create missing tables for every schema target.
    Init,
    /// List executions, newest first.
    List(ListArgs),
    /// Show one execution with its steps and context.
    Show(ExecutionArgs),
    /// List the steps of one execution.
    Steps(ExecutionArgs),
    /// Signal a running execution to stop.
    Stop(ExecutionArgs),
    /// Mark a stopped or failed execution as abandoned.
    Abandon(ExecutionArgs),
    /// List job names known to any schema target.
    Jobs {
        #[clap(long, default_value_t = 0)]
        offset: u64,
        #[clap(long, default_value_t = 100)]
        count: u64,
    },
    /// List executions that have not ended.
    Running {
        /// Only executions of this job.
        #[clap(long)]
        name: Option<String>,
    },
    /// Show the configured schema targets.
    Targets,
}

#[derive(Args, Debug)]
struct ExecutionArgs {
    pub id: i64,

    /// Schema target owning the execution. Defaults to the default target.
    #[clap(long)]
    pub target: Option<String>,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Job name; `*` matches any run of characters.
    #[clap(long)]
    pub name: Option<String>,

    #[clap(long)]
    pub status: Option<String>,

    /// Start of a start-time range (RFC 3339), used with --to.
    #[clap(long, requires = "to")]
    pub from: Option<String>,

    #[clap(long, requires = "from")]
    pub to: Option<String>,

    #[clap(long)]
    pub instance_id: Option<i64>,

    #[clap(long)]
    pub task_execution_id: Option<i64>,

    #[clap(long, default_value_t = 0)]
    pub offset: u64,

    #[clap(long, default_value_t = 20)]
    pub page_size: u64,

    #[clap(long)]
    pub with_step_count: bool,

    /// Only list this schema target.
    #[clap(long)]
    pub target: Option<String>,
}

impl ListArgs {
    fn filter(&self) -> Result<ExecutionFilter> {
        let status = match &self.status {
            Some(s) => match BatchStatus::parse(s) {
                Some(status) => Some(status),
                None => bail!("Unknown status: {}", s),
            },
            None => None,
        };

        if let Some(id) = self.instance_id {
            return Ok(ExecutionFilter::InstanceId(id));
        }
        if let Some(id) = self.task_execution_id {
            return Ok(ExecutionFilter::TaskExecutionId(id));
        }
        if let (Some(from), Some(to)) = (&self.from, &self.to) {
            let from = parse_timestamp(from).with_context(|| format!("Invalid --from: {}", from))?;
            let to = parse_timestamp(to).with_context(|| format!("Invalid --to: {}", to))?;
            return Ok(ExecutionFilter::DateRange { from, to });
        }

        Ok(match (self.name.clone(), status) {
            (Some(name), Some(status)) => ExecutionFilter::NameAndStatus { name, status },
            (Some(name), None) => ExecutionFilter::Name(name),
            (None, Some(status)) => ExecutionFilter::Status(status),
            (None, None) => ExecutionFilter::All,
        })
    }

    fn query(&self) -> Result<ExecutionQuery> {
        let mut query = ExecutionQuery::new(self.filter()?, self.offset, self.page_size);
        if self.with_step_count {
            query = query.with_step_count();
        }
        if let Some(target) = &self.target {
            query = query.in_target(target.as_str());
        }
        Ok(query)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_command(service: &JobLifecycleService, command: Command) -> Result<()> {
    match command {
        Command::Init => {
            let created = service.ensure_schema()?;
            info!("Schema ready, {} tables created", created);
        }
        Command::List(args) => print_json(&service.list_executions(&args.query()?)?)?,
        Command::Show(args) => {
            print_json(&service.get_execution(args.id, args.target.as_deref())?)?
        }
        Command::Steps(args) => {
            print_json(&service.list_step_executions(args.id, args.target.as_deref())?)?
        }
        Command::Stop(args) => print_json(&service.stop(args.id, args.target.as_deref())?)?,
        Command::Abandon(args) => {
            print_json(&service.abandon(args.id, args.target.as_deref())?)?
        }
        Command::Jobs { offset, count } => print_json(&service.list_job_names(offset, count)?)?,
        Command::Running { name } => print_json(&service.list_running(name.as_deref())?)?,
        Command::Targets => print_json(&service.targets())?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.cli_config(), file_config)?;

    info!("Opening SQLite execution history at {:?}...", config.db_path);
    let client = SqliteClient::open(&config.db_path)?;
    let reader = Arc::new(SqliteExecutionReader::new(client.clone()));
    let repository = Arc::new(SqliteExecutionRepository::new(
        client,
        config.max_varchar_length,
    ));
    let resolver = Arc::new(config.resolver()?.with_probe(reader.clone()));

    let service = JobLifecycleService::new(
        reader,
        repository,
        resolver,
        Arc::new(UnmanagedLauncher),
        config.lifecycle.clone(),
    );

    let result = run_command(&service, cli_args.command);
    service.shutdown().await?;
    result
}
