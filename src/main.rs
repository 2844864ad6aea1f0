use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::Level;

use taskdeck_app::{App, AppConfig, Navigation, SyncOutcome};
use taskdeck_core::ids::{TaskId, UserId};
use taskdeck_core::security::{AnonKey, Credentials};
use taskdeck_core::tasks::{NewTask, Task, TaskPatch, TaskStatus};
use taskdeck_telemetry::{init_telemetry, LogQuery, LogRecord, TelemetryConfig, TelemetryGuard};

/// Personal task list backed by a hosted Postgres REST backend
#[derive(Parser)]
#[command(name = "taskdeck")]
#[command(version)]
struct Cli {
    /// Backend project URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Public anon key of the backend project
    #[arg(long, global = true)]
    anon_key: Option<String>,

    /// Data directory (local storage, key file, log database)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    SignIn(Login),
    /// Create an account and sign in
    SignUp(Login),
    /// Sign out and forget the local session
    SignOut,
    /// Show who is signed in, as reported by the backend
    Whoami,
    /// List your tasks
    List,
    /// Add a task
    Add {
        name: String,
        /// Due date, YYYY-MM-DD
        #[arg(long)]
        due: NaiveDate,
        /// Create the task already completed
        #[arg(long)]
        done: bool,
    },
    /// Change a task's name, due date or status
    Edit {
        id: TaskId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        due: Option<NaiveDate>,
        /// complete | incomplete
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Mark a task complete
    Complete { id: TaskId },
    /// Mark a task incomplete
    Incomplete { id: TaskId },
    /// Delete a task
    Delete { id: TaskId },
    /// Show recent warnings and errors saved to the log database
    Logs(LogsArgs),
}

#[derive(clap::Args)]
struct LogsArgs {
    /// Only this level (warn or error)
    #[arg(long)]
    level: Option<Level>,
    /// Only entries about this task
    #[arg(long)]
    task: Option<TaskId>,
    /// Only this error kind, e.g. network or unauthorized
    #[arg(long)]
    kind: Option<String>,
    /// Only entries at or after this RFC 3339 timestamp
    #[arg(long)]
    since: Option<String>,
    /// Maximum number of entries
    #[arg(short = 'n', long, default_value_t = 20)]
    limit: u32,
}

impl LogsArgs {
    fn query(&self) -> LogQuery {
        LogQuery {
            level: self.level.map(|l| l.to_string().to_uppercase()),
            task_id: self.task.map(|id| id.to_string()),
            error_kind: self.kind.clone(),
            since: self.since.clone(),
            limit: Some(self.limit),
            ..LogQuery::default()
        }
    }
}

#[derive(clap::Args)]
struct Login {
    email: String,
    #[arg(long, env = "TASKDECK_PASSWORD", hide_env_values = true)]
    password: String,
}

impl Cli {
    /// Defaults, then environment, then flags.
    fn config(&self) -> AppConfig {
        let mut config = AppConfig::from_env();
        if let Some(url) = &self.url {
            config.url = Some(url.clone());
        }
        if let Some(key) = &self.anon_key {
            config.anon_key = Some(AnonKey::from(key.clone()));
        }
        if let Some(home) = &self.home {
            config.home = home.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.config();

    let telemetry = match telemetry_config(&config, cli.json_logs) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    let guard = init_telemetry(telemetry);

    match run(cli.command, &config, &guard).await {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Map `TASKDECK_LOG` (e.g. `info,taskdeck_remote=debug`) onto the
/// telemetry config. `RUST_LOG`, when set, still wins.
fn telemetry_config(config: &AppConfig, json: bool) -> Result<TelemetryConfig> {
    let mut telemetry = TelemetryConfig {
        json,
        log_db_path: config.log_db_path(),
        ..TelemetryConfig::default()
    };
    let Some(directives) = &config.log_level else {
        return Ok(telemetry);
    };
    for part in directives.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('=') {
            Some((module, level)) => {
                let level = Level::from_str(level)
                    .with_context(|| format!("invalid log level in {part:?}"))?;
                telemetry.module_levels.push((module.to_string(), level));
            }
            None => {
                telemetry.log_level =
                    Level::from_str(part).with_context(|| format!("invalid log level {part:?}"))?;
            }
        }
    }
    Ok(telemetry)
}

async fn run(command: Command, config: &AppConfig, telemetry: &TelemetryGuard) -> Result<ExitCode> {
    // Reading logs needs no backend settings.
    let app = match &command {
        Command::Logs(args) => return show_logs(telemetry, args),
        _ => App::bootstrap(config)?,
    };

    match command {
        Command::SignIn(login) => {
            let user = app
                .session()
                .sign_in(&Credentials::new(login.email, login.password))
                .await
                .context("sign-in failed")?;
            println!("signed in as {}", user.email.as_deref().unwrap_or(user.id.as_str()));
        }
        Command::SignUp(login) => {
            let user = app
                .session()
                .sign_up(&Credentials::new(login.email, login.password))
                .await
                .context("sign-up failed")?;
            println!("registered {}", user.email.as_deref().unwrap_or(user.id.as_str()));
        }
        Command::SignOut => {
            app.sign_out().await.context("backend sign-out failed")?;
            println!("signed out");
        }
        Command::Whoami => match app.session().fetch_session().await? {
            Some(user) => println!("{} ({})", user.email.as_deref().unwrap_or("-"), user.id),
            None => println!("not signed in"),
        },
        Command::List => {
            if open_dashboard(&app).await?.is_none() {
                return Ok(ExitCode::FAILURE);
            }
            let tasks = app.tasks().tasks();
            if tasks.is_empty() {
                println!("no tasks");
            }
            for task in &tasks {
                println!("{}", render(task));
            }
        }
        Command::Add { name, due, done } => {
            let Some(user_id) = open_dashboard(&app).await? else {
                return Ok(ExitCode::FAILURE);
            };
            let mut task = NewTask::new(name, user_id, Some(due));
            if done {
                task.status = TaskStatus::Complete;
            }
            return finish(app.tasks().create(task).await, "add task");
        }
        Command::Edit {
            id,
            name,
            due,
            status,
        } => {
            let patch = TaskPatch {
                name,
                status,
                due_date: due,
            };
            if patch.is_empty() {
                bail!("nothing to change: pass --name, --due or --status");
            }
            if open_dashboard(&app).await?.is_none() {
                return Ok(ExitCode::FAILURE);
            }
            return finish(app.tasks().update(id, &patch).await, "edit task");
        }
        Command::Complete { id } => {
            if open_dashboard(&app).await?.is_none() {
                return Ok(ExitCode::FAILURE);
            }
            return finish(app.tasks().mark_complete(id).await, "complete task");
        }
        Command::Incomplete { id } => {
            if open_dashboard(&app).await?.is_none() {
                return Ok(ExitCode::FAILURE);
            }
            return finish(app.tasks().mark_incomplete(id).await, "reopen task");
        }
        Command::Delete { id } => {
            if open_dashboard(&app).await?.is_none() {
                return Ok(ExitCode::FAILURE);
            }
            return finish(app.tasks().delete(id).await, "delete task");
        }
        Command::Logs(_) => {}
    }
    Ok(ExitCode::SUCCESS)
}

/// Enter the guarded dashboard. `None` means the guard sent us to sign-in.
async fn open_dashboard(app: &App) -> Result<Option<UserId>> {
    match app.open_dashboard().await.context("could not load tasks")? {
        Navigation::Allowed(_) => Ok(app.current_user_id()),
        _ => {
            eprintln!("not signed in: run `taskdeck sign-in <email>` first");
            Ok(None)
        }
    }
}

fn finish(outcome: SyncOutcome, action: &str) -> Result<ExitCode> {
    match outcome {
        SyncOutcome::Applied | SyncOutcome::Superseded => Ok(ExitCode::SUCCESS),
        SyncOutcome::NotFound => {
            eprintln!("{action}: no such task");
            Ok(ExitCode::FAILURE)
        }
        SyncOutcome::Failed(e) => Err(e).with_context(|| format!("failed to {action}")),
    }
}

fn show_logs(guard: &TelemetryGuard, args: &LogsArgs) -> Result<ExitCode> {
    let Some(sink) = guard.logs() else {
        bail!("log database is not available");
    };
    let records = sink.query(&args.query()).context("failed to read logs")?;
    if records.is_empty() {
        println!("no log entries");
    }
    // Oldest first, like a log file.
    for record in records.iter().rev() {
        println!("{}", render_log(record));
    }
    Ok(ExitCode::SUCCESS)
}

fn render_log(record: &LogRecord) -> String {
    let mut line = format!("{} {:<5} {}: {}", record.timestamp, record.level, record.target, record.message);
    if let Some(kind) = &record.error_kind {
        line.push_str(&format!(" [{kind}]"));
    }
    if let Some(task) = &record.task_id {
        line.push_str(&format!(" task={task}"));
    }
    line
}

fn render(task: &Task) -> String {
    let mark = if task.is_complete() { "x" } else { " " };
    match task.due_date {
        Some(due) => format!("{:>5}  [{mark}] {}  (due {due})", task.id.get(), task.name),
        None => format!("{:>5}  [{mark}] {}", task.id.get(), task.name),
    }
}
