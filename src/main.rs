mod annotate;
mod cli;
mod prompt;
mod render;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

use rater_client::{ClientConfig, HttpBackend};
use rater_core::errors::{Recovery, ServiceError};
use rater_core::ids::EssayId;
use rater_core::rubric::Rubric;
use rater_core::security::User;
use rater_core::services::{AnnotationStore, AuthService, EssayStore};
use rater_engine::{resolve_user, Dashboard, EngineError, EssaySequence};
use rater_telemetry::{LogQuery, TelemetryConfig, TelemetryGuard};

use crate::annotate::{Console, Services};
use crate::cli::{BackendCommand, Cli, Command, EssayRef};

/// Everything a command needs: the backend client and where its login
/// is remembered.
struct App {
    backend: Arc<HttpBackend>,
    credentials: PathBuf,
}

impl App {
    fn api_url(&self) -> &str {
        self.backend.base_url()
    }

    async fn remember(&self) -> Result<()> {
        let session = self.backend.session().await;
        rater_client::save_session(&self.credentials, self.api_url(), &session)
            .with_context(|| format!("failed to write {}", self.credentials.display()))
    }

    async fn forget(&self) -> Result<()> {
        self.backend.clear_session().await;
        rater_client::clear_session(&self.credentials)
            .with_context(|| format!("failed to remove {}", self.credentials.display()))
    }

    /// Signed-in rater, looking them up when only a token was remembered.
    async fn user(&self) -> Result<User> {
        let session = self.backend.session().await;
        if !session.is_authenticated() {
            bail!("not signed in; run `rater login`");
        }
        let had_user = session.user.is_some();
        let user = resolve_user(&*self.backend, session.user).await?;
        if !had_user {
            self.remember().await?;
        }
        Ok(user)
    }

    async fn sequence(&self) -> Result<EssaySequence> {
        Ok(EssaySequence::load(&*self.backend, &*self.backend).await?)
    }

    async fn dashboard(&self, user: &User) -> Result<()> {
        let dash = Dashboard::load(&*self.backend).await?;
        print!("{}", render::dashboard(user, &dash));
        Ok(())
    }
}

fn resolve(target: &EssayRef, sequence: &EssaySequence) -> Result<EssayId, ServiceError> {
    match target {
        EssayRef::Id(id) => Ok(*id),
        EssayRef::Blind(blind) => sequence.resolve(blind),
    }
}

fn is_auth_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(cause.downcast_ref::<ServiceError>(), Some(ServiceError::Auth(_)))
            || matches!(
                cause.downcast_ref::<EngineError>(),
                Some(EngineError::Service(ServiceError::Auth(_)))
            )
    })
}

/// Missing essays and unknown blind ids put the rater back on the dashboard.
fn sends_to_dashboard(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ServiceError>()
            .is_some_and(|e| e.recovery() == Recovery::Dashboard)
            || cause
                .downcast_ref::<EngineError>()
                .is_some_and(|e| e.recovery() == Recovery::Dashboard)
    })
}

fn stdin_console() -> Console<BufReader<tokio::io::Stdin>, std::io::Stdout> {
    Console::new(BufReader::new(tokio::io::stdin()), std::io::stdout())
}

async fn read_password() -> Result<String> {
    let entered = if std::io::stdin().is_terminal() {
        tokio::task::spawn_blocking(|| prompt::read_hidden("Password: ")).await??
    } else {
        stdin_console().ask("Password: ").await?
    };
    entered.context("no password given")
}

/// Editor session, then the dashboard.
async fn annotate(app: &App, user: &User, target: Option<EssayRef>, rubric: Rubric) -> Result<()> {
    let mut sequence = app.sequence().await?;
    let first = match &target {
        Some(t) => Some(resolve(t, &sequence)?),
        None => sequence
            .entries()
            .iter()
            .find(|e| !e.annotated)
            .map(|entry| entry.essay_id),
    };
    match first {
        Some(first) => {
            let services = Services {
                essays: app.backend.clone(),
                annotations: app.backend.clone(),
            };
            let mut console = stdin_console();
            annotate::run_editor(&mut console, &services, &mut sequence, first, rubric).await?;
        }
        None => println!("Every assigned essay is annotated."),
    }
    app.dashboard(user).await
}

async fn summary(app: &App, target: &EssayRef) -> Result<()> {
    let sequence = app.sequence().await?;
    let id = resolve(target, &sequence)?;
    let essay = EssayStore::get(&*app.backend, id).await?;
    let title = sequence
        .display_title(id)
        .unwrap_or_else(|| essay.title.clone());
    print!("{}", render::summary(&essay, &title));
    Ok(())
}

/// Print `err` and show the dashboard when it is a missing essay; pass
/// anything else up.
async fn or_dashboard(app: &App, user: &User, outcome: Result<()>) -> Result<()> {
    match outcome {
        Err(e) if sends_to_dashboard(&e) => {
            eprintln!("error: {e:#}");
            app.dashboard(user).await
        }
        other => other,
    }
}

async fn dispatch(app: &App, command: BackendCommand) -> Result<()> {
    match command {
        BackendCommand::Login { username, password } => {
            let password = match password {
                Some(p) => p,
                None => read_password().await?,
            };
            let resp = app.backend.login(&username, &password).await?;
            app.remember().await?;
            info!(user_id = %resp.user.id, "signed in");
            println!("Signed in as {} ({})", resp.user.full_name, resp.user.username);
        }
        BackendCommand::Logout => {
            app.forget().await?;
            println!("Signed out.");
        }
        BackendCommand::Whoami => {
            let user = app.user().await?;
            println!("{} ({}), id {}", user.full_name, user.username, user.id);
        }
        BackendCommand::List => {
            let user = app.user().await?;
            app.dashboard(&user).await?;
        }
        BackendCommand::Annotate { target, rubric } => {
            let user = app.user().await?;
            let outcome = annotate(app, &user, target, rubric).await;
            or_dashboard(app, &user, outcome).await?;
        }
        BackendCommand::Summary { target } => {
            let user = app.user().await?;
            let outcome = summary(app, &target).await;
            or_dashboard(app, &user, outcome).await?;
        }
        BackendCommand::SubmitAll => {
            app.user().await?;
            let receipt = app.backend.submit_all().await?;
            println!("Submitted {} annotation(s).", receipt.submitted_count);
        }
    }
    Ok(())
}

fn show_logs(telemetry: &TelemetryGuard, query: LogQuery) -> Result<()> {
    let Some(sink) = telemetry.logs() else {
        bail!("log database is not open (was --no-log-db given?)");
    };
    let records = sink.query(&query).context("failed to read the log database")?;
    print!("{}", render::logs(&records));
    Ok(())
}

async fn run(cli: Cli, telemetry: &TelemetryGuard) -> Result<()> {
    let command = match cli.command {
        Command::Logs {
            essay,
            blind,
            level,
            limit,
        } => {
            return show_logs(
                telemetry,
                LogQuery {
                    level: level.map(|l| l.to_ascii_uppercase()),
                    essay_id: essay.map(|id| id.to_string()),
                    blind_id: blind.map(|b| b.as_str().to_string()),
                    limit: Some(limit),
                },
            );
        }
        Command::Backend(command) => command,
    };

    let mut config = ClientConfig::from_env().context("invalid RATER_* environment")?;
    if let Some(url) = cli.api_url {
        config = config.with_base_url(url)?;
    }
    let credentials = cli
        .credentials
        .unwrap_or_else(rater_client::default_credentials_path);
    let session = rater_client::load_session(&credentials, &config.base_url);
    let backend = HttpBackend::new(&config, session)?;
    let app = App {
        backend: Arc::new(backend),
        credentials,
    };

    let is_login = matches!(command, BackendCommand::Login { .. });
    match dispatch(&app, command).await {
        Err(e) if !is_login && is_auth_failure(&e) => {
            warn!(error = %e, "session rejected, clearing stored credentials");
            app.forget().await?;
            Err(e.context("session expired or rejected; run `rater login`"))
        }
        other => other,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let telemetry = rater_telemetry::init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.json_logs,
        persist_warnings: !cli.no_log_db,
        ..TelemetryConfig::default()
    });

    match run(cli, &telemetry).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
