use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod classify;
mod coordinator;
mod error;
mod models;
mod presence;
mod report;
mod session;

use api::{HttpRemoteService, RemoteService, DEFAULT_API_BASE_URL};
use coordinator::{Coordinator, SubmitOutcome};
use models::{BirthProfile, NewRecord, PartnerForm, UiCategory, DEFAULT_SELF_NAME};
use presence::PresenceTimer;
use session::{Session, SessionStore};

const LOADING_TITLE: &str = "두 분의 궁합을 계산하고 있어요";
const LOADING_DESC: &str = "사주 정보를 분석 중입니다";

#[derive(Parser)]
#[command(name = "fortune-compat")]
#[command(about = "Compatibility and fortune record client", long_about = None)]
struct Cli {
    /// Service base URL; requests go to <base>/api/v1
    #[arg(long, env = "FORTUNE_API_BASE_URL", default_value = DEFAULT_API_BASE_URL, global = true)]
    api_base_url: String,
    /// JSON file holding the session token and cached name/email
    #[arg(long, env = "FORTUNE_SESSION_FILE", default_value = "session.json", global = true)]
    session_file: PathBuf,
    /// Minimum time the busy indicator stays up once shown
    #[arg(long, env = "FORTUNE_MIN_DWELL_MS", default_value_t = 1200, global = true)]
    min_dwell_ms: u64,
    #[arg(long, env = "FORTUNE_TIMEOUT_SECS", default_value_t = 30, global = true)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session locally
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Compute compatibility with a counterpart
    Compat {
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "male")]
        gender: String,
        #[arg(long, default_value = "solar")]
        calendar: String,
        /// YYYY-MM-DD
        #[arg(long)]
        birth_date: String,
        /// HH:MM, empty when unknown
        #[arg(long, default_value = "")]
        birth_time: String,
        #[arg(long, default_value = "")]
        birth_city: String,
        /// Own birth date; when omitted the stored profile is used
        #[arg(long)]
        self_birth_date: Option<String>,
        #[arg(long, default_value = "")]
        self_name: String,
        #[arg(long, default_value = "male")]
        self_gender: String,
        #[arg(long, default_value = "solar")]
        self_calendar: String,
        #[arg(long, default_value = "")]
        self_birth_time: String,
        #[arg(long, default_value = "")]
        self_birth_city: String,
    },
    /// List recent records by category
    Records {
        #[arg(long, default_value_t = 6)]
        limit: u32,
        #[arg(long, value_enum, default_value_t = CategoryArg::All)]
        category: CategoryArg,
    },
    /// Show the detail view a record opens
    Open {
        id: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Generate a markdown report of recent records
    Report {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Export classified records to CSV
    Export {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Save a record
    SaveRecord {
        #[arg(long = "type")]
        record_type: String,
        #[arg(long)]
        content: String,
        /// JSON object stored alongside the record
        #[arg(long)]
        metadata: Option<String>,
        #[arg(long)]
        image_url: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    All,
    Compat,
    Future,
    Relation,
}

impl From<CategoryArg> for UiCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::All => UiCategory::All,
            CategoryArg::Compat => UiCategory::Compat,
            CategoryArg::Future => UiCategory::Future,
            CategoryArg::Relation => UiCategory::Relation,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = SessionStore::new(&cli.session_file);
    let session = store.load()?;
    let service = HttpRemoteService::new(
        &cli.api_base_url,
        session.token().map(str::to_string),
        Duration::from_secs(cli.timeout_secs),
    )?;

    match cli.command {
        Commands::Login { email, password } => {
            let new_session = service
                .login(&email, &password)
                .await
                .context("login failed")?;
            store.save(&new_session)?;
            println!(
                "Signed in as {}.",
                new_session.display_name().unwrap_or(email.as_str())
            );
        }
        Commands::Logout => {
            if let Err(err) = service.logout().await {
                warn!("logout request failed, clearing session anyway: {}", err);
            }
            store.clear()?;
            println!("Signed out; removed {}.", store.path().display());
        }
        Commands::Compat {
            name,
            gender,
            calendar,
            birth_date,
            birth_time,
            birth_city,
            self_birth_date,
            self_name,
            self_gender,
            self_calendar,
            self_birth_time,
            self_birth_city,
        } => {
            let form = PartnerForm {
                user_name: name,
                gender,
                calendar,
                birth_date,
                birth_time,
                birth_city,
            };
            let cached_self = match self_birth_date {
                Some(birth_date) => Some(self_profile(
                    &session,
                    PartnerForm {
                        user_name: self_name,
                        gender: self_gender,
                        calendar: self_calendar,
                        birth_date,
                        birth_time: self_birth_time,
                        birth_city: self_birth_city,
                    },
                )?),
                None => None,
            };

            let presence = PresenceTimer::new(Duration::from_millis(cli.min_dwell_ms));
            let indicator = spawn_indicator(&presence);
            let coordinator = Coordinator::new(&service, &presence, &session);

            let outcome = coordinator.submit(&form, cached_self).await;
            wait_hidden(&presence).await;
            indicator.abort();

            match outcome {
                Ok(SubmitOutcome::Navigate(payload)) => {
                    info!(
                        score = ?payload.compatibility.score(),
                        "compatibility ready for {} and {}",
                        payload.self_profile.display_name(),
                        payload.counterpart_profile.display_name
                    );
                    println!("{}", serde_json::to_string_pretty(&payload)?);
                }
                Ok(SubmitOutcome::Ignored) => {
                    println!("A compatibility request is already in progress.");
                }
                Err(err) => {
                    if let error::WorkflowError::Validation(invalid) = &err {
                        warn!(field = invalid.field(), "invalid counterpart input");
                    }
                    anyhow::bail!("{}", err.user_message());
                }
            }
        }
        Commands::Records { limit, category } => {
            let records = fetch_classified(&service, limit).await?;
            let tab = UiCategory::from(category);
            let visible = classify::filter_by_category(&records, tab);

            if visible.is_empty() {
                println!("기록이 없습니다.");
                return Ok(());
            }

            let self_name = session.display_name().unwrap_or_default();
            println!("Recent records ({}):", tab.label());
            for record in visible {
                let target = classify::dispatch(record, self_name)
                    .map(|t| t.view_name())
                    .unwrap_or("-");
                println!(
                    "- [{}] {} ({}) -> {}",
                    record.ui_category.label(),
                    record.title,
                    record.created_at.format("%Y-%m-%d"),
                    target
                );
            }
        }
        Commands::Open { id, limit } => {
            let records = fetch_classified(&service, limit).await?;
            let record = records
                .iter()
                .find(|r| record_id(&r.id) == id)
                .with_context(|| format!("no record {id} among the latest {limit}"))?;
            let self_name = session.display_name().unwrap_or_default();
            match classify::dispatch(record, self_name) {
                Some(target) => println!("{}", serde_json::to_string_pretty(&target)?),
                None => println!("Record {id} ({}) has no detail view.", record.source_type),
            }
        }
        Commands::Report { limit, out } => {
            let records = fetch_classified(&service, limit).await?;
            let report = report::build_report(session.display_name(), chrono::Utc::now(), &records);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { csv, limit } => {
            let records = fetch_classified(&service, limit).await?;
            let written = report::write_csv(&records, &csv)?;
            println!("Exported {written} records to {}.", csv.display());
        }
        Commands::SaveRecord {
            record_type,
            content,
            metadata,
            image_url,
        } => {
            if let Some(metadata) = metadata.as_deref() {
                serde_json::from_str::<serde_json::Value>(metadata)
                    .context("--metadata must be valid JSON")?;
            }
            let record = NewRecord {
                record_type,
                content,
                image_url: image_url.filter(|u| !u.is_empty()),
                metadata: metadata.filter(|m| !m.is_empty()),
            };
            let created = service
                .create_record(&record)
                .await
                .context("failed to save record")?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
    }

    Ok(())
}

fn self_profile(session: &Session, mut form: PartnerForm) -> anyhow::Result<BirthProfile> {
    if form.user_name.trim().is_empty() {
        form.user_name = session
            .display_name()
            .unwrap_or(DEFAULT_SELF_NAME)
            .to_string();
    }
    coordinator::parse_partner_form(&form).context("invalid own birth profile")
}

async fn fetch_classified(
    service: &dyn RemoteService,
    limit: u32,
) -> anyhow::Result<Vec<models::ClassifiedRecord>> {
    let raw = service
        .list_records(limit)
        .await
        .context("failed to fetch records")?;
    let records = classify::classify(&raw);
    info!(fetched = raw.len(), shown = records.len(), "records classified");
    Ok(records)
}

fn record_id(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn spawn_indicator(presence: &PresenceTimer) -> tokio::task::JoinHandle<()> {
    let mut rx = presence.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if *rx.borrow_and_update() {
                eprintln!("{LOADING_TITLE}\n{LOADING_DESC}");
            }
        }
    })
}

async fn wait_hidden(presence: &PresenceTimer) {
    let mut rx = presence.subscribe();
    while *rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}
