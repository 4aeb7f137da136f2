use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use login_pilot::config::Settings;
use login_pilot::{
    ActionExecutor, ActionSequence, ChatQueryService, ChromeSurface, LoginOrchestrator,
    LoginRequest, PageCache, SelectorResolver, Surface, dom,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "login-pilot", version, about = "AI-assisted web login automation")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and write the credential record.
    Login {
        #[arg(long)]
        url: String,
        #[arg(long, env = "LOGIN_PILOT_USERNAME")]
        username: String,
        #[arg(long, env = "LOGIN_PILOT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Snapshot a page, or every same-origin page it links to.
    Cache {
        #[arg(long)]
        url: String,
        #[arg(long)]
        all: bool,
    },
    /// Run a JSON action file.
    Run {
        #[arg(long)]
        actions: PathBuf,
    },
    /// Print a page's visible text and same-origin links.
    Scrape {
        #[arg(long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings;

    let mut surface = ChromeSurface::new(settings.chrome_options());
    info!("launching browser");
    surface.start().await?;

    let outcome = run(&settings, cli.command, &surface).await;
    surface.stop();
    outcome
}

async fn run(settings: &Settings, command: Command, surface: &ChromeSurface) -> Result<()> {
    match command {
        Command::Login {
            url,
            username,
            password,
        } => {
            let service = ChatQueryService::new(settings.llm_settings()?)?;
            let resolver = SelectorResolver::new(Arc::new(service));
            let mut orchestrator = LoginOrchestrator::initialize(
                &settings.cache_dir,
                &settings.credentials_file,
                resolver,
                settings.login_options(),
            )?;

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling login");
                    ctrl_c.cancel();
                }
            });

            let request = LoginRequest {
                url,
                username,
                password,
            };
            let record = orchestrator
                .login_with_cancel(surface, &request, &cancel)
                .await?;
            println!("{}", record.actual_base_url);
        }
        Command::Cache { url, all } => {
            let mut cache = PageCache::new(&settings.cache_dir);
            cache.initialize()?;
            let snapshots = if all {
                cache.capture_all(surface, &url).await?
            } else {
                vec![cache.capture(surface, &url).await?]
            };
            for snapshot in snapshots {
                println!("{}\t{}", snapshot.url, snapshot.path.display());
            }
        }
        Command::Run { actions } => {
            let sequence = ActionSequence::from_path(&actions)
                .with_context(|| format!("loading actions from {}", actions.display()))?;
            let report = ActionExecutor::new(surface).execute(&sequence).await?;
            info!(
                executed = report.executed.len(),
                skipped = report.unknown.len(),
                "action sequence finished"
            );
        }
        Command::Scrape { url } => {
            surface.goto(&url).await?;
            let markup = surface.content().await?;
            let base = url::Url::parse(&surface.url().await?)?;
            println!("{}", dom::extract_text(&markup));
            for link in dom::same_origin_links(&base, &markup) {
                println!("{link}");
            }
        }
    }
    Ok(())
}
