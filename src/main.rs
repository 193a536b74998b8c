use clap::Parser;
use simple_push_ci::api::build_router;
use simple_push_ci::dispatch::Dispatcher;
use simple_push_ci::logging::setup_logging;
use simple_push_ci::notify::{LogNotifier, Notifier, SmtpNotifier};
use simple_push_ci::runner::ProcessRunner;
use simple_push_ci::webhook::PushPayload;
use simple_push_ci::{AppState, load_config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "conf.toml";

#[derive(Debug, Parser)]
#[command(version, about = "Runs configured test routines for GitHub push webhooks")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, env = "HOOK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Load a push payload from a file instead of listening
    #[arg(long)]
    file: Option<PathBuf>,

    /// Delivery id used for workspace names in --file mode
    #[arg(long, default_value = "loaded-from-file")]
    delivery_id: String,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let _log_guard = match setup_logging(config.debug, config.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to set up logging: {}", e);
            std::process::exit(1);
        }
    };

    let notifier: Arc<dyn Notifier> = match config.mail.clone() {
        Some(mail) => Arc::new(SmtpNotifier::new(mail)),
        None => {
            warn!("No [mail] section configured, reports will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let runner = Arc::new(ProcessRunner::new(config.command_timeout()));
    let listen = config.listen.clone();
    info!("Using config at {:?}", args.config);

    let dispatcher = Dispatcher::new(Arc::new(config), runner, notifier);

    if let Some(path) = args.file {
        if let Err(e) = replay_file(&dispatcher, &path, &args.delivery_id).await {
            error!("{}", e);
            std::process::exit(1);
        }
        return;
    }

    let app = build_router(Arc::new(AppState::new(dispatcher)));
    let listener = match tokio::net::TcpListener::bind(&listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", listen, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", listen);
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn replay_file(
    dispatcher: &Dispatcher,
    path: &Path,
    delivery_id: &str,
) -> simple_push_ci::error::Result<()> {
    info!("Loading payload from {}", path.display());
    let body = tokio::fs::read(path).await?;
    let payload = PushPayload::from_slice(&body)?;
    let report = dispatcher.run_payload(payload, delivery_id).await?;
    info!(
        "Replay finished: {} routines executed, {} skipped",
        report.executed(),
        report.skipped
    );
    Ok(())
}
