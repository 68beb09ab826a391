use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_capture::capability::{AutomationCapability, HttpCapability};
use mail_capture::config::CaptureConfig;
use mail_capture::credentials::{
    CredentialProvider, EnvCredentialProvider, HttpCredentialProvider,
};
use mail_capture::run::CaptureRun;
use mail_capture::storage::HttpObjectStore;

/// Set up stderr + file logging. The file becomes the LOG diagnostic
/// artifact; the guard must stay alive for the run's duration.
fn init_logging() -> anyhow::Result<(PathBuf, tracing_appender::non_blocking::WorkerGuard)> {
    let log_dir = std::env::temp_dir().join("mail-capture");
    std::fs::create_dir_all(&log_dir)?;
    let log_name = format!("run_{}.log", std::process::id());
    let log_path = log_dir.join(&log_name);

    let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false),
        )
        .init();

    Ok((log_path, guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let (log_path, _guard) = init_logging()?;

    let config = match CaptureConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("  export MAIL_CAPTURE_STORE_URL=http://...");
            std::process::exit(1);
        }
    };

    let driver_url = std::env::var("MAIL_CAPTURE_DRIVER_URL")
        .unwrap_or_else(|_| "http://localhost:7333".to_string());

    eprintln!("📬 mail-capture v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Store: {}", config.store_url);
    eprintln!("   Driver: {}", driver_url);
    eprintln!("   Budget: {}s", config.time_budget.as_secs());
    if let Ok(Some(next)) = config.next_fire() {
        eprintln!("   Schedule: {} (next fire {})", config.schedule, next);
    }

    let credentials: Arc<dyn CredentialProvider> = match &config.secrets_url {
        Some(url) => Arc::new(HttpCredentialProvider::new(url.clone())),
        None => Arc::new(EnvCredentialProvider::default()),
    };

    let capability: Arc<dyn AutomationCapability> =
        Arc::new(HttpCapability::new(driver_url, config.portal_url.clone()));
    let store = Arc::new(HttpObjectStore::new(config.store_url.clone()));

    let run = CaptureRun::new(config, credentials, capability, store).with_run_log(log_path);
    let result = run.execute().await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(if result.status_code() == 200 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
