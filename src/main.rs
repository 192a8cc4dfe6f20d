use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use ecg_viewer::config::{ClientConfig, ServerConfig, StorageBackend, StorageConfig};
use ecg_viewer::infrastructure::storage;
use ecg_viewer::models::{DisplaySample, SelectedFile};
use ecg_viewer::pipeline::{UploadPipeline, UploadStatus};
use ecg_viewer::services::parse_client::{HttpParseClient, ParseClient};
use ecg_viewer::services::presign_client::HttpPresignClient;
use ecg_viewer::services::storage::MemoryWaveformStore;
use ecg_viewer::services::transport::FormUploadTransport;
use ecg_viewer::{AppState, create_app};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the presigner/parser backend
    Serve {
        /// Port for the API server
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
    /// Upload a waveform file, parse it and print the display samples
    View {
        /// Local .npy file to upload
        path: PathBuf,

        /// Object name to upload as (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Write the samples as JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Parse an already uploaded waveform and print the display samples
    Render {
        /// Object name used when the file was uploaded
        name: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ecg_viewer=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Serve { port } => serve(port).await,
        Command::View { path, name, output } => view(&path, name, output.as_deref()).await,
        Command::Render { name, output } => render(&name, output.as_deref()).await,
    }
}

async fn serve(port: u16) -> anyhow::Result<()> {
    info!("🚀 Starting ECG waveform backend...");

    let server_config = ServerConfig::from_env();
    let state = match server_config.storage_backend {
        StorageBackend::S3 => {
            let storage_config = StorageConfig::from_env()?;
            let store = storage::setup_storage(&storage_config, &server_config).await?;
            AppState::with_store(store, server_config.clone())
        }
        StorageBackend::Memory => {
            let base_url = format!("http://127.0.0.1:{}/uploads/", port);
            info!("🧪 In-memory storage, uploads received at {}", base_url);
            let store = Arc::new(MemoryWaveformStore::new(base_url));
            AppState::with_local_uploads(store, server_config.clone())
        }
    };

    info!(
        "🛡️  Server Config: Max Upload={}MB, Origins={:?}",
        server_config.max_upload_size / 1024 / 1024,
        server_config.allowed_origins
    );

    // Configure tracing layer for HTTP requests
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://0.0.0.0:{}", port);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn view(path: &Path, name: Option<String>, output: Option<&Path>) -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    let http = config.http_client()?;

    let presign = Arc::new(HttpPresignClient::new(http.clone(), config.endpoint("presigner")?));
    let parser = Arc::new(HttpParseClient::new(http.clone(), config.endpoint("parser")?));
    let transport = Arc::new(FormUploadTransport::new(http));
    let pipeline = UploadPipeline::new(config.decimation_stride, presign, parser, transport)?;

    let name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("Cannot derive a file name from {}", path.display()))?,
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut updates = pipeline.subscribe();
    let progress = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            info!("⏳ Run {}: {}", snapshot.run_id, snapshot.status.label());
        }
    });

    let snapshot = pipeline.select(SelectedFile::new(name, bytes)).await?;
    drop(pipeline);
    let _ = progress.await;

    match snapshot.status {
        UploadStatus::Ready {
            file_locator,
            samples,
            ..
        } => {
            info!("🎉 {} ready with {} points", file_locator, samples.len());
            write_samples(&samples, output).await
        }
        UploadStatus::Failed { file_name, error } => {
            if !error.is_contract_violation() {
                info!("🔁 Run `view` again to retry {}", file_name);
            }
            Err(anyhow!("Pipeline failed for {}: {}", file_name, error))
        }
        other => {
            warn!("Run ended in non-terminal state '{}'", other.label());
            Err(anyhow!("Run was superseded before completing"))
        }
    }
}

async fn render(name: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    let parser = HttpParseClient::from_config(&config)?;
    let samples = parser
        .request_display_samples(name, config.decimation_stride)
        .await?;
    write_samples(&samples, output).await
}

async fn write_samples(samples: &[DisplaySample], output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(samples)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("💾 Wrote {} points to {}", samples.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
