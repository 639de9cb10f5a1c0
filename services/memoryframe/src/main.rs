use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memoryframe::playback_api::{start_api_server, AppState};
use memoryframe::{
    direct_link, validate_submission, AuthSession, Config, Frame, FrameError, FrameService,
    GoTrueClient, LineQrSource, LookupInput, LookupResolver, MediaFile, NewFrameInput,
    OrderMailer, OrderRequest, PgFrameStore, ProcessQrSource, QrScanner, S3StorageGateway,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account; a confirmation email is sent
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Sign in and remember the session
    Signin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the session
    Signout,
    /// Show the signed-in user
    Whoami,
    /// Upload a photo and video as a new memory frame
    Upload {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        photo: PathBuf,
        #[arg(long)]
        video: PathBuf,
    },
    /// List your frames, newest first
    List,
    /// Open a frame from a direct link, QR payload, or bare id
    Open { payload: String },
    /// Open the first decoded QR payload, read from stdin or a decoder process
    Scan {
        /// Decoder command writing one payload per line, e.g. "zbarcam --raw"
        #[arg(long)]
        decoder: Option<String>,
    },
    /// Send an order request
    Order {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: String,
        #[arg(long, default_value = "")]
        requirements: String,
    },
    /// Serve the public playback API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    match cli.command {
        Command::Signup { email, password } => {
            let session = auth_session(&config).await?;
            session.sign_up(&email, &password).await?;
            println!("Check your email for confirmation.");
        }
        Command::Signin { email, password } => {
            let session = auth_session(&config).await?;
            let user = session.sign_in(&email, &password).await?;
            println!(
                "Signed in successfully as {}.",
                user.email.unwrap_or_else(|| user.id.to_string())
            );
        }
        Command::Signout => {
            auth_session(&config).await?.sign_out().await?;
            println!("Signed out.");
        }
        Command::Whoami => match auth_session(&config).await?.active_user().await {
            Some(user) => println!(
                "{} ({})",
                user.email.as_deref().unwrap_or("no email"),
                user.id
            ),
            None => println!("Not signed in."),
        },
        Command::Upload {
            title,
            description,
            photo,
            video,
        } => {
            let session = auth_session(&config).await?;
            preflight_upload(
                &session,
                &title,
                &photo,
                &video,
                config.storage.max_video_bytes,
            )
            .await?;

            let (frames, _) = frame_service(&config).await?;
            let input = NewFrameInput {
                title,
                description,
                photo: Some(read_media(&photo).await?),
                video: Some(read_media(&video).await?),
            };
            let frame = frames.create_frame(input, &session).await?;
            println!("Frame saved successfully.");
            print_frame(&frame, &config.service.share_base_url);
        }
        Command::List => {
            let session = auth_session(&config).await?;
            if session.active_user().await.is_none() {
                println!("Sign in to view frames.");
                return Ok(());
            }
            let (frames, _) = frame_service(&config).await?;
            let own = frames.list_own_frames(&session).await?;
            if own.is_empty() {
                println!("No frames yet. Create your first memory.");
            }
            for frame in &own {
                print_frame(frame, &config.service.share_base_url);
            }
        }
        Command::Open { payload } => {
            let (frames, _) = frame_service(&config).await?;
            let resolver = LookupResolver::new(frames);
            let frame = resolver.open(&LookupInput::Scanned(payload)).await?;
            print_lookup(frame.as_ref(), &config.service.share_base_url);
        }
        Command::Scan { decoder } => {
            let (frames, _) = frame_service(&config).await?;
            let resolver = LookupResolver::new(frames);
            let outcome = match decoder {
                Some(command_line) => {
                    let source = ProcessQrSource::from_command_line(&command_line)
                        .context("--decoder needs a command")?;
                    QrScanner::new(source).scan(&resolver).await?
                }
                None => {
                    let source =
                        LineQrSource::new(tokio::io::BufReader::new(tokio::io::stdin()));
                    QrScanner::new(source).scan(&resolver).await?
                }
            };
            print_lookup(outcome.frame.as_ref(), &config.service.share_base_url);
        }
        Command::Order {
            name,
            email,
            phone,
            requirements,
        } => {
            let mailer = OrderMailer::new(config.email.clone(), config.email_request_timeout())?;
            mailer
                .submit(&OrderRequest {
                    name,
                    email,
                    phone,
                    requirements,
                })
                .await?;
            println!("Order submitted. We will contact you shortly.");
        }
        Command::Serve => serve(&config).await?,
    }

    Ok(())
}

/// Run the playback API until Ctrl+C or SIGTERM
async fn serve(config: &Config) -> Result<()> {
    info!(service = %config.service.name, "Starting MemoryFrame playback API");

    init_metrics(config.service.metrics_port)?;

    let (frames, store) = frame_service(config).await?;
    let state = AppState {
        lookup: Arc::new(LookupResolver::new(frames.clone())),
        frames,
        pool: store.pool().clone(),
    };

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Playback API stopped");
    Ok(())
}

async fn auth_session(config: &Config) -> Result<AuthSession> {
    anyhow::ensure!(!config.auth.url.is_empty(), "auth.url is not configured");

    let provider = GoTrueClient::new(
        &config.auth.url,
        &config.auth.api_key,
        config.auth_request_timeout(),
    )?;
    Ok(AuthSession::persisted(Arc::new(provider), config.auth.session_file.clone()).await)
}

/// Reject an upload from the session and file metadata alone
///
/// Runs the frame service's checks in the same order before any backend is
/// connected or any file is read. A path that does not exist counts as a
/// missing file.
async fn preflight_upload(
    session: &AuthSession,
    title: &str,
    photo: &Path,
    video: &Path,
    max_video_bytes: u64,
) -> Result<()> {
    if session.active_user().await.is_none() {
        return Err(FrameError::AuthRequired.into());
    }

    let photo_size = file_size(photo).await?;
    let video_size = file_size(video).await?;
    validate_submission(title, photo_size, video_size, max_video_bytes)?;

    Ok(())
}

async fn file_size(path: &Path) -> Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            anyhow::ensure!(metadata.is_file(), "{} is not a file", path.display());
            Ok(Some(metadata.len()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Connect the storage and record gateways and compose the frame service
async fn frame_service(config: &Config) -> Result<(Arc<FrameService>, Arc<PgFrameStore>)> {
    anyhow::ensure!(!config.database.url.is_empty(), "database.url is not configured");

    let store = Arc::new(
        PgFrameStore::new(&config.database)
            .await
            .context("Failed to initialize frame store")?,
    );

    if config.database.run_migrations {
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let storage = Arc::new(
        S3StorageGateway::new(&config.storage)
            .await
            .context("Failed to initialize storage gateway")?,
    );

    let frames = Arc::new(FrameService::new(
        storage,
        store.clone(),
        config.storage.max_video_bytes,
    ));

    Ok((frames, store))
}

async fn read_media(path: &Path) -> Result<MediaFile> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} is not a file", path.display()))?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(MediaFile::new(file_name, bytes))
}

fn print_frame(frame: &Frame, share_base_url: &str) {
    println!("#{}  {}  ({})", frame.id, frame.title, frame.created_at.format("%Y-%m-%d %H:%M"));
    if !frame.description.is_empty() {
        println!("    {}", frame.description);
    }
    println!("    photo: {}", frame.photo_url);
    println!("    video: {}", frame.video_url);
    println!("    link:  {}", direct_link(share_base_url, frame.id));
}

fn print_lookup(frame: Option<&Frame>, share_base_url: &str) {
    match frame {
        Some(frame) => print_frame(frame, share_base_url),
        None => println!("Memory not found."),
    }
}

/// Initialize tracing/logging; logs go to stderr so stdout stays readable
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
