//! Lecture stream binary entry point
//!
//! Starts a presenter session for one course and keeps it running until
//! Ctrl+C. Session events are logged as they are published.
//!
//! # Usage
//!
//! ```bash
//! # Stream a course using a configuration file
//! cargo run --bin lecture_stream -- \
//!   --config ./stream.toml \
//!   --course-id 42 \
//!   --course-title "Linear Algebra"
//!
//! # Override the server and token from the environment
//! LECTURE_STREAM_SERVER=stream.example.org \
//! LECTURE_STREAM_TOKEN=secret \
//! cargo run --bin lecture_stream -- --course-id 42 --camera
//! ```

use bytes::Bytes;
use clap::Parser;
use lecture_stream::{
    Course, Document, DocumentSource, Error, SessionEvent, StreamConfig, StreamSessionController,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Lecture live-stream presenter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "LECTURE_STREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Streaming server name, substituted into the endpoint templates
    #[arg(long, env = "LECTURE_STREAM_SERVER")]
    server: Option<String>,

    /// Bearer token for the publisher API
    #[arg(long, env = "LECTURE_STREAM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Course to stream
    #[arg(long, env = "LECTURE_STREAM_COURSE_ID")]
    course_id: String,

    /// Course title, used as the display name in the media room
    #[arg(long, default_value = "Lecture", env = "LECTURE_STREAM_COURSE_TITLE")]
    course_title: String,

    /// Send the camera stream once the session started
    #[arg(long, default_value_t = false)]
    camera: bool,

    /// Do not send microphone audio
    #[arg(long, default_value_t = false)]
    mute: bool,

    /// Seconds to wait for a graceful stop
    #[arg(long, default_value_t = 5)]
    shutdown_timeout_secs: u64,
}

/// Headless presenter without open documents
struct NoDocuments;

impl DocumentSource for NoDocuments {
    fn documents(&self) -> Vec<Document> {
        Vec::new()
    }

    fn selected(&self) -> Option<Document> {
        None
    }

    fn serialize(&self, document: &Document) -> lecture_stream::Result<Bytes> {
        Err(Error::InvalidData(format!(
            "No renderer for document {}",
            document.name
        )))
    }

    fn whiteboard_template(&self, document: &Document, _pages: u32) -> lecture_stream::Result<Document> {
        Ok(document.clone())
    }
}

fn build_config(args: &Args) -> lecture_stream::Result<StreamConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            StreamConfig::load(path)?
        }
        None => StreamConfig::default(),
    };

    if let Some(server) = &args.server {
        config.server_name = server.clone();
    }
    if args.token.is_some() {
        config.access_token = args.token.clone();
    }
    config.camera_enabled |= args.camera;
    if args.mute {
        config.microphone_enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("Shutdown already in progress, forcing exit");
            std::process::exit(1);
        }
        eprintln!("\nCtrl+C received, stopping stream...");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("lecture-stream")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        course = %args.course_id,
        "Lecture stream starting"
    );

    let config = build_config(&args)?;

    info!(
        server = %config.server_name,
        state_url = %config.state_url(),
        janus_url = %config.janus_url(),
        camera = config.camera_enabled,
        microphone = config.microphone_enabled,
        max_reconnect_retries = config.reconnect.max_retries,
        "Configuration loaded"
    );

    let mut controller = StreamSessionController::new(config, Arc::new(NoDocuments))?;
    controller.set_course(Some(Course::new(&args.course_id, &args.course_title)));

    let mut events = controller.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::MediaError { media_type, message } => {
                    warn!("{} error: {}", media_type, message)
                }
                SessionEvent::ReconnectFailed { client } => {
                    error!("Reconnecting {} failed", client)
                }
                event => info!(?event, "Session event"),
            }
        }
    });

    controller.start().await?;
    info!("Streaming. Press Ctrl+C to stop.");

    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    controller
        .shutdown(Duration::from_secs(args.shutdown_timeout_secs))
        .await?;
    info!("Stream stopped");

    Ok(())
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
