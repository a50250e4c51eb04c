use anyhow::{Context, Result};
use clap::Parser;
use clarifai_stream::{
    AskRequest, Config, LogSpeech, SessionEvent, SpeechOutput, StartOptions, StreamingSession,
    WavCaptureDevice, WebSocketConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clarifai-stream")]
#[command(about = "Stream a lecture recording for live transcription and concept explanations")]
struct Args {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/clarifai-stream")]
    config: String,

    /// WAV recording to stream (16-bit PCM)
    #[arg(short, long)]
    wav: PathBuf,

    /// User id sent in the init message (overrides config)
    #[arg(short, long)]
    user: Option<String>,

    /// Lecture id (generated when absent)
    #[arg(short, long)]
    lecture: Option<String>,

    /// Mode hint sent in the init message (overrides config)
    #[arg(short, long)]
    mode: Option<String>,

    /// Concept to ask about after the first final transcript
    #[arg(short, long)]
    ask: Option<String>,

    /// Stop after this many seconds (default: run until Ctrl+C)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Replay the recording when it ends
    #[arg(long)]
    loop_audio: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = Config::load(&args.config)?;
    info!("{} starting", cfg.service.name);

    let mut session_config = cfg.session_config();
    if args.user.is_some() {
        session_config.user_id = args.user.clone();
    }
    info!("Transcription endpoint: {}", session_config.transcription_url);
    match &session_config.explain_url {
        Some(url) => info!("Explain endpoint: {}", url),
        None => info!("Explanations share the transcription connection"),
    }

    let device = WavCaptureDevice::open(&args.wav, cfg.capture_config())
        .with_context(|| format!("Failed to open {}", args.wav.display()))?
        .with_looping(args.loop_audio);
    let speech: Arc<dyn SpeechOutput> = Arc::new(LogSpeech);

    let (session, mut events) = StreamingSession::spawn(
        session_config,
        Arc::new(WebSocketConnector::new()),
        Box::new(device),
        Some(speech),
    );

    session
        .start(StartOptions {
            lecture_id: args.lecture.clone(),
            mode: args.mode.clone().or_else(|| cfg.identity.mode.clone()),
        })
        .await?;

    info!("Streaming {}. Press Ctrl+C to stop", args.wav.display());

    let mut pending_ask = args.ask.clone();
    let deadline = async {
        match args.duration {
            Some(secs) => sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("Duration elapsed");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let first_final = matches!(event, SessionEvent::Transcript { is_final: true, .. });
                print_event(&event);

                if first_final {
                    if let Some(concept) = pending_ask.take() {
                        let context = session.snapshot().transcript.join(" ");
                        if let Err(e) = session.ask(AskRequest::new(concept, context, 3)).await {
                            warn!("Could not request explanation: {}", e);
                        }
                    }
                }
            }
        }
    }

    let stats = session.stop().await?;
    info!("Session complete!");
    info!("  Duration: {:.1}s", stats.duration_secs);
    info!(
        "  Frames: {} captured, {} sent, {} dropped",
        stats.frames_captured, stats.frames_sent, stats.frames_dropped
    );
    info!("  Reconnects: {}", stats.reconnects);
    info!("  Transcript segments: {}", stats.transcript_segments_count);
    info!("  Concepts: {}", stats.concepts_count);

    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::ConnectionChanged { state, attempt } => {
            info!("Connection {} (attempt {})", state, attempt)
        }
        SessionEvent::SessionStarted { session_id } => info!("Session {}", session_id),
        SessionEvent::Transcript { text, is_final: true } => println!("{text}"),
        SessionEvent::Transcript { text, is_final: false } => println!("... {text}"),
        SessionEvent::Concepts(concepts) => {
            for concept in concepts {
                println!("  [concept] {} (difficulty {})", concept.name, concept.difficulty);
            }
        }
        SessionEvent::CurrentConcept(concept) => println!("  [now] {}", concept.name),
        SessionEvent::ExplanationReady {
            concept,
            explanation,
        } => {
            println!("== {concept} ==");
            println!("{}", explanation.explanation);
            for example in &explanation.examples {
                println!("  e.g. {example}");
            }
            for misconception in &explanation.misconceptions {
                println!("  not: {misconception}");
            }
            if !explanation.related_concepts.is_empty() {
                println!("  see also: {}", explanation.related_concepts.join(", "));
            }
        }
        SessionEvent::ExplanationFailed { concept, error } => {
            warn!("Explanation for '{}' failed: {}", concept, error)
        }
        SessionEvent::Error(e) => error!("{}", e),
    }
}
