use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use shotlist_core::{
    CancelHandle, Collaborators, Intent, Job, ModelChain, PipelineConfig, Request, ResponseStatus,
    collaborators::{ObjectStore, SpeechRecognizer, WebSearch},
    events::{BusConfig, EnrichedEvent, EventBus, Visibility},
    types::MediaSource,
};
use tokio::{
    fs,
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc::UnboundedReceiver,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::{
        ChatVisionScorer, FfmpegExtractor, HttpAudioAnalyzer, HttpObjectStore, HttpWebSearch,
        WhisperCli,
    },
    provider::Provider,
    settings::ServiceSettings,
};

mod adapters;
mod cache;
mod provider;
mod settings;

const DEFAULT_PROMPT: &str = "full analysis";

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Doubao,
    Openai,
    Gemini,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Doubao => Provider::Doubao,
            CliProvider::Openai => Provider::Openai,
            CliProvider::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum CliTask {
    Breakdown,
    Hook,
    Search,
    Report,
}

impl From<CliTask> for Intent {
    fn from(task: CliTask) -> Self {
        match task {
            CliTask::Breakdown => Intent::Breakdown,
            CliTask::Hook => Intent::HookAnalysis,
            CliTask::Search => Intent::Search,
            CliTask::Report => Intent::Report,
        }
    }
}

#[derive(Parser)]
#[command(name = "shotlist")]
#[command(about = "Break short videos into scenes, score their opening hook, and compile a report")]
struct Cli {
    /// Video URL or local file path
    media: Option<String>,

    /// What to ask about the video (e.g. "how strong is the hook?")
    #[arg(short = 'q', long)]
    prompt: Option<String>,

    /// Run these analyses instead of inferring them from the prompt
    #[arg(short, long, value_enum, value_delimiter = ',')]
    task: Vec<CliTask>,

    /// AI provider for vision analysis
    #[arg(short, long, default_value = "doubao")]
    provider: CliProvider,

    /// Recompute results even when this session already has them
    #[arg(short, long)]
    force: bool,

    /// Transcribe speech with the whisper CLI using this model (e.g. "small")
    #[arg(short, long)]
    whisper: Option<String>,

    /// Keep the session open and read follow-up requests from stdin
    #[arg(short, long)]
    interactive: bool,

    /// Also write the final output to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn init_tracing() {
    // Colored output for terminals, JSON for log collectors
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shotlist=warn,shotlist_core=warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Env config, with the provider's models as the chain unless one is configured.
fn pipeline_config(provider: &Provider) -> PipelineConfig {
    let mut config = PipelineConfig::from_env();
    if std::env::var("SHOTLIST_VISION_MODELS").is_err() {
        config.vision_chain = ModelChain::new(provider.config().models.iter().copied())
            .with_attempts(config.vision_chain.attempts_per_model);
    }
    config
}

fn build_collaborators(
    settings: &ServiceSettings,
    vision: ChatVisionScorer,
    whisper_model: Option<&str>,
) -> Collaborators {
    Collaborators {
        extractor: Arc::new(FfmpegExtractor::new(settings.max_frames)),
        speech: whisper_model.map(|model| {
            Arc::new(WhisperCli::new(&settings.whisper_bin, model)) as Arc<dyn SpeechRecognizer>
        }),
        vision: Arc::new(vision),
        audio: Arc::new(HttpAudioAnalyzer::new(settings.audio_url.clone())),
        store: settings.upload_url.clone().map(|url| {
            Arc::new(HttpObjectStore::new(
                url,
                settings.upload_public_url.clone(),
                settings.upload_token.clone(),
            )) as Arc<dyn ObjectStore>
        }),
        search: settings.search_url.clone().map(|url| {
            Arc::new(HttpWebSearch::new(url, settings.search_key.clone())) as Arc<dyn WebSearch>
        }),
    }
}

fn print_event(pb: &ProgressBar, event: &EnrichedEvent) {
    let Some(text) = event.event.display_text() else {
        return;
    };
    match event.event.visibility() {
        Visibility::Notice => pb.println(format!("{} {}", style("!").yellow().bold(), text)),
        Visibility::StageOutput => pb.println(format!("\n{}\n", text)),
    }
}

/// Splits "<media> <prompt>" when the line starts with something playable.
fn parse_line(line: &str) -> Request {
    let (first, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let looks_like_media = first.starts_with("http://")
        || first.starts_with("https://")
        || Path::new(first).is_file();

    if looks_like_media {
        let prompt = if rest.trim().is_empty() {
            DEFAULT_PROMPT
        } else {
            rest.trim()
        };
        Request::new(prompt).with_media(MediaSource::parse(first))
    } else {
        Request::new(line)
    }
}

struct Session {
    job: Job,
    events: UnboundedReceiver<Arc<EnrichedEvent>>,
    cancel: CancelHandle,
    stopping: Arc<AtomicBool>,
    output: Option<PathBuf>,
}

impl Session {
    /// Runs one request, streaming what passes the output filters.
    async fn run(&mut self, request: Request) -> Result<bool> {
        self.stopping.store(false, Ordering::SeqCst);
        self.cancel.reset();

        let started = Instant::now();
        let spinner = create_spinner("Analyzing...");
        let handled = {
            let run = self.job.handle(request);
            tokio::pin!(run);
            loop {
                tokio::select! {
                    handled = &mut run => break handled,
                    Some(event) = self.events.recv() => print_event(&spinner, &event),
                }
            }
        };
        while let Ok(event) = self.events.try_recv() {
            print_event(&spinner, &event);
        }
        spinner.finish_and_clear();

        let response = match handled {
            Ok(response) => response,
            Err(e) => {
                eprintln!("{} {}", style("Error:").red().bold(), e);
                return Ok(false);
            }
        };

        if !response.reused.is_empty() {
            let reused: Vec<String> = response.reused.iter().map(ToString::to_string).collect();
            println!(
                "{} Reused {}",
                style("✓").green().bold(),
                style(reused.join(", ")).dim()
            );
        }
        let elapsed = style(format!("[{}]", format_duration(started.elapsed()))).dim();
        match &response.status {
            ResponseStatus::Completed => {
                println!("{} Done {}", style("✓").green().bold(), elapsed)
            }
            ResponseStatus::Partial { explanation } => println!(
                "{} Partial result: {} {}",
                style("!").yellow().bold(),
                explanation,
                elapsed
            ),
            ResponseStatus::Cancelled => println!(
                "{} Cancelled; finished stages are kept {}",
                style("✗").red().bold(),
                elapsed
            ),
        }

        if let Some(path) = &self.output {
            fs::write(path, &response.output).await?;
            println!(
                "{} {}",
                style("Saved:").dim(),
                style(path.display()).cyan()
            );
        }

        Ok(response.status != ResponseStatus::Cancelled)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let provider: Provider = cli.provider.clone().into();

    if cli.media.is_none() && !cli.interactive {
        bail!("pass a video URL or file path, or start an --interactive session");
    }

    // Validate API key early
    let vision = match ChatVisionScorer::new(&provider) {
        Ok(vision) => vision,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    let settings = ServiceSettings::from_env();
    let collaborators = build_collaborators(&settings, vision, cli.whisper.as_deref());
    let (job, cancel) = Job::new(pipeline_config(&provider), collaborators);
    let (bus, events) = EventBus::with_response_channel(BusConfig {
        session_id: job.id(),
    });

    println!(
        "\n{}  {}\n",
        style("shotlist").cyan().bold(),
        style("Short Video Analyzer").dim()
    );
    println!(
        "{} Vision: {} {}",
        style("✓").green().bold(),
        provider.name(),
        style(format!("({})", provider.config().models.join(" → "))).dim()
    );
    if cli.whisper.is_none() {
        println!(
            "{} Speech recognition off {}",
            style("!").yellow().bold(),
            style("(use --whisper <model>)").dim()
        );
    }
    println!("{}", style("─".repeat(60)).dim());

    let stopping = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        let stopping = stopping.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if stopping.swap(true, Ordering::SeqCst) {
                    std::process::exit(130);
                }
                cancel.cancel();
                eprintln!(
                    "\n{} Stopping after the current stage (Ctrl-C again to quit)",
                    style("!").yellow().bold()
                );
            }
        });
    }

    let mut session = Session {
        job: job.with_bus(bus),
        events,
        cancel,
        stopping,
        output: cli.output.clone(),
    };

    if let Some(media) = &cli.media {
        let mut request = Request::new(cli.prompt.as_deref().unwrap_or(DEFAULT_PROMPT))
            .with_media(MediaSource::parse(media))
            .with_intents(cli.task.iter().cloned().map(Intent::from));
        if cli.force {
            request = request.forced();
        }
        let finished = session.run(request).await?;
        if !cli.interactive {
            if !finished {
                std::process::exit(1);
            }
            return Ok(());
        }
    }

    println!(
        "{}",
        style("Ask a follow-up, paste another video, or type \"exit\".").dim()
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            _ => {}
        }
        let mut request = parse_line(line);
        if cli.force {
            request = request.forced();
        }
        session.run(request).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_starting_with_a_url_carry_media() {
        let request = parse_line("https://cdn.test/a.mp4 how is the hook?");
        assert_eq!(
            request.media,
            Some(MediaSource::Remote {
                url: "https://cdn.test/a.mp4".to_string()
            })
        );
        assert_eq!(request.text, "how is the hook?");

        let bare = parse_line("https://cdn.test/a.mp4");
        assert_eq!(bare.text, DEFAULT_PROMPT);
    }

    #[test]
    fn plain_lines_are_follow_ups() {
        let request = parse_line("now give me the report");
        assert!(request.media.is_none());
        assert_eq!(request.text, "now give me the report");
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
