// riskgate/src/main.rs
//
// riskgate — risk analysis & mitigation gateway core
//
// Three operational modes:
//   analyze — run one text through the pipeline and print the result
//   tail    — tail a JSONL request feed and process each line
//   replay  — replay a captured JSONL feed at scaled speed
//
// Usage:
//   riskgate --mode analyze --text "Contact me at john.doe@example.com"
//   riskgate --mode tail --path /var/log/gateway/requests.jsonl
//   riskgate --mode replay --path captured.jsonl --speed 10.0

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use riskgate::alerts::{AlertEngine, LogEmailSink};
use riskgate::config::{GatewayConfig, ProcessingMode};
use riskgate::error::GatewayError;
use riskgate::gateway::{ChatCompletionRequest, GatewayService};
use riskgate::store::MemoryRecordStore;
use riskgate::tasks::BackgroundQueue;
use riskgate::upstream::{ChatMessage, EchoProvider};
use riskgate::vault::TokenVault;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "riskgate",
    about   = "Risk analysis & mitigation gateway for LLM traffic",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "analyze")]
    mode: Mode,

    #[arg(long, help = "Text to analyze (analyze mode; stdin when omitted)")]
    text: Option<String>,

    #[arg(long, default_value = "/tmp/riskgate_feed.jsonl",
          help = "JSONL request feed (tail/replay modes)")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,

    #[arg(long, default_value = "/tmp/riskgate_data",
          help = "Vault data directory")]
    data_dir: PathBuf,

    #[arg(long, value_enum, default_value = "balanced", help = "Processing mode")]
    processing_mode: ProcessingMode,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Analyze, // one-shot pipeline run
    Tail,    // tail a live JSONL request feed
    Replay,  // replay a static JSONL feed at scaled speed
}

/// One inbound request line in the tail/replay feeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InboundEvent {
    actor_id:  String,
    timestamp: DateTime<Utc>,
    text:      String,
    #[serde(default)]
    mode:      Option<ProcessingMode>,
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

struct Pipeline {
    service: Arc<GatewayService>,
    mode:    ProcessingMode,
}

impl Pipeline {
    async fn process(&self, event: InboundEvent) {
        let mode = event.mode.unwrap_or(self.mode);
        let request = ChatCompletionRequest {
            messages: vec![ChatMessage { role: "user".into(), content: event.text.clone() }],
            model: None,
            max_tokens: None,
            temperature: None,
            enable_risk_detection: true,
            processing_mode: mode,
            max_risk_score: 7.0,
            sanitize_input: true,
            sanitize_output: false,
            enable_data_access: false,
            data_source_name: None,
            data_query: None,
            data_params: None,
        };

        match self.service.handle_chat(&event.actor_id, request).await {
            Ok(response) => print_result(
                &event.actor_id,
                response.risk_metadata.input_risk_score,
                response.risk_metadata.input_sanitized,
                false,
            ),
            Err(GatewayError::PolicyBlock { risk_score, .. }) => {
                print_result(&event.actor_id, risk_score, false, true)
            }
            Err(e) => warn!("request failed: {e}"),
        }
    }
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_banner() {
    println!("\x1b[1mriskgate\x1b[0m — risk analysis & mitigation gateway");
    println!("  \x1b[90mdetectors: adversarial | pii | bias   vault: aes-256-cbc\x1b[0m\n");
}

fn print_result(actor: &str, score: f64, sanitized: bool, blocked: bool) {
    let (color, verdict) = if blocked {
        ("\x1b[91;1m", "BLOCKED")
    } else if sanitized {
        ("\x1b[93;1m", "SANITIZED")
    } else {
        ("\x1b[92m", "ALLOWED")
    };
    println!("{color}{verdict}\x1b[0m  actor={actor}  risk={score:.2}");
}

async fn print_stats_loop(service: Arc<GatewayService>, mode: ProcessingMode, start: Instant) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let stats = service.agent(mode).statistics();
        println!(
            "\n\x1b[1m── stats  uptime={:.0}s  processed={}  blocked={}  sanitized={}  avg_ms={:.2} ──\x1b[0m",
            start.elapsed().as_secs_f64(),
            stats.total_processed,
            stats.total_blocked,
            stats.total_sanitized,
            stats.avg_processing_ms,
        );
    }
}

async fn vault_sweep_loop(service: Arc<GatewayService>) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
        let swept = service.vault.sweep_expired().await;
        if swept > 0 {
            info!("vault sweep expired {swept} tokens");
        }
    }
}

// ── Event sources ─────────────────────────────────────────────────────────────

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<InboundEvent>, seek_end: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {} // consume existing
    }

    info!("Tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundEvent>(&line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Parse error: {e}"),
                }
            }
            None => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<InboundEvent>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    let mut events: Vec<(f64, InboundEvent)> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(event) = serde_json::from_str::<InboundEvent>(line) {
            let ts = event.timestamp.timestamp_millis() as f64;
            events.push((ts, event));
        }
    }

    if events.is_empty() {
        return Ok(());
    }
    events.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let base_ts = events[0].0;
    let base_wall = Instant::now();

    for (ts, mut event) in events {
        let offset = (ts - base_ts) / speed / 1000.0;
        let target = base_wall + std::time::Duration::from_secs_f64(offset);
        let now = Instant::now();
        if target > now {
            tokio::time::sleep(target - now).await;
        }
        event.timestamp = Utc::now();
        if tx.send(event).await.is_err() {
            break;
        }
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("riskgate=info".parse()?))
        .compact()
        .init();

    let cli = Cli::parse();
    let gateway_config = GatewayConfig::from_env();

    let store = Arc::new(MemoryRecordStore::new());
    let alert_engine = Arc::new(AlertEngine::new(
        gateway_config.alert_webhook_url.clone(),
        Arc::new(LogEmailSink),
    ));
    let (queue, _worker) = BackgroundQueue::start(store.clone(), alert_engine, 16384);
    let vault = Arc::new(TokenVault::open(&cli.data_dir, gateway_config.vault_master_key.clone()).await?);
    let service = Arc::new(GatewayService::new(
        gateway_config,
        vault,
        store,
        queue,
        Arc::new(EchoProvider),
        None,
    )?);

    if matches!(cli.mode, Mode::Analyze) {
        let text = match cli.text {
            Some(text) => text,
            None => {
                let mut buffer = String::new();
                std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer)?;
                buffer
            }
        };
        let result = service.agent(cli.processing_mode).analyze(&text);
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let start = Instant::now();
    let (tx, mut rx) = mpsc::channel::<InboundEvent>(16384);

    print_banner();

    tokio::spawn(print_stats_loop(Arc::clone(&service), cli.processing_mode, start));
    tokio::spawn(vault_sweep_loop(Arc::clone(&service)));

    match cli.mode {
        Mode::Tail => {
            println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}", cli.path.display());
            let path = cli.path.clone();
            tokio::spawn(async move {
                tail_jsonl(path, tx, true).await.ok();
            });
        }
        Mode::Replay => {
            println!(
                "  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x",
                cli.path.display(),
                cli.speed
            );
            let path = cli.path.clone();
            let speed = cli.speed;
            tokio::spawn(async move {
                replay_jsonl(path, tx, speed).await.ok();
            });
        }
        Mode::Analyze => unreachable!(),
    }

    println!("  Press Ctrl+C to stop.\n");

    let pipeline = Arc::new(Pipeline { service, mode: cli.processing_mode });

    // One task per request for parallelism; background jobs outlive them.
    while let Some(event) = rx.recv().await {
        let p = Arc::clone(&pipeline);
        tokio::spawn(async move { p.process(event).await; });
    }

    Ok(())
}
