//! `governd` CLI/daemon: hash-chained ledger append/read, segment cut +
//! attestation, offline verification, and governance state inspection,
//! plus an HTTP status/metrics surface.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use clap::{Args, Parser, Subcommand};
use ed25519_dalek::VerifyingKey;
use prometheus::Encoder;
use serde::Serialize;
use trustcore_core::attestor::{
    self, DeterministicTestKeyProvider, EnvironmentKeyProvider, KeyProvider,
};
use trustcore_core::governance::GovernanceEngine;
use trustcore_core::ledger::PersistentLedger;
use trustcore_spec::envelope::{create_envelope, create_envelope_from_str, EnvelopeContext, EnvelopeInput};
use trustcore_spec::{hex_lower, hex_to_bytes};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Clone)]
struct DaemonMetrics {
    registry: prometheus::Registry,
    disk_usage_bytes: prometheus::IntGauge,
    governance_mode: prometheus::IntGauge,
    ledger_length: prometheus::IntGauge,
}

impl DaemonMetrics {
    fn new() -> Self {
        let registry = prometheus::Registry::new();
        let disk_usage_bytes = prometheus::IntGauge::new(
            "governd_disk_usage_bytes",
            "Estimated disk usage of the ledger directory",
        )
        .unwrap();
        let governance_mode = prometheus::IntGauge::new(
            "governd_governance_mode",
            "Current governance mode rank (0=NORMAL .. 3=HARD_FREEZE)",
        )
        .unwrap();
        let ledger_length = prometheus::IntGauge::new(
            "governd_ledger_length",
            "Number of records currently stored in the watched chain",
        )
        .unwrap();

        registry
            .register(Box::new(disk_usage_bytes.clone()))
            .expect("register disk_usage_bytes");
        registry
            .register(Box::new(governance_mode.clone()))
            .expect("register governance_mode");
        registry
            .register(Box::new(ledger_length.clone()))
            .expect("register ledger_length");

        Self {
            registry,
            disk_usage_bytes,
            governance_mode,
            ledger_length,
        }
    }

    fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

struct StatusState {
    metrics: DaemonMetrics,
    ledger: Arc<PersistentLedger>,
    governance: Arc<GovernanceEngine>,
}

/// Build a governance engine whose reactions are durably audited: every
/// emitted [`trustcore_core::governance`] reaction is turned into an audit
/// envelope via [`GovernanceReaction::audit_event`] and appended to the
/// ledger (§4.4: "every reaction must produce exactly one audit envelope").
fn governance_engine_with_ledger_sink(ledger: Arc<PersistentLedger>) -> GovernanceEngine {
    GovernanceEngine::new(now_millis()).with_reaction_sink(Box::new(move |reaction| {
        let mut context = EnvelopeContext::new();
        context.insert(
            "reason".to_string(),
            serde_json::Value::String(reaction.reason.clone()),
        );
        context.insert(
            "mode".to_string(),
            serde_json::Value::String(format!("{:?}", reaction.mode)),
        );
        let envelope = create_envelope(
            reaction.audit_event(),
            EnvelopeInput {
                trace_id: format!("governance-reaction-{}", reaction.at),
                severity: Some(reaction.severity()),
                context: Some(context),
                ..Default::default()
            },
        )
        .expect("governance reactions always carry a non-empty synthesized trace id");
        if let Err(err) = ledger.append(envelope, reaction.at) {
            tracing::warn!(error = %err, "failed to append governance reaction to ledger");
        }
    }))
}

#[derive(Serialize)]
struct HealthReport {
    status: &'static str,
    log_length: usize,
    disk_usage_bytes: u64,
    governance_mode: String,
}

/// `governd` command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Override log level (e.g. info, debug, trace).
    #[arg(long, env = "GOVERND_LOG_LEVEL")]
    log_level: Option<String>,
    /// HTTP bind address for metrics and health endpoints, or "off".
    #[arg(
        long,
        env = "GOVERND_STATUS_ADDR",
        default_value = "127.0.0.1:9090",
        help = "Bind address for /metrics, /healthz, and /readyz"
    )]
    status_addr: String,
    /// Directory backing the persistent ledger.
    #[arg(long, env = "GOVERND_LEDGER_DIR", default_value = "./governd-data")]
    ledger_dir: String,
    /// Chain id to operate on.
    #[arg(long, env = "GOVERND_CHAIN_ID", default_value = "default")]
    chain_id: String,
    /// Signing key flags, shared by `attest` and `daemon`.
    #[command(flatten)]
    signing: SigningCli,
    /// Subcommand.
    #[command(subcommand)]
    command: Commands,
}

/// Commands for `governd`.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the status/metrics HTTP surface and keep the ledger open.
    Daemon,
    /// Append one audit event from a taxonomy event name and trace id.
    Append {
        /// Dotted taxonomy event, e.g. `auth.login`.
        #[arg(long)]
        event: String,
        /// Correlation id.
        #[arg(long)]
        trace_id: String,
        /// Optional JSON context object.
        #[arg(long)]
        context: Option<String>,
    },
    /// Read a contiguous range of records.
    Read {
        /// Start sequence number.
        #[arg(short, long, default_value = "0")]
        from_seq: u64,
        /// Number of records.
        #[arg(short, long, default_value = "10")]
        count: u64,
    },
    /// Cut and sign a segment.
    Attest {
        /// Start sequence number, inclusive.
        #[arg(long)]
        seq_start: u64,
        /// End sequence number, inclusive.
        #[arg(long)]
        seq_end: u64,
        /// Output segment name stamped on the manifest.
        #[arg(long)]
        name: String,
    },
    /// Verify a previously-cut segment offline against its manifest.
    Verify {
        /// Path to the segment JSONL file.
        #[arg(long)]
        jsonl: String,
        /// Path to the attestation manifest JSON file.
        #[arg(long)]
        manifest: String,
        /// Hex-encoded Ed25519 public key to verify against.
        #[arg(long)]
        public_key: String,
    },
    /// Print the current governance state as JSON.
    GovernanceState,
}

/// Signing key source flags.
#[derive(Args, Debug, Clone)]
struct SigningCli {
    /// Use a fixed, non-production deterministic key (local dev only).
    #[arg(long, conflicts_with = "env_key")]
    dev_key: bool,
    /// Read the signing key from `ATTESTATION_PRIVATE_KEY`.
    #[arg(long)]
    env_key: bool,
}

impl SigningCli {
    fn resolve(&self) -> anyhow::Result<Box<dyn KeyProvider>> {
        match (self.dev_key, self.env_key) {
            (true, _) => Ok(Box::new(DeterministicTestKeyProvider::new([7u8; 32]))),
            (false, true) => Ok(Box::new(EnvironmentKeyProvider::from_env()?)),
            (false, false) => anyhow::bail!("pass --dev-key or --env-key to select a signing key source"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let ledger = Arc::new(PersistentLedger::open(&cli.ledger_dir, cli.chain_id.clone())?);
    let governance = Arc::new(governance_engine_with_ledger_sink(ledger.clone()));

    match cli.command {
        Commands::Daemon => daemon(ledger, governance, cli.status_addr).await?,
        Commands::Append { event, trace_id, context } => {
            append_event(&ledger, &governance, &event, &trace_id, context.as_deref())?
        }
        Commands::Read { from_seq, count } => read_records(&ledger, from_seq, count),
        Commands::Attest { seq_start, seq_end, name } => {
            attest_segment(&ledger, &cli.signing, seq_start, seq_end, &name)?
        }
        Commands::Verify { jsonl, manifest, public_key } => {
            verify_segment_offline(&jsonl, &manifest, &public_key)?
        }
        Commands::GovernanceState => {
            println!("{}", serde_json::to_string_pretty(&governance.state())?);
        }
    }
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let level = cli
        .log_level
        .as_deref()
        .map(|lvl| lvl.to_ascii_uppercase())
        .map(|lvl| match lvl.as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "INFO" => Level::INFO,
            _ => Level::INFO,
        })
        .unwrap_or_else(|| match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        });
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(env_filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn append_event(
    ledger: &PersistentLedger,
    governance: &GovernanceEngine,
    event: &str,
    trace_id: &str,
    context: Option<&str>,
) -> anyhow::Result<()> {
    let now = now_millis();
    if !governance.is_execution_allowed(now).allowed {
        anyhow::bail!("append blocked by governance mode {:?}", governance.state().mode);
    }
    let context = context
        .map(|raw| serde_json::from_str(raw))
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid --context JSON: {e}"))?;
    let envelope = create_envelope_from_str(
        event,
        EnvelopeInput {
            trace_id: trace_id.to_string(),
            context,
            ..Default::default()
        },
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    let record = ledger.append(envelope, now)?;
    info!(seq = record.seq, record_hash = %hex_lower(&record.record_hash), "appended");
    println!("{}", serde_json::to_string_pretty(&trustcore_spec::record::record_to_wire_json(&record))?);
    Ok(())
}

fn read_records(ledger: &PersistentLedger, from_seq: u64, count: u64) {
    for record in ledger.get_records(from_seq, count) {
        let line = trustcore_spec::record::record_to_jsonl_line(&record);
        print!("{}", String::from_utf8_lossy(&line));
    }
}

fn attest_segment(
    ledger: &PersistentLedger,
    signing: &SigningCli,
    seq_start: u64,
    seq_end: u64,
    name: &str,
) -> anyhow::Result<()> {
    let records = ledger.get_records(seq_start, seq_end - seq_start + 1);
    let chain_id = records
        .first()
        .map(|r| r.chain_id.clone())
        .ok_or_else(|| anyhow::anyhow!("no records in requested range"))?;
    let segment = trustcore_spec::record::cut_segment(&chain_id, &records, seq_start, seq_end)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let provider = signing.resolve()?;
    let manifest = attestor::sign_segment(&segment, name, provider.as_ref(), now_millis());

    std::fs::write(name, &segment.bytes)?;
    std::fs::write(format!("{name}.manifest.json"), serde_json::to_vec_pretty(&manifest)?)?;
    info!(segment = name, public_key_id = %manifest.public_key_id, "segment attested");
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

fn verify_segment_offline(jsonl_path: &str, manifest_path: &str, public_key_hex: &str) -> anyhow::Result<()> {
    let jsonl = std::fs::read(jsonl_path)?;
    let manifest = serde_json::from_slice(&std::fs::read(manifest_path)?)?;
    let key_bytes: [u8; 32] = hex_to_bytes(public_key_hex)
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .try_into()
        .map_err(|_| anyhow::anyhow!("public key must be 32 bytes"))?;
    let public_key = VerifyingKey::from_bytes(&key_bytes)?;
    let outcome = attestor::verify_segment(&jsonl, &manifest, &public_key);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn daemon(
    ledger: Arc<PersistentLedger>,
    governance: Arc<GovernanceEngine>,
    status_addr: String,
) -> anyhow::Result<()> {
    let metrics = DaemonMetrics::new();
    metrics.disk_usage_bytes.set(ledger.storage_usage_bytes() as i64);
    metrics.governance_mode.set(governance.state().mode.rank() as i64);

    let state = Arc::new(StatusState { metrics, ledger, governance: governance.clone() });

    let status_listener = match status_addr.as_str() {
        "off" | "disabled" => None,
        _ => Some(tokio::net::TcpListener::bind(&status_addr).await?),
    };
    if let Some(listener) = status_listener {
        let local_addr = listener.local_addr()?;
        info!("status/metrics server listening on {local_addr}");
        start_status_server(listener, state.clone()).await;
    } else {
        info!("status/metrics server disabled");
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
    }
    Ok(())
}

async fn start_status_server(listener: tokio::net::TcpListener, state: Arc<StatusState>) {
    let app = Router::new()
        .route("/metrics", get(metrics_endpoint))
        .route("/healthz", get(health_endpoint))
        .route("/readyz", get(ready_endpoint))
        .with_state(state);

    if let Err(err) = axum::serve(listener, app.into_make_service()).await {
        tracing::warn!(error = %err, "status server terminated");
    }
}

fn current_health(state: &StatusState, status: &'static str) -> HealthReport {
    HealthReport {
        status,
        log_length: state.ledger.len(),
        disk_usage_bytes: state.ledger.storage_usage_bytes(),
        governance_mode: format!("{:?}", state.governance.state().mode),
    }
}

async fn metrics_endpoint(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    state.metrics.governance_mode.set(state.governance.state().mode.rank() as i64);
    state.metrics.ledger_length.set(state.ledger.len() as i64);
    state.metrics.disk_usage_bytes.set(state.ledger.storage_usage_bytes() as i64);
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to encode metrics: {err}"))
            .into_response(),
    }
}

async fn health_endpoint(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    Json(current_health(&state, "ok"))
}

async fn ready_endpoint(State(state): State<Arc<StatusState>>) -> impl IntoResponse {
    let gate = state.governance.is_execution_allowed(now_millis());
    let status = if gate.allowed { "ready" } else { "not_ready" };
    Json(current_health(&state, status))
}
