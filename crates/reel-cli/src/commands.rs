//! CLI command implementations

use crate::output::format_output;
use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reel_core::ads::AdPoint;
use reel_core::drm::complete;
use reel_core::simulate::{AdOutcome, SimulatedEngine, SimulatedSdk};
use reel_core::types::key_systems;
use reel_core::{
    detect_capabilities, AdSettings, BreakReport, CapabilitySet, DrmType, FairPlayAdapter, KeySystemAdapter,
    KeySystems, LicenseRequest, PlaybackSession, PlaybackSource, PlayerDocument, PlayerOptions, PriorityKey, StaticProbe,
    StreamSelector,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::Tabled;
use tracing::{info, warn};

/// Load a player document from a path or an http(s) URL
async fn load_document(source: &str) -> anyhow::Result<PlayerDocument> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let body = reqwest::get(source).await?.error_for_status()?.text().await?;
        return Ok(PlayerDocument::from_json(&body)?);
    }
    PlayerDocument::from_file(source).with_context(|| format!("reading player document {}", source))
}

/// Fixed probe answers for common runtimes
fn browser_probe(browser: &str) -> anyhow::Result<StaticProbe> {
    let mse = StaticProbe {
        media_source: true,
        ..Default::default()
    };
    let probe = match browser.to_lowercase().as_str() {
        "chrome" | "firefox" => mse.with_key_system(key_systems::WIDEVINE),
        "edge" => mse
            .with_key_system(key_systems::WIDEVINE)
            .with_key_system(key_systems::PLAYREADY),
        "safari" => StaticProbe { hls: true, ..mse }.with_key_system(key_systems::FAIRPLAY_1_0),
        other => bail!("unknown browser preset: {}", other),
    };
    Ok(probe)
}

fn write_or_encode(bytes: &[u8], output: Option<&Path>) -> anyhow::Result<Option<String>> {
    match output {
        Some(path) => {
            std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
            Ok(None)
        }
        None => Ok(Some(STANDARD.encode(bytes))),
    }
}

#[derive(Serialize, Tabled)]
struct StreamRow {
    rank: usize,
    key: String,
    mime: &'static str,
    key_systems: String,
    url: String,
}

#[derive(Serialize)]
struct SelectReport {
    capabilities: Vec<String>,
    streams: Vec<StreamRow>,
}

/// Rank a document's streams for a runtime
pub async fn select(
    document: &str,
    caps: &[String],
    browser: &str,
    history: &[String],
    format: &str,
) -> anyhow::Result<()> {
    let document = load_document(document).await?;
    let item = document.current_item()?;

    let capabilities: CapabilitySet = if caps.is_empty() {
        detect_capabilities(&browser_probe(browser)?).await
    } else {
        caps.iter().collect()
    };
    let history = history
        .iter()
        .map(|key| key.parse::<PriorityKey>())
        .collect::<Result<Vec<_>, _>>()?;

    let http = reqwest::Client::new();
    let streams: Vec<StreamRow> = StreamSelector::new(&item.streams, &capabilities, &history)
        .enumerate()
        .map(|(i, stream)| {
            let source = PlaybackSource::from_stream(&stream, &http);
            StreamRow {
                rank: i + 1,
                key: stream.priority_key().to_string(),
                mime: source.mime_type,
                key_systems: source
                    .key_systems
                    .map(|ks| ks.names().join(","))
                    .unwrap_or_default(),
                url: source.src,
            }
        })
        .collect();

    if streams.is_empty() {
        warn!(candidates = item.streams.len(), "No playable stream");
    }

    let report = SelectReport {
        capabilities: capabilities.iter().map(str::to_string).collect(),
        streams,
    };
    let text = || {
        let mut out = format!("Capabilities: {}\n", report.capabilities.join(", "));
        if report.streams.is_empty() {
            out.push_str("No playable stream\n");
        }
        for row in &report.streams {
            out.push_str(&format!("  {}. {} {} ({})\n", row.rank, row.key, row.url, row.mime));
        }
        out
    };
    println!("{}", format_output(&report, &report.streams, format, text));
    Ok(())
}

#[derive(Serialize, Tabled)]
struct BreakRow {
    point: f64,
    category: String,
    attempts: u32,
    played: u32,
    resumed: bool,
}

impl From<&BreakReport> for BreakRow {
    fn from(report: &BreakReport) -> Self {
        Self {
            point: report.point.seconds(),
            category: report.point.category.to_string(),
            attempts: report.attempts,
            played: report.played,
            resumed: report.resumed,
        }
    }
}

#[derive(Serialize)]
struct ScheduleReport {
    points: Vec<AdPoint>,
    breaks: Vec<BreakReport>,
}

fn parse_outcome(arg: &str) -> anyhow::Result<(String, AdOutcome)> {
    let (id, outcome) = arg
        .split_once('=')
        .with_context(|| format!("expected id=outcome, got {}", arg))?;
    let outcome: AdOutcome = serde_json::from_value(serde_json::Value::String(outcome.to_string()))
        .with_context(|| format!("unknown ad outcome: {}", outcome))?;
    Ok((id.to_string(), outcome))
}

/// Simulate ad breaks along a content timeline
pub async fn schedule(
    document: &str,
    duration: f64,
    step: f64,
    outcomes: &[String],
    format: &str,
) -> anyhow::Result<()> {
    if step <= 0.0 {
        bail!("step must be positive");
    }
    let document = load_document(document).await?;

    let mut sdk = SimulatedSdk::new();
    for arg in outcomes {
        let (id, outcome) = parse_outcome(arg)?;
        sdk = sdk.with_outcome(id, outcome);
    }

    let engine = Arc::new(SimulatedEngine::new());
    let capabilities: CapabilitySet = ["hls", "dash", "mss", "widevine", "playready", "fairplay"]
        .into_iter()
        .collect();
    let session = PlaybackSession::new(
        &document,
        &capabilities,
        engine.clone(),
        PlayerOptions::default(),
        &[],
    )?;
    let scheduler = session.attach_ads(Arc::new(sdk), AdSettings::from_features(document.features()));

    session.start().await?;

    let mut breaks = Vec::new();
    if let Some(report) = session.activate_ads().await? {
        breaks.push(report);
    }

    let mut now = 0.0;
    while now <= duration {
        engine.set_time(now);
        let started = session
            .handle_time_update(now)
            .is_some_and(|outcome| outcome.started.is_some());
        if started {
            if let Some(report) = scheduler.wait_for_break().await {
                breaks.push(report);
            }
        }
        // let spawned preloads make progress between time updates
        tokio::task::yield_now().await;
        now += step;
    }
    session.close();
    info!(breaks = breaks.len(), "Timeline finished");

    let report = ScheduleReport {
        points: scheduler.schedule().ad_points.clone(),
        breaks,
    };
    let rows: Vec<BreakRow> = report.breaks.iter().map(BreakRow::from).collect();
    let text = || {
        let mut out = format!("Ad points: {}\n", report.points.len());
        for row in &rows {
            out.push_str(&format!(
                "  {:>8.2}s {:<12} played {}/{} {}\n",
                row.point,
                row.category,
                row.played,
                row.attempts,
                if row.resumed { "" } else { "(content not resumed)" }
            ));
        }
        out
    };
    println!("{}", format_output(&report, &rows, format, text));
    Ok(())
}

#[derive(Serialize, Tabled)]
struct LicenseReport {
    key_system: String,
    license_url: String,
    bytes: usize,
    #[tabled(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    base64: Option<String>,
}

/// Request a license with a recorded key message
pub async fn license(
    url: &str,
    drm: &str,
    challenge: &Path,
    content_id: Option<&str>,
    output: Option<PathBuf>,
    format: &str,
) -> anyhow::Result<()> {
    let drm: DrmType = drm.parse()?;
    let key_message = std::fs::read(challenge).with_context(|| format!("reading {}", challenge.display()))?;

    let systems = KeySystems::for_drm(drm, url, reqwest::Client::new());
    let adapter = systems
        .get(drm.key_system())
        .with_context(|| format!("no adapter for {}", drm))?;

    let mut request = LicenseRequest::new(&key_message);
    if let Some(content_id) = content_id {
        request = request.with_content_id(content_id);
    }

    let (tx, rx) = tokio::sync::oneshot::channel();
    complete(adapter.get_license(request), move |outcome| {
        let _ = tx.send(outcome);
    })
    .await;
    let license = rx.await??;

    let report = LicenseReport {
        key_system: adapter.key_system().to_string(),
        license_url: adapter.license_url().to_string(),
        bytes: license.len(),
        base64: write_or_encode(&license, output.as_deref())?,
    };
    let text = || {
        format!(
            "{} license from {}: {} bytes{}",
            report.key_system,
            report.license_url,
            report.bytes,
            report.base64.as_ref().map(|b| format!("\n{}", b)).unwrap_or_default()
        )
    };
    println!("{}", format_output(&report, std::slice::from_ref(&report), format, text));
    Ok(())
}

#[derive(Serialize, Tabled)]
struct CertificateReport {
    certificate_url: String,
    bytes: usize,
    #[tabled(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    base64: Option<String>,
}

/// Fetch the FairPlay certificate for a license server
pub async fn certificate(url: &str, output: Option<PathBuf>, format: &str) -> anyhow::Result<()> {
    let adapter = FairPlayAdapter::new(url, reqwest::Client::new());
    let certificate = adapter.get_certificate().await?;

    let report = CertificateReport {
        certificate_url: adapter.certificate_url().to_string(),
        bytes: certificate.len(),
        base64: write_or_encode(&certificate, output.as_deref())?,
    };
    let text = || {
        format!(
            "Certificate from {}: {} bytes{}",
            report.certificate_url,
            report.bytes,
            report.base64.as_ref().map(|b| format!("\n{}", b)).unwrap_or_default()
        )
    };
    println!("{}", format_output(&report, std::slice::from_ref(&report), format, text));
    Ok(())
}
