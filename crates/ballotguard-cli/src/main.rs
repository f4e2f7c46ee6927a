use anyhow::{bail, Context, Result};
use ballotguard_api::{ApiClient, RetryPolicy};
use ballotguard_core::FaceEngine;
use ballotguard_hw::{FrameSource, V4l2Camera, V4l2Provider};
use ballotguard_verify::{
    cast_verified_vote, BiometricVerifier, CaptureSession, DuplicateResolver, EngineAnalyzer,
    FacialVerifier, PlatformAuthenticator, UnsupportedAuthenticator, WebAuthnBridge,
    WebAuthnVerifier,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

mod config;
use config::Config;

#[derive(Parser)]
#[command(name = "ballotguard", about = "Verified vote casting and device diagnostics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Strategy {
    /// Facial capture with duplicate-vote detection
    Face,
    /// Platform-authenticator (WebAuthn) ceremony
    Passkey,
}

#[derive(Subcommand)]
enum Commands {
    /// Run biometric verification and cast a vote
    Vote {
        /// Award being voted in
        #[arg(long)]
        award: String,
        /// Nominee receiving the vote
        #[arg(long)]
        nominee: String,
        /// Voting member id, excluded from self-matching
        #[arg(long)]
        subject: String,
        #[arg(long, value_enum, default_value = "face")]
        strategy: Strategy,
    },
    /// Report device and deployment capabilities
    Probe,
    /// Open the camera and grab one frame
    CameraTest,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Vote {
            award,
            nominee,
            subject,
            strategy,
        } => vote(&config, &award, &nominee, &subject, strategy).await,
        Commands::Probe => probe(&config).await,
        Commands::CameraTest => camera_test(&config),
    }
}

async fn vote(
    config: &Config,
    award: &str,
    nominee: &str,
    subject: &str,
    strategy: Strategy,
) -> Result<()> {
    let base = Url::parse(&config.api_base_url)
        .with_context(|| format!("invalid BALLOTGUARD_API_URL: {}", config.api_base_url))?;
    let client = Arc::new(ApiClient::new(base));

    let verifier: Box<dyn BiometricVerifier> = match strategy {
        Strategy::Face => {
            let analyzer = EngineAnalyzer::spawn(config.model_dir.clone(), config.thresholds());
            let resolver = Arc::new(DuplicateResolver::new(
                client.clone(),
                config.match_threshold,
            ));
            let session = Arc::new(CaptureSession::new(
                Arc::new(analyzer),
                resolver,
                Arc::new(V4l2Provider::new(config.camera_device.clone())),
                config.session_config(),
                award,
                subject,
            ));
            Box::new(FacialVerifier::new(session))
        }
        Strategy::Passkey => {
            let bridge = WebAuthnBridge::new(client.clone(), Arc::new(UnsupportedAuthenticator));
            Box::new(WebAuthnVerifier::new(bridge))
        }
    };

    let retry = RetryPolicy {
        max_retries: config.vote_max_retries,
        base_delay: Duration::from_millis(500),
    };

    match cast_verified_vote(verifier.as_ref(), &client, award, nominee, &retry).await {
        Ok(receipt) => {
            println!("Vote recorded for nominee {} in award {}.", nominee, award);
            if let Some(id) = receipt.vote_id {
                println!("Receipt: {id}");
            }
            Ok(())
        }
        Err(e) => bail!("{e}"),
    }
}

async fn probe(config: &Config) -> Result<()> {
    let cameras = V4l2Camera::list_devices();
    let engine = FaceEngine::new(config.model_dir.clone());
    let authenticator_available = UnsupportedAuthenticator.is_available().await;

    let report = serde_json::json!({
        "cameras": cameras,
        "configuredCamera": config.camera_device,
        "modelDir": config.model_dir.display().to_string(),
        "modelsPresent": engine.models_present(),
        "apiBaseUrl": config.api_base_url,
        "platformAuthenticatorAvailable": authenticator_available,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn camera_test(config: &Config) -> Result<()> {
    println!("Opening {}...", config.camera_device);
    let camera = V4l2Camera::open(&config.camera_device).map_err(|e| anyhow::anyhow!("{e}"))?;
    let (width, height) = camera.dimensions();
    println!("Negotiated {width}x{height}");

    let frame = camera.grab().map_err(|e| anyhow::anyhow!("{e}"))?;
    println!(
        "Captured frame #{}: {}x{}, average brightness {:.1}",
        frame.sequence,
        frame.width,
        frame.height,
        frame.avg_brightness()
    );
    camera.stop();
    Ok(())
}
