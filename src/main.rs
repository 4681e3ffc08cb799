// Chatbridge — binary entry point
// Loads config, starts the Evolution-backed bridge, runs until Ctrl-C.

use chatbridge_lib::atoms::types::StatusChangeKind;
use chatbridge_lib::engine::evolution::EvolutionProvider;
use chatbridge_lib::engine::media::HttpMediaResolver;
use chatbridge_lib::{Bridge, BridgeConfig, EngineError, EngineResult};
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("[main] {}", e);
        std::process::exit(1);
    }
}

async fn run() -> EngineResult<()> {
    let config = BridgeConfig::load()?;

    let provider = EvolutionProvider::new(config.evolution.clone())
        .map_err(|e| EngineError::Config(format!("Evolution provider: {}", e)))?;
    let resolver = HttpMediaResolver::new(config.relay_timeout())?;
    let bridge = Bridge::new(&config, Arc::new(provider), Arc::new(resolver))?;

    bridge.on_status_change("terminal", |change| {
        match &change.change {
            StatusChangeKind::Qr => {
                if let Some(qr) = &change.snapshot.qr_payload {
                    info!("[main] Scan this QR code to link the session:\n{}", qr);
                }
            }
            StatusChangeKind::RequiresManualRestart | StatusChangeKind::LoggedOut => {
                warn!("[main] Session needs a manual restart");
            }
            _ => {}
        }
        Ok(())
    });

    bridge.start().await?;
    info!("[main] Bridge running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("[main] Shutting down");
    bridge.stop().await
}
