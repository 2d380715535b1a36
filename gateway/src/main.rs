use anyhow::Result;
use hotspot_risk::RiskLookup;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod routes;

#[derive(Clone)]
pub struct AppState {
    pub lookup: Arc<RiskLookup>,
}

impl AppState {
    /// Load the model and profile artifacts once; handlers share them read-only
    pub fn load(model_dir: impl AsRef<Path>) -> hotspot_risk::Result<Self> {
        Ok(Self {
            lookup: Arc::new(RiskLookup::from_dir(model_dir)?),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "hotspot_gateway=debug,hotspot_risk=info,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let model_dir = std::env::var("HOTSPOT_MODEL_DIR").unwrap_or_else(|_| "model".to_string());
    let state = AppState::load(&model_dir)?;
    tracing::info!(
        "   Loaded {} hotspots from {}",
        state.lookup.profiles().len(),
        model_dir
    );

    let app = routes::router(state);

    let port = std::env::var("HOTSPOT_GATEWAY_PORT")
        .or_else(|_| std::env::var("PORT"))
        .unwrap_or_else(|_| "18700".to_string());
    let addr = format!("0.0.0.0:{}", port);

    tracing::info!("Hotspot Gateway starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
