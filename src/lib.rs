pub mod audit;
pub mod backends;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod hash;
pub mod integrity;
pub mod models;
pub mod normalize;
pub mod records;
pub mod render;
pub mod secret;
pub mod signing;

#[cfg(test)]
mod phi_audit;

pub use error::{PipelineError, SessionWarning};
pub use signing::{Backends, PrescriptionSession, SigningStrategy};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins over the default
/// filter. Returns `false` when a subscriber was already installed.
pub fn init_tracing() -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} signing pipeline v{}", config::APP_NAME, config::APP_VERSION);
    }
    installed
}
