use crate::Environment;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Install color-eyre panic and error report handlers.
///
/// Call this before any fallible operation in a binary so startup errors
/// render with context. Safe to call once per process.
pub fn install_color_eyre() {
    if let Err(e) = color_eyre::install() {
        eprintln!("Failed to install color-eyre: {}", e);
    }
}

/// Initialize tracing with environment-aware configuration
///
/// - **Production** (`APP_ENV=production`): JSON format for log
///   aggregation, module targets hidden.
/// - **Development** (default): pretty-printed, module targets shown.
///
/// `RUST_LOG` overrides the default filter in both modes.
///
/// This function is infallible - if tracing is already initialized, it
/// silently continues (common in tests).
pub fn init_tracing(environment: &Environment) {
    let is_production = environment.is_production();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if is_production {
            EnvFilter::new("info,tower_http=info,sea_orm=warn,bollard=warn")
        } else {
            EnvFilter::new("debug,tower_http=debug,sea_orm=info,bollard=info")
        }
    });

    let result = if is_production {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .pretty()
            .try_init()
    };

    match result {
        Ok(_) => {
            info!("Tracing initialized. Environment: {:?}", environment);
        }
        Err(_) => {
            debug!("Tracing already initialized, skipping re-initialization");
        }
    }
}
