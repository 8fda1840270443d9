use std::sync::Arc;

use bazaar_core::config::Config;

#[tokio::main]
async fn main() -> Result<(), bazaar_core::Error> {
    // Without a credential there is nothing to do.
    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    bazaar_core::logging::init("bazaar")?;

    bazaar_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| bazaar_core::Error::Platform(format!("telegram bot failed: {e}")))?;

    tracing::info!("bazaar stopped");
    Ok(())
}
