mod bulletin {
    pub mod extract;
    pub mod merge;
}
mod db {
    pub mod coordinate_cache;
    pub mod fact;
    pub mod region_name;
    pub mod util;
}
mod enrich {
    pub mod client;
    pub mod clock;
    pub mod gemini;
    pub mod reply;
    pub mod service;
    #[cfg(test)]
    pub mod testing;
}
mod resolve {
    pub mod orchestrator;
    pub mod report;
}
mod service {
    pub mod log_service;
    pub mod resolve_service;
    pub mod var_service;
}
mod error;
mod prelude;

use prelude::*;
use service::log_service::set_logging;
use service::resolve_service::{build_orchestrator, run_resolution, schedule_resolution};
use service::var_service::load_settings;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _guard = set_logging()?;

    let settings = load_settings().await?;
    let orchestrator = build_orchestrator(&settings).await?;

    match settings.run_interval {
        Some(period) => schedule_resolution(&settings, &orchestrator, period).await?,
        None => {
            run_resolution(&settings, &orchestrator).await?;
        }
    }

    Ok(())
}
