mod check_config;
mod replay;
mod run;

pub use check_config::check_config;
pub use replay::run_replay;
pub use run::run_live;

use trendline_bot_orchestrator::ShutdownReport;

fn print_report(report: &ShutdownReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "Failed to render shutdown report"),
    }
}
