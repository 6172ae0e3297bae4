use anyhow::Result;
use script_host::cli::{self, Action};
use std::time::Duration;
use tokio::runtime::Runtime;

fn main() -> Result<()> {
    // Process CLI arguments first (before logging init for cleaner output)
    let options = match cli::process_cli() {
        cli::CliResult::Exit(code) => {
            if code == 0 {
                return Ok(());
            }
            std::process::exit(code);
        }
        cli::CliResult::Continue(options) => options,
    };
    let cli::RuntimeOptions {
        action,
        config,
        log_level,
    } = *options;
    // Routes all log::info!() etc. to /tmp/script_host_debug.log; stdout
    // carries only the event stream.
    script_host::debug::init_log_bridge(log_level, config.log_level.to_level_filter());

    log::info!("Starting script-host {}", script_host::VERSION);

    let runtime = Runtime::new()?;
    let result = runtime.block_on(async {
        match action {
            Action::Run {
                script,
                base_path,
                stop_after,
            } => {
                let stop_after = stop_after
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64);
                script_host::runner::run_script(
                    config,
                    &script,
                    base_path.as_deref(),
                    stop_after,
                )
                .await
            }
            Action::Install { target } => {
                script_host::runner::run_install(config, &target).await
            }
        }
    });

    // Don't block forever on a helper task that is still winding down.
    runtime.shutdown_timeout(Duration::from_secs(2));

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("script-host: error: {e:#}");
            std::process::exit(1);
        }
    }
}
