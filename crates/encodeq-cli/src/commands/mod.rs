//! CLI command implementations.

pub mod jobs;

use anyhow::Result;
use encodeq_config::ServiceConfig;

pub fn validate(path: &str) -> Result<()> {
    match ServiceConfig::load(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!("  queue dir:    {}", config.paths.queue_dir.display());
            println!("  incoming dir: {}", config.paths.incoming_dir.display());
            println!("  outgoing dir: {}", config.paths.outgoing_dir.display());
            println!(
                "  script:       {} {}",
                config.execution.interpreter.display(),
                config.execution.script.display()
            );
            println!("  workers:      {}", config.dispatcher.workers);
            println!("  bind:         {}", config.server.bind);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
