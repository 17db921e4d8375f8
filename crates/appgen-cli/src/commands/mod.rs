//! CLI command implementations.

mod generate;

pub use generate::generate;

use anyhow::Result;
use appgen_config::parse_generator_config;
use appgen_generate::DetectorChain;
use std::path::Path;

pub fn validate_config(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let result = parse_generator_config(&content)
        .map_err(anyhow::Error::from)
        .and_then(|config| {
            DetectorChain::default()
                .with_builder_overrides(&config.builders)
                .map_err(anyhow::Error::from)
        });
    match result {
        Ok(_) => {
            println!("Configuration is valid");
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
