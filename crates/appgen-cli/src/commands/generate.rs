//! The `generate` command.

use crate::GenerateArgs;
use crate::encoder::{JsonListEncoder, ObjectEncoder};
use anyhow::{Context, Result};
use appgen_config::{GeneratorConfig, parse_environment};
use appgen_core::StrategyOptions;
use appgen_generate::{
    DetectorChain, GenerateRequest, Generator, GitCli, GitFetcher, SourceInput, StrategyOverride,
    is_remote_repository,
};
use appgen_resolver::ResolverChainBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub async fn generate(args: GenerateArgs) -> Result<()> {
    let config = GeneratorConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?
        .with_namespace(args.namespace.clone())
        .context("Invalid namespace")?;
    let env = parse_environment(&args.env).context("Invalid environment")?;

    let detectors = DetectorChain::default()
        .with_builder_overrides(&config.builders)
        .context("Invalid builder configuration")?;
    let resolver = ResolverChainBuilder::new(config).build().await;

    let generator = Generator::new(
        Arc::new(resolver),
        Arc::new(GitFetcher::new()),
        Arc::new(GitCli),
        detectors,
    );

    let location = if is_remote_repository(&args.source) {
        SourceInput::Url(args.source.clone())
    } else {
        SourceInput::Directory(PathBuf::from(&args.source))
    };
    let strategy_override = match (args.docker_context, args.builder_image) {
        (Some(context), _) => Some(StrategyOverride::Context(context)),
        (None, Some(image)) => Some(StrategyOverride::BuilderImage(image)),
        (None, None) => None,
    };

    let request = GenerateRequest {
        location,
        name: args.name,
        git_ref: args.git_ref,
        strategy_override,
        port: args.port,
        env,
        options: StrategyOptions {
            no_cache: args.no_cache,
            incremental: args.incremental,
            build_only: args.build_only,
        },
    };

    let objects = generator
        .generate(request)
        .await
        .with_context(|| format!("Failed to generate objects for {}", args.source))?;

    let encoder = JsonListEncoder { pretty: true };
    match args.output {
        Some(path) => {
            let mut file = std::fs::File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            encoder.encode(&objects, &mut file)?;
            info!(path = %path.display(), objects = objects.len(), "Wrote objects");
        }
        None => {
            let stdout = std::io::stdout();
            encoder.encode(&objects, &mut stdout.lock())?;
        }
    }

    Ok(())
}
