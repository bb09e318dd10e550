use clap::Parser;
use persister::cli::{Cli, Commands};
use persister::config::AppConfig;
use persister::error::{PersisterError, Result};
use persister::scenario::Scenario;
use tracing::{error, info, warn};

mod main_runtime;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config)?;
    cli.apply_overrides(&mut config);
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Invalid configuration: {e}");
        }
        return Err(PersisterError::InvalidConfig(errors.join("; ")));
    }

    let command = cli.command.unwrap_or(Commands::Demo);
    if command == Commands::Config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let _guard = main_runtime::init_logging(&config.logging);

    let result = match command {
        Commands::Graceful => main_runtime::run_mode(Scenario::Graceful, &config)
            .await
            .map(|_| ()),
        Commands::Immediate => main_runtime::run_mode(Scenario::Immediate, &config)
            .await
            .map(|_| ()),
        Commands::Demo => run_demo(&config).await,
        Commands::Config => Ok(()),
    };

    if let Err(ref e) = result {
        error!("Persister failed: {}", e);
    }
    result
}

async fn run_demo(config: &AppConfig) -> Result<()> {
    info!("Case 1: single feed, graceful stop");
    let report = main_runtime::run_mode(Scenario::Graceful, config).await?;
    if report.interrupted {
        warn!("Demo interrupted, skipping case 2");
        return Ok(());
    }

    info!("Case 2: three feeds under high load, immediate stop");
    main_runtime::run_mode(Scenario::Immediate, config).await?;

    info!("Demo complete");
    Ok(())
}
