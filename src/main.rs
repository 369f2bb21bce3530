use proctree::commands::{build, Cli, Commands};
use proctree::error::ProcessTreeError;
use proctree::utils::config_paths::ConfigPaths;
use proctree::utils::logger::init_logger;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ProcessTreeError>() {
                Some(tree_err) => eprintln!(
                    "{} error: {}",
                    tree_err.category(),
                    tree_err.user_message()
                ),
                None => eprintln!("{:#}", err),
            }
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = ConfigPaths::resolve(cli.config.as_deref())?;
    let config = paths.load()?;

    // --log-level 优先于配置文件
    let log_level = cli.log_level.as_deref().or(config.log_level.as_deref());
    init_logger(log_level, config.log_file.clone())?;
    tracing::debug!(config = %paths.config_file.display(), "configuration loaded");

    match cli.command {
        Commands::Build(args) => {
            let output = build::execute(&args, &config)?;
            println!("{}", output);
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
