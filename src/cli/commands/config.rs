//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigFile};
use crate::error::CacheLockResult;
use console::style;

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    file: &ConfigFile,
) -> CacheLockResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", file.path().display()),
        Some(ConfigAction::Init { force }) => init_config(file, force).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> CacheLockResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(file: &ConfigFile, force: bool) -> CacheLockResult<()> {
    if file.write(&Config::default(), force).await? {
        println!(
            "{} Configuration initialized at {}",
            style("✓").green(),
            file.path().display()
        );
    } else {
        println!(
            "{} Config already exists at {} (use --force to overwrite)",
            style("!").yellow(),
            file.path().display()
        );
    }
    Ok(())
}
