use log::{error, info};

use rtu_modbus::cli::{build_cli, handle_subcommands};
use rtu_modbus::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();

    let level = if matches.get_flag("verbose") { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("🖥️  Modbus RTU tool v{}", rtu_modbus::VERSION);

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_matches(&matches)?;

    match handle_subcommands(&matches, &config).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            build_cli().print_help()?;
            println!();
            Ok(())
        }
        Err(e) => {
            error!("💥 {}", e);
            Err(e)
        }
    }
}
