use clap::Parser;
use log::LevelFilter;

use hunkwise::app::App;
use hunkwise::cli::Cli;
use hunkwise::config::DiffConfig;

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity flags
    let log_level = if cli.quiet {
        LevelFilter::Error
    } else {
        match cli.verbosity {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_target(false)
        .format_timestamp(None)
        .init();

    // Config file, then environment, then CLI overrides
    let config = match &cli.config {
        Some(path) => DiffConfig::from_file(path),
        None => Ok(DiffConfig::default()),
    };
    let config = match config {
        Ok(config) => cli.overrides.apply(config.with_env()),
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(1);
        }
    };

    let app = App::new(config);
    match app.run(cli.command) {
        Ok(output) => println!("{}", output),
        Err(err) => {
            log::error!("{}", err);
            std::process::exit(1);
        }
    }
}
