use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use wins_common::config::ConfigStore;
use wins_common::env::EnvSnapshot;
use wins_common::service::SystemServiceControl;
use wins_common::upgrade::BinaryLocations;
use wins_common::ErrorClass;
use wins_suc::{classify, exit_code, is_end_of_input, Cli, RunOptions, Runtime};

fn init_logging(cli: &Cli) {
    let filter = match cli.log_directive() {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    info!("wins-suc {} starting", env!("CARGO_PKG_VERSION"));

    let env = EnvSnapshot::from_process();
    let store = ConfigStore::resolve(cli.config.as_deref(), &env);
    let service = SystemServiceControl::default();
    let runtime = Runtime::new(store, BinaryLocations::default(), &service);
    let options = RunOptions::from_cli(&cli, &env);

    if let Err(err) = runtime.run(&options, &env) {
        if is_end_of_input(&err) {
            return;
        }
        let class = classify(&err);
        match class {
            Some(ErrorClass::Integrity) => {
                error!("integrity check failed, refusing to continue: {:#}", err)
            }
            Some(class) => error!("{} error: {:#}", class, err),
            None => error!("{:#}", err),
        }
        std::process::exit(exit_code(class));
    }
}
