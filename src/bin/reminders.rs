use log::{error, info};
use std::process::ExitCode;
use todo_reminders::config::{env_lookup, load_env_file, NotifierConfig};
use todo_reminders::notifier::Notifier;

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::init();

    load_env_file(".env");

    let config = match NotifierConfig::from_lookup(env_lookup) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let notifier = match Notifier::new(config) {
        Ok(notifier) => notifier,
        Err(err) => {
            error!("Could not build HTTP client: {}", err);
            return ExitCode::FAILURE;
        }
    };

    info!("Checking for reminders");
    notifier.run().await;
    ExitCode::SUCCESS
}
