use clap::Parser;
use log::{error, info};
use std::path::Path;
use tokio::sync::watch;
use trafscope::configuration::config::Config;
use trafscope::controller::controller_handler::Controller;

#[derive(Parser)]
#[command(name = "trafscope")]
#[command(version = "0.1.0")]
#[command(about = "Per-application network traffic capture and flow reconstruction")]
struct Args {
    config_file: String,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration from {}", args.config_file);
    let config = match Config::from_file(Path::new(args.config_file.as_str())) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}", e);
            std::process::exit(1);
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            let _ = stop_tx.send(true);
        }
    });

    if let Err(e) = controller.run(stop_rx).await {
        error!("Pipeline failed: {}", e);
        std::process::exit(1);
    }
}
