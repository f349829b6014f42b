use std::path::Path;

use estafeta_core::BrokerConfig;
use tracing::info;

fn load_config() -> BrokerConfig {
    if let Ok(path) = std::env::var("ESTAFETA_CONFIG") {
        return read_config(&path);
    }

    let paths = ["estafeta.yaml", "/etc/estafeta/estafeta.yaml"];
    for path in &paths {
        if Path::new(path).exists() {
            return read_config(path);
        }
    }

    info!("no config file found, using defaults");
    BrokerConfig::default()
}

fn read_config(path: &str) -> BrokerConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str(&contents) {
            Ok(config) => {
                info!(path, "loaded configuration");
                config
            }
            Err(e) => {
                eprintln!("error parsing {path}: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("error reading {path}: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    estafeta_core::telemetry::init_tracing();
    estafeta_server::run(load_config()).await
}
