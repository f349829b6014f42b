use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use estafeta_core::{BrokerConfig, DiskStore, MessageStore, RpcConfig, StoreConfig};
use estafeta_proto::broker_client::BrokerClient;
use estafeta_proto::{GetRequest, ListRequest, StopRequest};
use tonic::transport::Channel;

const CONFIG_FILE: &str = "estafeta.yaml";

#[derive(Parser)]
#[command(name = "estafeta", about = "Estafeta message broker CLI")]
struct Cli {
    /// Broker address
    #[arg(long, default_value = "http://localhost:6438", global = true)]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Control the queue manager process
    #[command(subcommand)]
    Manager(ManagerCommands),

    /// List the messages currently in a queue
    List {
        /// Queue name
        queue: String,
    },

    /// Remove all messages from a queue
    Empty {
        /// Queue name
        queue: String,
    },

    /// Write a configuration file and prepare the message store
    #[command(subcommand)]
    Install(InstallCommands),
}

#[derive(Subcommand)]
enum ManagerCommands {
    /// Run the queue manager and its RPC endpoint in the foreground
    Start {
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Stop a running queue manager
    Stop,
}

#[derive(Subcommand)]
enum InstallCommands {
    /// Disk-backed message store
    Disk {
        /// Store directory
        #[arg(default_value = "queues")]
        path: PathBuf,
    },

    /// MySQL-backed message store
    Mysql {
        host: String,
        username: String,
        password: String,
        database: String,

        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        socket: Option<String>,

        #[arg(long)]
        prefix: Option<String>,
    },
}

async fn connect(addr: &str) -> BrokerClient<Channel> {
    match BrokerClient::connect(addr.to_string()).await {
        Ok(client) => client,
        Err(_) => {
            eprintln!("Error: cannot connect to broker at {addr}");
            process::exit(1);
        }
    }
}

fn fail(status: tonic::Status) -> ! {
    match status.code() {
        tonic::Code::Unavailable => eprintln!("Error: cannot connect to broker"),
        _ => eprintln!("Error: {}", status.message()),
    }
    process::exit(1);
}

fn load_config(path: Option<PathBuf>) -> BrokerConfig {
    let path = path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    if !path.exists() {
        return BrokerConfig::default();
    }
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) => {
            eprintln!("Error: cannot read {}: {e}", path.display());
            process::exit(1);
        }
    };
    match serde_yaml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: cannot parse {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn write_config(config: &BrokerConfig) {
    let yaml = match serde_yaml::to_string(config) {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("Error: cannot serialize configuration: {e}");
            process::exit(1);
        }
    };
    if let Err(e) = std::fs::write(CONFIG_FILE, yaml) {
        eprintln!("Error: cannot write {CONFIG_FILE}: {e}");
        process::exit(1);
    }
    println!("Wrote configuration to {CONFIG_FILE}");
}

async fn cmd_list(addr: &str, queue: String) {
    let mut client = connect(addr).await;
    match client.list(ListRequest { queue: queue.clone() }).await {
        Ok(response) => {
            let headers = response.into_inner().headers;
            println!("Queue \"{queue}\" holds {} message(s)", headers.len());
            for map in headers {
                let mut entries: Vec<String> = map
                    .entries
                    .iter()
                    .map(|(name, value)| format!("{name}={value:?}"))
                    .collect();
                entries.sort();
                println!("  {}", entries.join(" "));
            }
        }
        Err(status) => fail(status),
    }
}

async fn cmd_empty(addr: &str, queue: String) {
    let mut client = connect(addr).await;
    let mut removed = 0u64;
    loop {
        match client
            .get(GetRequest {
                queue: queue.clone(),
                selector: None,
                tid: None,
            })
            .await
        {
            Ok(response) => {
                if response.into_inner().message.is_some() {
                    removed += 1;
                } else {
                    break;
                }
            }
            Err(status) => fail(status),
        }
    }
    println!("Removed {removed} message(s) from \"{queue}\"");
}

async fn cmd_manager_stop(addr: &str) {
    let mut client = connect(addr).await;
    match client.stop(StopRequest {}).await {
        Ok(_) => println!("Stopped queue manager"),
        Err(status) => fail(status),
    }
}

fn cmd_install_disk(path: PathBuf) {
    let store = DiskStore::new(&path, false);
    match store.setup() {
        Ok(created) => {
            if created {
                println!("Created message store in {}", path.display());
            } else {
                println!("Message store in {} already exists", path.display());
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
    write_config(&BrokerConfig {
        store: StoreConfig::Disk { path, fsync: false },
        rpc: RpcConfig::default(),
    });
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Manager(ManagerCommands::Start { config }) => {
            estafeta_core::telemetry::init_tracing();
            if let Err(e) = estafeta_server::run(load_config(config)).await {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
        Commands::Manager(ManagerCommands::Stop) => cmd_manager_stop(&cli.addr).await,
        Commands::List { queue } => cmd_list(&cli.addr, queue).await,
        Commands::Empty { queue } => cmd_empty(&cli.addr, queue).await,
        Commands::Install(InstallCommands::Disk { path }) => cmd_install_disk(path),
        Commands::Install(InstallCommands::Mysql {
            host,
            username,
            password,
            database,
            port,
            socket,
            prefix,
        }) => {
            // The mysql backend ships separately; install only records
            // the configuration for it.
            write_config(&BrokerConfig {
                store: StoreConfig::Mysql {
                    host,
                    username,
                    password,
                    database,
                    port,
                    socket,
                    prefix,
                },
                rpc: RpcConfig::default(),
            });
        }
    }
}
