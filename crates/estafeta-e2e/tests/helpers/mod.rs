#![allow(dead_code)]

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// A running `estafeta-server` instance for e2e testing.
///
/// Spawns the server binary on a random port with a temporary store
/// directory. The server is killed when this struct is dropped.
pub struct TestServer {
    child: Option<Child>,
    addr: String,
    /// Kept alive for the duration of the test; dropping it cleans up
    /// the store directory.
    _data_dir: tempfile::TempDir,
}

impl TestServer {
    /// Start a new estafeta-server instance on a random port.
    pub fn start() -> Self {
        let port = free_port();
        let data_dir = tempfile::tempdir().expect("create temp dir");

        let config_path = data_dir.path().join("estafeta.yaml");
        let store_path = data_dir.path().join("queues");
        let config_content = format!(
            r#"store:
  type: disk
  path: "{}"
rpc:
  port: {port}
  acl: "allow 127.0.0.1"
"#,
            store_path.display()
        );
        std::fs::write(&config_path, config_content).expect("write config");

        let binary = server_binary();
        assert!(
            binary.exists(),
            "estafeta-server binary not found at {binary:?}. Run `cargo build` first."
        );

        let child = Command::new(&binary)
            .env("ESTAFETA_CONFIG", &config_path)
            .current_dir(data_dir.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("start estafeta-server");

        // Poll TCP until the server is reachable.
        let tcp_addr = format!("127.0.0.1:{port}");
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(10) {
            if TcpStream::connect(&tcp_addr).is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        TestServer {
            child: Some(child),
            addr: format!("http://{tcp_addr}"),
            _data_dir: data_dir,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("bind to a free port")
        .local_addr()
        .expect("local addr")
        .port()
}

fn server_binary() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop();
    path.pop();
    path.push("target");
    path.push(if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    });
    path.push(format!("estafeta-server{}", std::env::consts::EXE_SUFFIX));
    path
}
