//! Shared utilities for integration testing.

use std::collections::HashMap;
use std::io::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use hostbridge::config::ProxyConfig;
use hostbridge::lifecycle::shutdown::Shutdown;
use hostbridge::pipeline::Pipeline;
use hostbridge::resolver::AddressResolver;
use hostbridge::rules::store::RuleStore;
use hostbridge::HttpServer;

/// Start a proxy on an ephemeral port with a fixed hostname→address
/// table instead of live DNS. Returns the proxy address and the
/// shutdown handle keeping it alive.
pub async fn spawn_proxy(
    config: ProxyConfig,
    static_hosts: &[(&str, &str)],
) -> (SocketAddr, Arc<Shutdown>) {
    let rules = Arc::new(RuleStore::new(&config.rules).expect("rule files load"));
    let resolver = AddressResolver::Static(
        static_hosts
            .iter()
            .map(|(host, ip)| (host.to_string(), ip.parse().unwrap()))
            .collect::<HashMap<_, _>>(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let pipeline = Arc::new(
        Pipeline::from_config(&config, rules, resolver, &[]).expect("pipeline builds"),
    );
    let server = HttpServer::new(config, pipeline);

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, &server_shutdown).await;
    });

    (addr, shutdown)
}

/// Send a raw HTTP/1.1 request and collect the whole response. Raw
/// sockets keep full control over the Host header.
pub async fn send_raw(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
        }
    }
    String::from_utf8_lossy(&response).to_string()
}

/// Write a rule file under the temp directory, named uniquely per
/// process.
pub fn write_rule_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "hostbridge-it-{}-{}",
        std::process::id(),
        name
    ));
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}
