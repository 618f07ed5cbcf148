//! Test helpers: an in-process cluster of RESP nodes, and a harness for
//! the gateway binary.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use slotline_cluster::{key_slot, ClusterConfig, NodeId};
use slotline_protocol::{parse_frame, Frame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const HOST: &str = "127.0.0.1";

struct SlotRange {
    start: u16,
    end: u16,
    primary: u16,
    replicas: Vec<u16>,
}

#[derive(Default)]
struct State {
    layout: Vec<SlotRange>,
    data: HashMap<Bytes, Bytes>,
    down: HashSet<u16>,
    asks: HashMap<u16, u16>,
    served: Vec<u16>,
    topology_queries: usize,
}

/// A set of RESP nodes on loopback ports sharing one keyspace.
///
/// Each node answers `CLUSTER SLOTS`, `READONLY`, `ASKING`, `GET` and
/// `SET` the way a cluster node would: `MOVED` for slots it doesn't own,
/// reads on replicas after `READONLY`, `ASK` for slots marked migrating.
pub struct MockCluster {
    state: Arc<Mutex<State>>,
    primaries: Vec<u16>,
    replicas: Vec<u16>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockCluster {
    /// Starts `primaries` nodes splitting the slot space evenly, each with
    /// one replica when `with_replicas` is set.
    pub async fn start(primaries: usize, with_replicas: bool) -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let mut tasks = Vec::new();
        let mut primary_ports = Vec::new();
        let mut replica_ports = Vec::new();

        for _ in 0..primaries {
            let (port, task) = spawn_node(Arc::clone(&state)).await;
            primary_ports.push(port);
            tasks.push(task);
            if with_replicas {
                let (port, task) = spawn_node(Arc::clone(&state)).await;
                replica_ports.push(port);
                tasks.push(task);
            }
        }

        let count = primaries as u32;
        let layout = (0..primaries)
            .map(|i| {
                let n = i as u32;
                SlotRange {
                    start: (n * 16384 / count) as u16,
                    end: ((n + 1) * 16384 / count - 1) as u16,
                    primary: primary_ports[i],
                    replicas: replica_ports.get(i).copied().into_iter().collect(),
                }
            })
            .collect();
        lock(&state).layout = layout;

        Self {
            state,
            primaries: primary_ports,
            replicas: replica_ports,
            tasks,
        }
    }

    /// Client settings pointing at every primary, with fast retries and no
    /// background refresh.
    pub fn config(&self) -> ClusterConfig {
        let mut cfg = ClusterConfig::with_seeds(self.seeds());
        cfg.refresh_interval_ms = 0;
        cfg.retry_backoff_ms = 5;
        cfg
    }

    pub fn seeds(&self) -> Vec<String> {
        self.primaries.iter().map(|p| format!("{HOST}:{p}")).collect()
    }

    pub fn primary(&self, i: usize) -> u16 {
        self.primaries[i]
    }

    pub fn replica(&self, i: usize) -> u16 {
        self.replicas[i]
    }

    pub fn node_id(port: u16) -> NodeId {
        NodeId::new(HOST, port)
    }

    /// Port of the primary currently owning `key`'s slot.
    pub fn owner_of(&self, key: &str) -> u16 {
        let slot = key_slot(key.as_bytes());
        lock(&self.state)
            .layout
            .iter()
            .find(|r| r.start <= slot && slot <= r.end)
            .map(|r| r.primary)
            .expect("layout covers every slot")
    }

    /// Hands the `from`-th primary's slot range to the node on port `to`.
    pub fn reassign(&self, from: usize, to: u16) {
        lock(&self.state).layout[from].primary = to;
    }

    /// Marks `slot` as migrating to the node on port `to`: its owner
    /// answers `ASK` until [`clear_ask`](Self::clear_ask).
    pub fn set_ask(&self, slot: u16, to: u16) {
        lock(&self.state).asks.insert(slot, to);
    }

    /// Stops a node from serving. Open connections close on their next
    /// command and new ones are dropped after accept.
    pub fn set_down(&self, port: u16, down: bool) {
        let mut state = lock(&self.state);
        if down {
            state.down.insert(port);
        } else {
            state.down.remove(&port);
        }
    }

    pub fn insert(&self, key: &str, value: &str) {
        lock(&self.state).data.insert(
            Bytes::copy_from_slice(key.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        );
    }

    /// Ports that served GET/SET, in order.
    pub fn served(&self) -> Vec<u16> {
        lock(&self.state).served.clone()
    }

    pub fn topology_queries(&self) -> usize {
        lock(&self.state).topology_queries
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn lock(state: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

async fn spawn_node(state: Arc<Mutex<State>>) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind(format!("{HOST}:0")).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let task = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            if lock(&state).down.contains(&port) {
                drop(stream);
                continue;
            }
            tokio::spawn(serve_connection(stream, port, Arc::clone(&state)));
        }
    });
    (port, task)
}

async fn serve_connection(mut stream: TcpStream, port: u16, state: Arc<Mutex<State>>) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut readonly = false;
    let mut asking = false;

    loop {
        let frame = match parse_frame(&buf) {
            Ok(Some((frame, consumed))) => {
                let _ = buf.split_to(consumed);
                frame
            }
            Ok(None) => match stream.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            },
            Err(_) => return,
        };

        let args: Vec<Bytes> = match frame {
            Frame::Array(parts) => parts
                .into_iter()
                .filter_map(|f| match f {
                    Frame::Bulk(b) => Some(b),
                    _ => None,
                })
                .collect(),
            _ => return,
        };

        let reply = {
            let mut state = lock(&state);
            if state.down.contains(&port) {
                return;
            }
            let reply = answer(&mut state, port, &args, &mut readonly, asking);
            asking = is_command(&args, "ASKING");
            reply
        };

        let mut out = BytesMut::new();
        reply.serialize(&mut out);
        if stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn is_command(args: &[Bytes], name: &str) -> bool {
    args.first()
        .is_some_and(|a| a.eq_ignore_ascii_case(name.as_bytes()))
}

fn answer(
    state: &mut State,
    port: u16,
    args: &[Bytes],
    readonly: &mut bool,
    asking: bool,
) -> Frame {
    let name = args
        .first()
        .map(|a| String::from_utf8_lossy(a).to_ascii_uppercase())
        .unwrap_or_default();

    match name.as_str() {
        "READONLY" => {
            *readonly = true;
            Frame::Simple("OK".into())
        }
        "ASKING" => Frame::Simple("OK".into()),
        "CLUSTER" => {
            state.topology_queries += 1;
            Frame::Array(state.layout.iter().map(slot_entry).collect())
        }
        "GET" | "SET" if args.len() >= 2 => {
            let key = &args[1];
            let slot = key_slot(key);
            let Some(range) = state
                .layout
                .iter()
                .find(|r| r.start <= slot && slot <= r.end)
            else {
                return Frame::Error("CLUSTERDOWN Hash slot not served".into());
            };
            let primary = range.primary;
            let replica = range.replicas.contains(&port);
            let ask = state.asks.get(&slot).copied();

            let serves = match ask {
                Some(target) if target == port => asking || primary == port,
                Some(target) if primary == port => {
                    return Frame::Error(format!("ASK {slot} {HOST}:{target}"));
                }
                _ => primary == port || (replica && *readonly && name == "GET"),
            };
            if !serves {
                return Frame::Error(format!("MOVED {slot} {HOST}:{primary}"));
            }

            state.served.push(port);
            if name == "GET" {
                match state.data.get(key) {
                    Some(value) => Frame::Bulk(value.clone()),
                    None => Frame::Null,
                }
            } else {
                match args.get(2) {
                    Some(value) => {
                        state.data.insert(key.clone(), value.clone());
                        Frame::Simple("OK".into())
                    }
                    None => Frame::Error("ERR wrong number of arguments for 'set'".into()),
                }
            }
        }
        _ => Frame::Error(format!("ERR unknown command '{name}'")),
    }
}

fn slot_entry(range: &SlotRange) -> Frame {
    let node = |port: u16| {
        Frame::Array(vec![
            Frame::Bulk(Bytes::from_static(HOST.as_bytes())),
            Frame::Integer(i64::from(port)),
            Frame::Bulk(Bytes::from(format!("node-{port}"))),
        ])
    };
    let mut parts = vec![
        Frame::Integer(i64::from(range.start)),
        Frame::Integer(i64::from(range.end)),
        node(range.primary),
    ];
    parts.extend(range.replicas.iter().map(|&p| node(p)));
    Frame::Array(parts)
}

/// A slotline-gateway subprocess managed by the test harness.
pub struct TestGateway {
    child: Child,
    pub port: u16,
}

impl TestGateway {
    /// Starts the gateway against `cluster` on a free port and waits until
    /// it accepts HTTP connections (up to 5 seconds).
    pub async fn start(cluster: &MockCluster) -> Self {
        let port = find_free_port();
        let binary = gateway_binary();

        let child = Command::new(&binary)
            .arg("--host")
            .arg(HOST)
            .arg("--port")
            .arg(port.to_string())
            .arg("--seeds")
            .arg(cluster.seeds().join(","))
            .arg("--refresh-interval-ms")
            .arg("0")
            .arg("--max-retries")
            .arg("2")
            // suppress tracing output in tests
            .env("RUST_LOG", "error")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap_or_else(|e| {
                panic!("failed to spawn slotline-gateway at {}: {e}", binary.display())
            });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if tokio::time::Instant::now() > deadline {
                panic!("slotline-gateway failed to start within 5 seconds on port {port}");
            }
            if TcpStream::connect((HOST, port)).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Self { child, port }
    }

    /// Sends one HTTP/1.1 request and returns the status and body.
    pub async fn request(&self, method: &str, path: &str, body: &str) -> (u16, Bytes) {
        let mut stream = TcpStream::connect((HOST, self.port)).await.unwrap();
        let head = format!(
            "{method} {path} HTTP/1.1\r\nhost: {HOST}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(body.as_bytes()).await.unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();

        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response has a header terminator");
        let head = String::from_utf8_lossy(&raw[..split]);
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| panic!("bad status line: {head}"));
        (status, Bytes::copy_from_slice(&raw[split + 4..]))
    }

    pub async fn get_json(&self, path: &str) -> (u16, serde_json::Value) {
        let (status, body) = self.request("GET", path, "").await;
        let value = serde_json::from_slice(&body)
            .unwrap_or_else(|e| panic!("body is not JSON ({e}): {body:?}"));
        (status, value)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Finds a free TCP port by binding to port 0.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Locates the slotline-gateway binary next to the test binary's
/// target directory.
fn gateway_binary() -> PathBuf {
    // test binary is in target/<profile>/deps/
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("slotline-gateway");
    if !path.exists() {
        panic!(
            "slotline-gateway binary not found. run `cargo build` first.\nlooked at: {}",
            path.display()
        );
    }
    path
}
