//! A small in-process RESP server for the integration tests.
//!
//! It speaks just enough of the protocol to exercise the client: strings,
//! per-connection database selection, MULTI/EXEC, AUTH and QUIT.

#![allow(dead_code)]

use bytes::Bytes;
use flashkv_client::{ConnectionConfig, Reply, ReplyReader};
use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type Db = HashMap<Bytes, Bytes>;

struct ServerState {
    password: Option<String>,
    ping_delay: Option<Duration>,
    dbs: Mutex<HashMap<u32, Db>>,
    log: Mutex<Vec<String>>,
}

/// Handle to a running mock server. The server lives until the test exits.
pub struct MockServer {
    pub port: u16,
    state: Arc<ServerState>,
}

impl MockServer {
    pub fn start() -> Self {
        Self::start_with(None, None)
    }

    pub fn with_password(password: &str) -> Self {
        Self::start_with(Some(password.to_string()), None)
    }

    /// A server that holds every `PING` reply back for `delay`.
    pub fn with_ping_delay(delay: Duration) -> Self {
        Self::start_with(None, Some(delay))
    }

    fn start_with(password: Option<String>, ping_delay: Option<Duration>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(ServerState {
            password,
            ping_delay,
            dbs: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        });

        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let state = Arc::clone(&accept_state);
                thread::spawn(move || serve(state, stream));
            }
        });

        Self { port, state }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port).with_sync_timeout(Duration::from_secs(5))
    }

    /// Every command received so far, as `NAME arg arg`.
    pub fn commands(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }

    /// Reads a value directly from the store.
    pub fn value(&self, db: u32, key: &str) -> Option<Bytes> {
        let dbs = self.state.dbs.lock().unwrap();
        dbs.get(&db)?.get(key.as_bytes()).cloned()
    }
}

struct Session {
    db: u32,
    authenticated: bool,
    multi: Option<Vec<Vec<Bytes>>>,
}

fn serve(state: Arc<ServerState>, stream: TcpStream) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(_) => return,
    };
    let mut reader = ReplyReader::new(stream);
    let mut session = Session {
        db: 0,
        authenticated: state.password.is_none(),
        multi: None,
    };

    while let Ok(Some(frame)) = reader.read_reply() {
        let Some(args) = command_args(frame) else {
            let _ = writer.write_all(b"-ERR Protocol error\r\n");
            return;
        };
        let name = String::from_utf8_lossy(&args[0]).to_uppercase();
        let mut line = name.clone();
        for arg in &args[1..] {
            line.push(' ');
            line.push_str(&String::from_utf8_lossy(arg));
        }
        state.log.lock().unwrap().push(line);

        if let (Some(delay), "PING") = (state.ping_delay, name.as_str()) {
            thread::sleep(delay);
        }

        let response = session.handle(&state, &name, &args);
        if writer.write_all(&response).is_err() {
            return;
        }
        if name == "QUIT" {
            return;
        }
    }
}

fn command_args(frame: Reply) -> Option<Vec<Bytes>> {
    match frame {
        Reply::Multi(items) if !items.is_empty() => items
            .into_iter()
            .map(|item| match item {
                Reply::Bulk(Some(data)) => Some(data),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

impl Session {
    fn handle(&mut self, state: &ServerState, name: &str, args: &[Bytes]) -> Vec<u8> {
        match name {
            "AUTH" => {
                let given = args.get(1).map(|a| a.as_ref());
                if state.password.as_deref().map(str::as_bytes) == given {
                    self.authenticated = true;
                    return ok();
                }
                return error("ERR invalid password");
            }
            "QUIT" => return ok(),
            _ if !self.authenticated => return error("NOAUTH Authentication required."),
            _ => {}
        }

        if let Some(queued) = &mut self.multi {
            match name {
                "EXEC" => {
                    let queued = self.multi.take().unwrap_or_default();
                    let mut out = format!("*{}\r\n", queued.len()).into_bytes();
                    for command in queued {
                        let name = String::from_utf8_lossy(&command[0]).to_uppercase();
                        out.extend(self.execute(state, &name, &command));
                    }
                    return out;
                }
                "DISCARD" => {
                    self.multi = None;
                    return ok();
                }
                "MULTI" => return error("ERR MULTI calls can not be nested"),
                _ => {
                    queued.push(args.to_vec());
                    return b"+QUEUED\r\n".to_vec();
                }
            }
        }

        match name {
            "MULTI" => {
                self.multi = Some(Vec::new());
                ok()
            }
            "EXEC" => error("ERR EXEC without MULTI"),
            "DISCARD" => error("ERR DISCARD without MULTI"),
            _ => self.execute(state, name, args),
        }
    }

    fn execute(&mut self, state: &ServerState, name: &str, args: &[Bytes]) -> Vec<u8> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        let mut dbs = state.dbs.lock().unwrap();
        let db = dbs.entry(self.db).or_default();

        match name {
            "PING" => b"+PONG\r\n".to_vec(),
            "SELECT" => match std::str::from_utf8(&arg(1)).ok().and_then(|s| s.parse().ok()) {
                Some(index) => {
                    self.db = index;
                    ok()
                }
                None => error("ERR invalid DB index"),
            },
            "GET" => bulk(db.get(&arg(1))),
            "SET" => {
                db.insert(arg(1), arg(2));
                ok()
            }
            "SETEX" => {
                db.insert(arg(1), arg(3));
                ok()
            }
            "DEL" => integer(db.remove(&arg(1)).is_some() as i64),
            "EXISTS" => integer(db.contains_key(&arg(1)) as i64),
            "APPEND" => {
                let mut value = db.get(&arg(1)).map(|v| v.to_vec()).unwrap_or_default();
                value.extend_from_slice(&arg(2));
                let len = value.len() as i64;
                db.insert(arg(1), Bytes::from(value));
                integer(len)
            }
            "INCR" | "INCRBY" => {
                let by = if name == "INCR" {
                    Some(1)
                } else {
                    std::str::from_utf8(&arg(2)).ok().and_then(|s| s.parse::<i64>().ok())
                };
                let current = match db.get(&arg(1)) {
                    None => Some(0),
                    Some(v) => std::str::from_utf8(v).ok().and_then(|s| s.parse::<i64>().ok()),
                };
                match (current, by) {
                    (Some(current), Some(by)) => {
                        let next = current + by;
                        db.insert(arg(1), Bytes::from(next.to_string()));
                        integer(next)
                    }
                    _ => error("ERR value is not an integer or out of range"),
                }
            }
            "DEBUG" => {
                drop(dbs);
                let seconds = std::str::from_utf8(&arg(2))
                    .ok()
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(0.0);
                thread::sleep(Duration::from_secs_f64(seconds));
                ok()
            }
            other => error(&format!("ERR unknown command '{}'", other)),
        }
    }
}

fn ok() -> Vec<u8> {
    b"+OK\r\n".to_vec()
}

fn error(message: &str) -> Vec<u8> {
    format!("-{}\r\n", message).into_bytes()
}

fn integer(value: i64) -> Vec<u8> {
    format!(":{}\r\n", value).into_bytes()
}

fn bulk(value: Option<&Bytes>) -> Vec<u8> {
    match value {
        None => b"$-1\r\n".to_vec(),
        Some(data) => {
            let mut out = format!("${}\r\n", data.len()).into_bytes();
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
            out
        }
    }
}

/// Routes client logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
