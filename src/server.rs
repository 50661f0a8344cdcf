//! TCP server speaking the JSON-lines protocol.
//!
//! Every request and response is one JSON object on one line.
//! Requests carry `{"type": ..., "payload": {...}}`; responses carry
//! `{"type": ...}` plus type-specific fields. A connection gets one
//! `welcome` on accept and an `error` response for anything that goes
//! wrong; errors never close the connection.
//!
//! One database name maps to one `<data_dir>/<name>.sawit` file, and
//! all work for one database is funneled through a mutex around its
//! engine, so the engine always sees a strictly sequential stream of
//! queries no matter how many clients are connected.

use anyhow::Result;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::{
    collections::HashMap,
    fs,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::OwnedWriteHalf,
        TcpListener, TcpStream,
    },
};
use tracing::{error, info, warn};

use crate::engine::{Engine, Value};

/// Default port of the `sawitdb://` protocol.
pub const DEFAULT_PORT: u16 = 7878;

/// Server configuration, normally filled in from the CLI.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// Username/password pairs. `None` disables authentication.
    pub auth: Option<HashMap<String, String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            data_dir: PathBuf::from("data"),
            max_connections: 100,
            auth: None,
        }
    }
}

#[derive(Default)]
struct ServerCounters {
    total_connections: u64,
    active_connections: u64,
    total_queries: u64,
    errors: u64,
}

/// Per-connection state: whether auth has happened and which database
/// the client has entered.
struct Session {
    authenticated: bool,
    database: Option<String>,
}

/// A request line, adjacently tagged the way clients send it.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
enum Request {
    Auth {
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    Use {
        database: String,
    },
    Query {
        query: String,
        #[serde(default)]
        params: Option<HashMap<String, serde_json::Value>>,
    },
    Ping,
    ListDatabases,
    DropDatabase {
        database: String,
    },
    Stats,
}

/// The server: listener configuration, the map of open engines, and
/// the running counters.
pub struct SawitServer {
    config: ServerConfig,
    databases: Mutex<HashMap<String, Arc<Mutex<Engine>>>>,
    counters: Mutex<ServerCounters>,
    started: Instant,
}

impl SawitServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            databases: Mutex::new(HashMap::new()),
            counters: Mutex::new(ServerCounters::default()),
            started: Instant::now(),
        }
    }

    /// Binds the configured address and serves connections forever.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        fs::create_dir_all(&self.config.data_dir)?;
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        self.run(listener).await
    }

    /// Serves connections on an already-bound listener. Split out so
    /// tests can bind to an ephemeral port first.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        fs::create_dir_all(&self.config.data_dir)?;
        info!(addr = %listener.local_addr()?, "SawitDB server listening");

        loop {
            let (socket, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(socket, peer).await;
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        let over_limit = {
            let mut counters = self.counters.lock();
            if counters.active_connections >= self.config.max_connections as u64 {
                true
            } else {
                counters.total_connections += 1;
                counters.active_connections += 1;
                false
            }
        };
        if over_limit {
            warn!(%peer, "connection limit reached, rejecting");
            let (_, mut writer) = socket.into_split();
            let _ = send(&mut writer, &json!({
                "type": "error",
                "error": "Server connection limit reached",
            }))
            .await;
            return;
        }
        info!(%peer, "client connected");

        let (reader, mut writer) = socket.into_split();
        let welcome = json!({
            "type": "welcome",
            "message": "SawitDB Server",
            "version": "1.0",
            "protocol": "sawitdb",
        });
        if send(&mut writer, &welcome).await.is_err() {
            self.disconnect(peer);
            return;
        }

        let mut session = Session {
            authenticated: self.config.auth.is_none(),
            database: None,
        };
        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!(%peer, error = %e, "read error");
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: Request = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(e) => {
                    let _ = send_error(&mut writer, &format!("Invalid request format: {e}")).await;
                    continue;
                }
            };

            if self
                .handle_request(&mut writer, request, &mut session)
                .await
                .is_err()
            {
                break;
            }
        }

        info!(%peer, "client disconnected");
        self.disconnect(peer);
    }

    fn disconnect(&self, _peer: SocketAddr) {
        self.counters.lock().active_connections -= 1;
    }

    async fn handle_request(
        &self,
        writer: &mut OwnedWriteHalf,
        request: Request,
        session: &mut Session,
    ) -> Result<()> {
        if self.config.auth.is_some()
            && !session.authenticated
            && !matches!(request, Request::Auth { .. })
        {
            return send_error(writer, "Authentication required").await;
        }

        match request {
            Request::Auth { username, password } => match &self.config.auth {
                None => {
                    session.authenticated = true;
                    send(writer, &json!({
                        "type": "auth_success",
                        "message": "No auth required",
                    }))
                    .await
                }
                Some(users) if users.get(&username) == Some(&password) => {
                    session.authenticated = true;
                    send(writer, &json!({
                        "type": "auth_success",
                        "message": "Authentication successful",
                    }))
                    .await
                }
                Some(_) => send_error(writer, "Invalid credentials").await,
            },

            Request::Use { database } => {
                if !valid_database_name(&database) {
                    return send_error(writer, "Invalid database name").await;
                }
                match self.get_or_create_database(&database) {
                    Ok(_) => {
                        session.database = Some(database.clone());
                        send(writer, &json!({
                            "type": "use_success",
                            "database": database,
                            "message": format!("Switched to database '{database}'"),
                        }))
                        .await
                    }
                    Err(e) => send_error(writer, &format!("Failed to use database: {e}")).await,
                }
            }

            Request::Query { query, params } => {
                self.handle_query(writer, &query, params, session).await
            }

            Request::Ping => {
                let timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                send(writer, &json!({"type": "pong", "timestamp": timestamp})).await
            }

            Request::ListDatabases => {
                let databases = self.list_databases();
                send(writer, &json!({
                    "type": "database_list",
                    "databases": databases,
                    "count": databases.len(),
                }))
                .await
            }

            Request::DropDatabase { database } => match self.drop_database(&database, session) {
                Ok(()) => {
                    send(writer, &json!({
                        "type": "drop_success",
                        "database": database,
                        "message": format!("Wilayah '{database}' telah hangus terbakar."),
                    }))
                    .await
                }
                Err(message) => send_error(writer, &message).await,
            },

            Request::Stats => {
                let (total_connections, active_connections, total_queries, errors) = {
                    let counters = self.counters.lock();
                    (
                        counters.total_connections,
                        counters.active_connections,
                        counters.total_queries,
                        counters.errors,
                    )
                };
                send(writer, &json!({
                    "type": "stats",
                    "stats": {
                        "totalConnections": total_connections,
                        "activeConnections": active_connections,
                        "totalQueries": total_queries,
                        "errors": errors,
                        "uptimeMs": self.started.elapsed().as_millis() as u64,
                    },
                }))
                .await
            }
        }
    }

    /// Database-level commands are intercepted here; everything else
    /// goes to the engine of the session's current database.
    async fn handle_query(
        &self,
        writer: &mut OwnedWriteHalf,
        query: &str,
        params: Option<HashMap<String, serde_json::Value>>,
        session: &mut Session,
    ) -> Result<()> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_ascii_uppercase())
            .collect();
        let raw_words: Vec<&str> = query.split_whitespace().collect();
        let head = words.first().map(String::as_str).unwrap_or("");
        let second = words.get(1).map(String::as_str).unwrap_or("");

        // LIHAT WILAYAH / SHOW DATABASES
        if (head, second) == ("LIHAT", "WILAYAH") || (head, second) == ("SHOW", "DATABASES") {
            let databases = self.list_databases();
            let listing = format!("Daftar Wilayah:\n- {}", databases.join("\n- "));
            return self.send_query_result(writer, json!(listing), query, 0).await;
        }

        // BUKA WILAYAH / CREATE DATABASE
        if (head, second) == ("BUKA", "WILAYAH") || (head, second) == ("CREATE", "DATABASE") {
            let Some(&name) = raw_words.get(2) else {
                return send_error(writer, "Syntax: BUKA WILAYAH [nama]").await;
            };
            if !valid_database_name(name) {
                return send_error(writer, "Nama wilayah tidak valid").await;
            }
            if self.database_path(name).exists() {
                let message = format!("Wilayah '{name}' sudah ada.");
                return self.send_query_result(writer, json!(message), query, 0).await;
            }
            return match self.get_or_create_database(name) {
                Ok(_) => {
                    let message = format!("Wilayah '{name}' berhasil dibuka.");
                    self.send_query_result(writer, json!(message), query, 0).await
                }
                Err(e) => send_error(writer, &e.to_string()).await,
            };
        }

        // MASUK WILAYAH / USE
        if (head, second) == ("MASUK", "WILAYAH") || head == "USE" {
            let name = if head == "USE" {
                raw_words.get(1)
            } else {
                raw_words.get(2)
            };
            let Some(&name) = name else {
                return send_error(writer, "Syntax: MASUK WILAYAH [nama]").await;
            };
            if !self.database_path(name).exists() {
                return send_error(writer, &format!("Wilayah '{name}' tidak ditemukan.")).await;
            }
            session.database = Some(name.to_string());
            let message = format!("Selamat datang di wilayah '{name}'.");
            return self.send_query_result(writer, json!(message), query, 0).await;
        }

        // BAKAR WILAYAH / DROP DATABASE
        if (head, second) == ("BAKAR", "WILAYAH") || (head, second) == ("DROP", "DATABASE") {
            let Some(&name) = raw_words.get(2) else {
                return send_error(writer, "Syntax: BAKAR WILAYAH [nama]").await;
            };
            return match self.drop_database(name, session) {
                Ok(()) => {
                    let message = format!("Wilayah '{name}' telah hangus terbakar.");
                    self.send_query_result(writer, json!(message), query, 0).await
                }
                Err(message) => send_error(writer, &message).await,
            };
        }

        let Some(database) = session.database.clone() else {
            return send_error(
                writer,
                "Anda belum masuk wilayah manapun. Gunakan: MASUK WILAYAH [nama]",
            )
            .await;
        };

        let engine = match self.get_or_create_database(&database) {
            Ok(engine) => engine,
            Err(e) => return send_error(writer, &e.to_string()).await,
        };

        let params: Option<HashMap<String, Value>> = params.map(|p| {
            p.iter()
                .map(|(name, value)| (name.clone(), Value::from(value)))
                .collect()
        });

        let start = Instant::now();
        let result = {
            let mut engine = engine.lock();
            engine.query(query, params.as_ref())
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(result) => {
                self.counters.lock().total_queries += 1;
                self.send_query_result(writer, json!(result), query, elapsed_ms)
                    .await
            }
            Err(e) => {
                self.counters.lock().errors += 1;
                send_error(writer, &format!("Query error: {e}")).await
            }
        }
    }

    async fn send_query_result(
        &self,
        writer: &mut OwnedWriteHalf,
        result: serde_json::Value,
        query: &str,
        elapsed_ms: u64,
    ) -> Result<()> {
        send(writer, &json!({
            "type": "query_result",
            "result": result,
            "query": query,
            "executionTime": elapsed_ms,
        }))
        .await
    }

    fn database_path(&self, name: &str) -> PathBuf {
        self.config.data_dir.join(format!("{name}.sawit"))
    }

    fn get_or_create_database(&self, name: &str) -> Result<Arc<Mutex<Engine>>, crate::engine::EngineError> {
        let mut databases = self.databases.lock();
        if let Some(engine) = databases.get(name) {
            return Ok(engine.clone());
        }
        let engine = Arc::new(Mutex::new(Engine::open(self.database_path(name))?));
        databases.insert(name.to_string(), engine.clone());
        Ok(engine)
    }

    fn list_databases(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.config.data_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter_map(|entry| {
                        entry
                            .file_name()
                            .to_str()
                            .and_then(|name| name.strip_suffix(".sawit"))
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    fn drop_database(&self, name: &str, session: &mut Session) -> Result<(), String> {
        if name.is_empty() {
            return Err("Database name required".to_string());
        }
        let path = self.database_path(name);
        if !path.exists() {
            return Err(format!("Wilayah '{name}' tidak ditemukan."));
        }
        self.databases.lock().remove(name);
        fs::remove_file(&path).map_err(|e| e.to_string())?;
        if session.database.as_deref() == Some(name) {
            session.database = None;
        }
        info!(database = name, "database dropped");
        Ok(())
    }
}

fn valid_database_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

async fn send(writer: &mut OwnedWriteHalf, value: &serde_json::Value) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

async fn send_error(writer: &mut OwnedWriteHalf, message: &str) -> Result<()> {
    send(writer, &json!({"type": "error", "error": message})).await
}
