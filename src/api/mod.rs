use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::EngineError;
use crate::session::{self, SharedSession};
use crate::sink::{DisplayStatus, SharedDisplay};
use crate::storage::{NewCountRecord, SharedStore};

const MAX_REQUEST_BYTES: usize = 8192;
const SNAPSHOT_LIST_LIMIT: usize = 100;
const CROSSING_LIST_LIMIT: usize = 500;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    session: SharedSession,
    store: Option<SharedStore>,
    display: Option<SharedDisplay>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, session: SharedSession, store: Option<SharedStore>) -> Self {
        Self {
            cfg,
            session,
            store,
            display: None,
        }
    }

    /// Expose the `/display/*` management routes for this link.
    pub fn with_display(mut self, display: SharedDisplay) -> Self {
        self.display = Some(display);
        self
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let routes = Routes {
            session: self.session,
            store: self.store,
            display: self.display,
        };
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &routes, shutdown_thread) {
                log::error!("control api stopped: {}", err);
            }
        });
        log::info!("control api listening on {}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct Routes {
    session: SharedSession,
    store: Option<SharedStore>,
    display: Option<SharedDisplay>,
}

/// Status code plus JSON body.
struct Reply {
    status: u16,
    body: Vec<u8>,
}

impl Reply {
    fn json<T: Serialize>(status: u16, value: &T) -> Result<Self> {
        Ok(Self {
            status,
            body: serde_json::to_vec(value)?,
        })
    }

    fn error(status: u16, code: &str) -> Result<Self> {
        Self::json(status, &json!({ "error": code }))
    }
}

fn run_api(listener: TcpListener, routes: &Routes, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, routes) {
                    log::warn!("control api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, routes: &Routes) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    let reply = match routes.dispatch(&request) {
        Ok(reply) => reply,
        Err(err) => {
            log::error!("{} {} failed: {}", request.method, request.path, err);
            Reply::error(500, "internal_error")?
        }
    };
    write_response(&mut stream, reply.status, "application/json", &reply.body)
}

impl Routes {
    fn dispatch(&self, request: &HttpRequest) -> Result<Reply> {
        let method = request.method.as_str();
        match request.path.as_str() {
            "/health" => match method {
                "GET" => Reply::json(200, &json!({ "status": "ok" })),
                _ => Reply::error(405, "method_not_allowed"),
            },
            "/counts" => match method {
                "GET" => self.counts(),
                _ => Reply::error(405, "method_not_allowed"),
            },
            "/snapshots" => match method {
                "GET" => self.snapshots(),
                _ => Reply::error(405, "method_not_allowed"),
            },
            "/crossings" => match method {
                "GET" => self.crossings(),
                _ => Reply::error(405, "method_not_allowed"),
            },
            "/save_data" => match method {
                "POST" => self.save_data(),
                _ => Reply::error(405, "method_not_allowed"),
            },
            "/display/status" => match method {
                "GET" => self.display_status(),
                _ => Reply::error(405, "method_not_allowed"),
            },
            "/display/connect" | "/display/disconnect" | "/display/send_test"
            | "/display/reset" => match method {
                "POST" => self.display_action(&request.path),
                _ => Reply::error(405, "method_not_allowed"),
            },
            "/start" | "/pause" | "/resume" | "/stop" => match method {
                "POST" => self.control(&request.path),
                _ => Reply::error(405, "method_not_allowed"),
            },
            _ => Reply::error(404, "not_found"),
        }
    }

    fn counts(&self) -> Result<Reply> {
        let snapshot = session::lock(&self.session)?.snapshot();
        Reply::json(200, &snapshot)
    }

    fn control(&self, path: &str) -> Result<Reply> {
        let mut session = session::lock(&self.session)?;
        let outcome = match path {
            "/start" => session.start().map(|_| None),
            "/pause" => session.pause().map(|_| None),
            "/resume" => session.resume().map(|_| None),
            "/stop" => session.stop().map(Some),
            _ => return Reply::error(404, "not_found"),
        };
        match outcome {
            Ok(summary) => {
                let status = session.snapshot().status;
                match summary {
                    Some(summary) => {
                        Reply::json(200, &json!({ "status": status, "summary": summary }))
                    }
                    None => Reply::json(200, &json!({ "status": status })),
                }
            }
            Err(err @ EngineError::InvalidTransition { .. }) => Reply::json(
                409,
                &json!({ "error": "invalid_transition", "message": err.to_string() }),
            ),
            Err(err) => Err(err.into()),
        }
    }

    fn save_data(&self) -> Result<Reply> {
        let Some(store) = &self.store else {
            return Reply::error(503, "storage_unavailable");
        };
        let snapshot = session::lock(&self.session)?.snapshot();
        let record = NewCountRecord::now(
            snapshot.suitable_count,
            snapshot.unsuitable_count,
            snapshot.status,
        )?;
        let mut store = store
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?;
        let id = store.insert(&record)?;
        let saved = store
            .get(id)?
            .ok_or_else(|| anyhow!("snapshot {} missing after insert", id))?;
        log::info!(
            "manual snapshot {} saved: ripe={} unripe={}",
            id,
            saved.suitable_count,
            saved.unsuitable_count
        );
        Reply::json(201, &saved)
    }

    fn snapshots(&self) -> Result<Reply> {
        let Some(store) = &self.store else {
            return Reply::error(503, "storage_unavailable");
        };
        let records = store
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?
            .list(SNAPSHOT_LIST_LIMIT)?;
        Reply::json(200, &records)
    }

    fn crossings(&self) -> Result<Reply> {
        let Some(store) = &self.store else {
            return Reply::error(503, "storage_unavailable");
        };
        let crossings = store
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?
            .list_crossings(CROSSING_LIST_LIMIT)?;
        Reply::json(200, &crossings)
    }

    fn display_status(&self) -> Result<Reply> {
        let status = match &self.display {
            Some(display) => display
                .lock()
                .map_err(|_| anyhow!("display lock poisoned"))?
                .status(),
            None => DisplayStatus::disabled(),
        };
        Reply::json(200, &status)
    }

    fn display_action(&self, path: &str) -> Result<Reply> {
        let Some(display) = &self.display else {
            return Reply::error(503, "display_not_configured");
        };
        let mut link = display
            .lock()
            .map_err(|_| anyhow!("display lock poisoned"))?;
        let outcome = match path {
            "/display/connect" => link.connect(),
            "/display/disconnect" => {
                link.disconnect();
                Ok(())
            }
            "/display/send_test" => link.send_test(),
            "/display/reset" if link.is_connected() => link.reset(),
            // connect() writes the stopped line itself.
            "/display/reset" => link.connect(),
            _ => return Reply::error(404, "not_found"),
        };
        match outcome {
            Ok(()) => Reply::json(200, &link.status()),
            Err(err) => {
                log::warn!("{} failed: {:#}", path, err);
                Reply::json(
                    503,
                    &json!({
                        "error": "display_unavailable",
                        "message": format!("{:#}", err),
                        "display": link.status(),
                    }),
                )
            }
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path);
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CountingEngine, EngineConfig};
    use crate::session::Session;
    use crate::sink::display::tests::SharedBuf;
    use crate::sink::display::DEFAULT_SEND_INTERVAL;
    use crate::sink::DisplayLink;
    use crate::storage::{self, CrossingEvent, InMemorySnapshotStore};
    use crate::{BunchClass, CountDelta};

    fn routes(with_store: bool) -> Routes {
        let engine = CountingEngine::new(EngineConfig::default()).unwrap();
        Routes {
            session: Session::new(engine).into_shared(),
            store: with_store.then(|| storage::shared(InMemorySnapshotStore::new())),
            display: None,
        }
    }

    fn request(method: &str, path: &str) -> HttpRequest {
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    fn body(reply: &Reply) -> serde_json::Value {
        serde_json::from_slice(&reply.body).unwrap()
    }

    #[test]
    fn control_routes_drive_lifecycle() {
        let routes = routes(false);
        let reply = routes.dispatch(&request("POST", "/start")).unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(body(&reply)["status"], "loading");

        let reply = routes.dispatch(&request("POST", "/resume")).unwrap();
        assert_eq!(reply.status, 409);
        assert_eq!(body(&reply)["error"], "invalid_transition");

        let reply = routes.dispatch(&request("POST", "/stop")).unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(body(&reply)["summary"]["frames_processed"], 0);
    }

    #[test]
    fn unknown_paths_and_methods() {
        let routes = routes(true);
        assert_eq!(routes.dispatch(&request("GET", "/nope")).unwrap().status, 404);
        assert_eq!(routes.dispatch(&request("GET", "/start")).unwrap().status, 405);
        assert_eq!(routes.dispatch(&request("POST", "/counts")).unwrap().status, 405);
    }

    #[test]
    fn storage_routes_need_a_store() {
        let routes = routes(false);
        assert_eq!(routes.dispatch(&request("POST", "/save_data")).unwrap().status, 503);
        assert_eq!(routes.dispatch(&request("GET", "/snapshots")).unwrap().status, 503);
    }

    #[test]
    fn save_data_appears_in_listing() {
        let routes = routes(true);
        let saved = routes.dispatch(&request("POST", "/save_data")).unwrap();
        assert_eq!(saved.status, 201);
        assert_eq!(body(&saved)["status"], "idle");

        let listing = routes.dispatch(&request("GET", "/snapshots")).unwrap();
        let records = body(&listing);
        assert_eq!(records.as_array().map(Vec::len), Some(1));
        assert_eq!(records[0]["id"], body(&saved)["id"]);
    }

    #[test]
    fn crossings_route_lists_newest_first() {
        let with_store = routes(true);
        let store = with_store.store.clone().unwrap();
        for frame_number in [3, 9] {
            let delta = CountDelta {
                class: BunchClass::Suitable,
                new_total: frame_number,
                frame_number,
                confidence: 0.5,
            };
            store
                .lock()
                .unwrap()
                .insert_crossing(&CrossingEvent::from_delta(&delta, 1_700_000_000))
                .unwrap();
        }
        let reply = with_store.dispatch(&request("GET", "/crossings")).unwrap();
        assert_eq!(reply.status, 200);
        let crossings = body(&reply);
        assert_eq!(crossings[0]["frame_number"], 9);
        assert_eq!(crossings[0]["label"], "Ripe");
        assert_eq!(crossings[1]["frame_number"], 3);

        assert_eq!(routes(false).dispatch(&request("GET", "/crossings")).unwrap().status, 503);
    }

    #[test]
    fn display_routes_without_a_display() {
        let routes = routes(false);
        let reply = routes.dispatch(&request("GET", "/display/status")).unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(body(&reply)["enabled"], false);
        assert_eq!(body(&reply)["connected"], false);

        let reply = routes.dispatch(&request("POST", "/display/reset")).unwrap();
        assert_eq!(reply.status, 503);
        assert_eq!(body(&reply)["error"], "display_not_configured");
        assert_eq!(
            routes.dispatch(&request("GET", "/display/reset")).unwrap().status,
            405
        );
    }

    #[test]
    fn display_routes_drive_the_link() {
        let buf = SharedBuf::default();
        let mut routes = routes(false);
        routes.display =
            Some(DisplayLink::from_writer(buf.clone(), DEFAULT_SEND_INTERVAL).into_shared());

        let reply = routes.dispatch(&request("POST", "/display/send_test")).unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(body(&reply)["connected"], true);
        let reply = routes.dispatch(&request("POST", "/display/reset")).unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(
            buf.text(),
            "RIPE:99,UNRIPE:88,STATUS:test\nRIPE:0,UNRIPE:0,STATUS:stopped\n"
        );

        let reply = routes.dispatch(&request("POST", "/display/disconnect")).unwrap();
        assert_eq!(body(&reply)["connected"], false);
        let reply = routes.dispatch(&request("POST", "/display/send_test")).unwrap();
        assert_eq!(reply.status, 503);
        assert_eq!(body(&reply)["error"], "display_unavailable");
        assert_eq!(body(&reply)["display"]["connected"], false);
    }
}
