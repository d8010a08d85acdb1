//! `may_minihttp` adapter.
//!
//! One [`EngineService`] is cloned per connection; it parses the request,
//! enforces the body limit, and writes whatever the engine dispatched. A
//! shared in-flight gauge counts requests currently inside the engine so
//! shutdown can drain them. Websocket sessions need a transport takeover
//! this listener cannot do, so embedders drive them through their own
//! upgrade gateway; this adapter only reports the rejection path.

use super::request::parse_request;
use super::response::{write_response, Response};
use crate::engine::{Dispatched, Engine};
use crate::error::{ErrorKind, WrapError};
use may::coroutine::JoinHandle;
use may_minihttp::{HttpServer as MiniHttpServer, HttpService};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READY_DEADLINE: Duration = Duration::from_secs(1);
const FLUSH_GRACE: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct EngineService {
    engine: Arc<Engine>,
    in_flight: Arc<AtomicUsize>,
}

impl EngineService {
    pub fn new(engine: Arc<Engine>) -> Self {
        EngineService {
            engine,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn gauge(&self) -> Arc<AtomicUsize> {
        self.in_flight.clone()
    }
}

/// Holds the in-flight count up for the duration of one `call`, whichever
/// way it exits.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::AcqRel);
        InFlight(gauge.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl HttpService for EngineService {
    fn call(&mut self, req: may_minihttp::Request, res: &mut may_minihttp::Response) -> io::Result<()> {
        let _in_flight = InFlight::enter(&self.in_flight);
        let max_body = self.engine.config().server.max_body_bytes;
        let request = parse_request(req, max_body);

        if request.body.as_ref().map_or(false, |b| b.len() > max_body) {
            let err = WrapError::new(ErrorKind::BadRequest)
                .with_message("request body exceeds limit")
                .with_extra("limit_bytes", max_body as u64);
            write_response(res, Response::from_error(&err, request.accepts_plain_text()));
            return Ok(());
        }

        match self.engine.respond(request) {
            Dispatched::Http(response) => write_response(res, response),
            Dispatched::WebSocket(_session) => {
                write_response(
                    res,
                    Response::text(501, "websocket upgrade is not available on this listener"),
                );
            }
            Dispatched::WebSocketRejected { response, .. } => write_response(res, response),
        }
        Ok(())
    }
}

/// Handle to a running listener. Stopping drains in-flight requests for up
/// to the engine's configured shutdown timeout before the listener
/// coroutine is cancelled.
pub struct ServerHandle {
    addr: SocketAddr,
    listener: JoinHandle<()>,
    in_flight: Arc<AtomicUsize>,
    shutdown_timeout: Duration,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Requests currently inside the engine.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Poll until the port accepts connections or the readiness deadline
    /// passes.
    pub fn wait_ready(&self) -> io::Result<()> {
        let deadline = Instant::now() + READY_DEADLINE;
        loop {
            if TcpStream::connect(self.addr).is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Graceful shutdown: wait for in-flight requests to finish, bounded by
    /// the configured `shutdown_timeout`, then take the listener down.
    pub fn stop(self) {
        let deadline = Instant::now() + self.shutdown_timeout;
        loop {
            let remaining = self.in_flight.load(Ordering::Acquire);
            if remaining == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    remaining = remaining,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "shutdown timeout reached with requests still in flight"
                );
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
        // the gauge drops before the connection coroutine flushes its write
        // buffer; give it a moment so drained responses reach the wire
        thread::sleep(FLUSH_GRACE);
        info!(addr = %self.addr, "listener stopping");
        // the listener coroutine blocks in accept; cancellation is the only
        // way may_minihttp releases the socket
        unsafe {
            self.listener.coroutine().cancel();
        }
        let _ = self.listener.join();
    }

    /// Block until the listener exits on its own.
    pub fn join(self) -> std::thread::Result<()> {
        self.listener.join()
    }
}

/// Bind the engine's configured address and start serving.
pub fn serve(engine: Arc<Engine>) -> io::Result<ServerHandle> {
    may::config().set_stack_size(engine.runtime().stack_size);
    let shutdown_timeout = engine.config().server.shutdown_timeout();
    let addr = engine
        .config()
        .server
        .bind_addr()
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid bind address"))?;
    let service = EngineService::new(engine);
    let in_flight = service.gauge();
    let listener = MiniHttpServer(service).start(addr)?;
    info!(addr = %addr, "listener started");
    Ok(ServerHandle {
        addr,
        listener,
        in_flight,
        shutdown_timeout,
    })
}
