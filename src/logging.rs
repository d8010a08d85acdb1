//! Logging bootstrap.
//!
//! One subscriber is installed per process, during engine construction,
//! shaped by the `default` logger sink of the engine config. The TCP sink
//! decouples request handling from a slow collector with an internal send
//! queue and a reconnect loop (first attempt immediate, then fixed delay).

use crate::config::{EngineConfig, LogSinkConfig};
use std::io;
use std::net::TcpStream;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Cloneable writer handle feeding the TCP sink's queue. Dropping every
/// handle shuts the sender thread down at its next receive.
#[derive(Clone)]
pub struct TcpSinkHandle {
    tx: Arc<Mutex<Sender<Vec<u8>>>>,
}

impl io::Write for TcpSinkHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // queue full lines; a closed queue silently drops, logging must
        // never take the process down
        let _ = self.tx.lock().unwrap().send(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for TcpSinkHandle {
    type Writer = TcpSinkHandle;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Start the sender thread for a TCP log sink.
pub fn tcp_sink(addr: String, reconnect_delay: Duration) -> TcpSinkHandle {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    std::thread::Builder::new()
        .name("log-tcp-sink".to_string())
        .spawn(move || {
            let mut first_attempt = true;
            let mut stream: Option<TcpStream> = None;
            loop {
                let line = match rx.recv() {
                    Ok(line) => line,
                    Err(_) => return,
                };
                loop {
                    if stream.is_none() {
                        if !first_attempt {
                            std::thread::sleep(reconnect_delay);
                        }
                        first_attempt = false;
                        stream = TcpStream::connect(&addr).ok();
                        if stream.is_none() {
                            continue;
                        }
                    }
                    use io::Write;
                    match stream.as_mut().unwrap().write_all(&line) {
                        Ok(()) => break,
                        Err(_) => {
                            stream = None;
                        }
                    }
                }
            }
        })
        .expect("spawn log sink thread");
    TcpSinkHandle {
        tx: Arc::new(Mutex::new(tx)),
    }
}

struct FileWriter(Mutex<std::fs::File>);

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = FileGuard<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        FileGuard(&self.0)
    }
}

struct FileGuard<'a>(&'a Mutex<std::fs::File>);

impl io::Write for FileGuard<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

fn env_filter() -> EnvFilter {
    // the `logging` word of RUNTIME_VERBOSE lowers the default floor
    let fallback = if crate::runtime_config::VerboseFlags::from_env().logging {
        "debug"
    } else {
        "info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the process-wide subscriber. Safe to call more than once; later
/// calls (tests, embedded engines) are no-ops.
pub fn init(config: &EngineConfig) {
    let sink = config.loggers.get("default");
    let result = match sink {
        Some(LogSinkConfig::Tcp {
            addr,
            reconnect_delay_secs,
        }) => {
            let handle = tcp_sink(addr.clone(), Duration::from_secs(*reconnect_delay_secs));
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter())
                .with_writer(handle)
                .try_init()
        }
        Some(LogSinkConfig::File { path }) => match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(FileWriter(Mutex::new(file)))
                .with_ansi(false)
                .try_init(),
            Err(err) => {
                eprintln!("log file {} unavailable: {err}", path.display());
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter())
                    .try_init()
            }
        },
        Some(LogSinkConfig::Stdout { json: true }) => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("logging already initialized, keeping existing subscriber");
    }
}
