//! Cluster-wide node-id leasing.
//!
//! Every process needs a 10-bit node id no other live process shares, so
//! independently generated Snowflake ids never collide. With a data source
//! the id is negotiated through [`RegisterStore`] rows and kept alive by a
//! renewal loop; without one, a deterministic LAN-IP + PID hash stands in
//! (collisions possible, which is the accepted trade of running storageless).

mod store;

pub use store::{MemoryRegisterStore, RegisterModel, RegisterStore};

use crate::error::{ErrorKind, Result};
use crate::snowflake::NODE_MAX;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// A lease is considered live while `now - last_rent_time` stays below this.
pub const RENT_THRESHOLD: Duration = Duration::from_secs(600);
/// Renewal cadence.
pub const RENT_INTERVAL: Duration = Duration::from_secs(60);
const REGISTER_ATTEMPTS: usize = 50;
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Worker identifier: the two trailing components of the working directory.
pub fn worker_identifier(work_dir: &Path) -> String {
    let mut parts: Vec<String> = work_dir
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => Some(os.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    let tail = parts.split_off(parts.len().saturating_sub(2));
    if tail.is_empty() {
        "root".to_string()
    } else {
        tail.join("/")
    }
}

/// Best-effort LAN address discovery: route a UDP socket toward a public
/// address and read back the chosen local endpoint. Nothing is sent.
pub fn lan_ip() -> String {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Deterministic fallback node id from LAN IP and PID.
pub fn deterministic_node_id(ip: &str, pid: u32) -> i16 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ip.hash(&mut hasher);
    pid.hash(&mut hasher);
    (hasher.finish() & NODE_MAX as u64) as i16
}

enum Registration {
    Won(RegisterModel),
    /// A guarded write affected zero rows; run the whole procedure again.
    Raced,
}

pub struct ServiceRegister {
    service_name: String,
    worker: String,
    ip: String,
    store: Option<Arc<dyn RegisterStore>>,
    model: Mutex<Option<RegisterModel>>,
}

impl ServiceRegister {
    pub fn new(
        service_name: impl Into<String>,
        work_dir: &Path,
        store: Option<Arc<dyn RegisterStore>>,
    ) -> Self {
        ServiceRegister {
            service_name: service_name.into(),
            worker: worker_identifier(work_dir),
            ip: lan_ip(),
            store,
            model: Mutex::new(None),
        }
    }

    /// Override the worker identifier (otherwise derived from the working
    /// directory).
    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = worker.into();
        self
    }

    /// Override the discovered IP (tests).
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn node_id(&self) -> Option<i16> {
        self.model.lock().unwrap().as_ref().map(|m| m.node_id)
    }

    fn extra(&self) -> serde_json::Value {
        json!({
            "pid": std::process::id(),
            "hostname": std::env::var("HOSTNAME").unwrap_or_default(),
            "args": std::env::args().collect::<Vec<_>>(),
            "machine": std::env::consts::ARCH,
        })
    }

    fn fallback(&self) -> i16 {
        let node = deterministic_node_id(&self.ip, std::process::id());
        warn!(
            node = node,
            ip = %self.ip,
            "node id from deterministic fallback, collisions possible"
        );
        node
    }

    /// Negotiate this process's node id. Retries the whole procedure when a
    /// guarded write loses a race; after the retry budget, falls back to
    /// the deterministic id.
    pub fn initialize(&self) -> Result<i16> {
        let store = match &self.store {
            None => return Ok(self.fallback()),
            Some(store) => store.clone(),
        };
        for attempt in 0..REGISTER_ATTEMPTS {
            match self.register_once(&store) {
                Ok(Registration::Won(model)) => {
                    info!(
                        node = model.node_id,
                        ip = %model.ip,
                        worker = %model.worker,
                        attempt = attempt,
                        "node id registered"
                    );
                    let node = model.node_id;
                    *self.model.lock().unwrap() = Some(model);
                    return Ok(node);
                }
                Ok(Registration::Raced) => {
                    std::thread::sleep(RETRY_DELAY);
                }
                Err(err) => return Err(err.wrap(ErrorKind::Database)),
            }
        }
        warn!(attempts = REGISTER_ATTEMPTS, "registration kept racing");
        Ok(self.fallback())
    }

    fn register_once(&self, store: &Arc<dyn RegisterStore>) -> Result<Registration> {
        let now = Utc::now();
        let rows = store.load_all(&self.service_name)?;

        // same ip + worker: this process restarted, reuse its row
        if let Some(existing) = rows
            .iter()
            .find(|r| r.ip == self.ip && r.worker == self.worker)
        {
            let model = RegisterModel {
                node_id: existing.node_id,
                name: self.service_name.clone(),
                ip: self.ip.clone(),
                worker: self.worker.clone(),
                startup_time: now,
                last_rent_time: now,
                extra: self.extra(),
            };
            return if store.update(&model, existing.startup_time)? == 1 {
                Ok(Registration::Won(model))
            } else {
                Ok(Registration::Raced)
            };
        }

        // a node id nobody holds
        let occupied: HashSet<i16> = rows.iter().map(|r| r.node_id).collect();
        if let Some(free) = (0..=NODE_MAX).find(|id| !occupied.contains(id)) {
            let model = RegisterModel {
                node_id: free,
                name: self.service_name.clone(),
                ip: self.ip.clone(),
                worker: self.worker.clone(),
                startup_time: now,
                last_rent_time: now,
                extra: self.extra(),
            };
            return if store.insert(&model)? == 1 {
                Ok(Registration::Won(model))
            } else {
                Ok(Registration::Raced)
            };
        }

        // every id taken: evict the first expired lease
        let threshold = ChronoDuration::from_std(RENT_THRESHOLD)
            .unwrap_or_else(|_| ChronoDuration::seconds(600));
        if let Some(stale) = rows
            .iter()
            .find(|r| now.signed_duration_since(r.last_rent_time) >= threshold)
        {
            let model = RegisterModel {
                node_id: stale.node_id,
                name: self.service_name.clone(),
                ip: self.ip.clone(),
                worker: self.worker.clone(),
                startup_time: now,
                last_rent_time: now,
                extra: self.extra(),
            };
            return if store.update(&model, stale.startup_time)? == 1 {
                Ok(Registration::Won(model))
            } else {
                Ok(Registration::Raced)
            };
        }

        warn!("all node ids leased and live, using deterministic fallback");
        Ok(Registration::Won(RegisterModel {
            node_id: self.fallback(),
            name: self.service_name.clone(),
            ip: self.ip.clone(),
            worker: self.worker.clone(),
            startup_time: now,
            last_rent_time: now,
            extra: self.extra(),
        }))
    }

    /// Renew the lease once. Zero affected rows means the row was lost;
    /// the whole registration procedure re-runs.
    pub fn renew(&self) -> Result<()> {
        let store = match &self.store {
            None => return Ok(()),
            Some(store) => store.clone(),
        };
        let node_id = match self.node_id() {
            Some(node_id) => node_id,
            None => return Ok(()),
        };
        let now = Utc::now();
        let affected = store.renew(&self.service_name, node_id, &self.worker, now)?;
        if affected == 0 {
            warn!(node = node_id, "lease renewal lost its row, re-registering");
            self.initialize()?;
        } else if let Some(model) = self.model.lock().unwrap().as_mut() {
            model.last_rent_time = now;
        }
        Ok(())
    }

    /// Background renewal loop on its own coroutine.
    pub fn start_renewal(self: &Arc<Self>) {
        if self.store.is_none() {
            return;
        }
        let register = self.clone();
        may::go!(move || loop {
            may::coroutine::sleep(RENT_INTERVAL);
            if let Err(err) = register.renew() {
                error!(error = %err, "lease renewal failed");
            }
        });
    }
}
