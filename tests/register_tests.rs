#![allow(clippy::unwrap_used, clippy::expect_used)]

use apphive::register::{MemoryRegisterStore, RegisterModel, RegisterStore, ServiceRegister};
use chrono::{Duration, Utc};
use std::path::Path;
use std::sync::Arc;

fn register(ip: &str, worker: &str, store: Arc<dyn RegisterStore>) -> ServiceRegister {
    ServiceRegister::new("svc", Path::new("/srv/app/node"), Some(store))
        .with_ip(ip)
        .with_worker(worker)
}

fn seeded_row(node_id: i16, ip: &str, worker: &str, rent_age_mins: i64) -> RegisterModel {
    let now = Utc::now();
    RegisterModel {
        node_id,
        name: "svc".to_string(),
        ip: ip.to_string(),
        worker: worker.to_string(),
        startup_time: now - Duration::minutes(rent_age_mins),
        last_rent_time: now - Duration::minutes(rent_age_mins),
        extra: serde_json::json!({}),
    }
}

#[test]
fn stranger_does_not_take_a_leased_node() {
    let store = Arc::new(MemoryRegisterStore::new());
    store.seed(seeded_row(3, "10.0.0.5", "svcA", 11));

    // a different process gets a different node id even though node 3's
    // lease is stale (free ids exist, takeover is the last resort)
    let other = register("10.0.0.9", "svcB", store.clone());
    let node = other.initialize().unwrap();
    assert_ne!(node, 3);
}

#[test]
fn same_ip_and_worker_reclaims_its_node() {
    let store = Arc::new(MemoryRegisterStore::new());
    let seeded = seeded_row(3, "10.0.0.5", "svcA", 11);
    let old_startup = seeded.startup_time;
    store.seed(seeded);

    let returning = register("10.0.0.5", "svcA", store.clone());
    assert_eq!(returning.initialize().unwrap(), 3);

    let row = store
        .rows()
        .into_iter()
        .find(|r| r.node_id == 3)
        .unwrap();
    assert!(row.startup_time > old_startup);
    assert_eq!(row.worker, "svcA");
}

#[test]
fn stale_lease_is_taken_over_when_ids_run_out() {
    let store = Arc::new(MemoryRegisterStore::new());
    // occupy every id; node 200 has an expired lease
    for id in 0..=apphive::snowflake::NODE_MAX {
        let age = if id == 200 { 20 } else { 0 };
        store.seed(seeded_row(id, &format!("10.1.{}.{}", id / 256, id % 256), &format!("w{id}"), age));
    }

    let newcomer = register("10.9.9.9", "fresh", store.clone());
    assert_eq!(newcomer.initialize().unwrap(), 200);
    let row = store.rows().into_iter().find(|r| r.node_id == 200).unwrap();
    assert_eq!(row.worker, "fresh");
    assert_eq!(row.ip, "10.9.9.9");
}

#[test]
fn renewal_refreshes_the_lease() {
    let store = Arc::new(MemoryRegisterStore::new());
    let reg = register("10.0.0.5", "svcA", store.clone());
    let node = reg.initialize().unwrap();

    let before = store
        .rows()
        .into_iter()
        .find(|r| r.node_id == node)
        .unwrap()
        .last_rent_time;
    std::thread::sleep(std::time::Duration::from_millis(5));
    reg.renew().unwrap();
    let after = store
        .rows()
        .into_iter()
        .find(|r| r.node_id == node)
        .unwrap()
        .last_rent_time;
    assert!(after > before);
}

#[test]
fn lost_row_triggers_re_registration_on_renew() {
    let store = Arc::new(MemoryRegisterStore::new());
    let reg = register("10.0.0.5", "svcA", store.clone());
    let node = reg.initialize().unwrap();

    // the row disappears (say, an operator wiped the table)
    store.clear();
    assert!(store.rows().is_empty());

    // renewal notices zero affected rows and re-runs registration
    reg.renew().unwrap();
    assert_eq!(reg.node_id(), Some(node));
    assert_eq!(store.rows().len(), 1);
    assert_eq!(store.rows()[0].node_id, node);
}
