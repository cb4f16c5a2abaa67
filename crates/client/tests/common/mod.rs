#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bazaar_client::ws::memory::MemoryBroker;
use bazaar_client::ws::ReconnectConfig;
use bazaar_client::{ConnectionManager, ConnectionState};
use serde_json::Value;

pub fn manager(broker: &MemoryBroker) -> ConnectionManager {
    ConnectionManager::new(broker.transport(), ReconnectConfig::default())
}

/// Poll `check` on the (paused) clock until it holds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn wait_for_state(
    manager: &ConnectionManager,
    what: &str,
    pred: impl FnMut(&ConnectionState) -> bool,
) {
    let mut rx = manager.watch_state();
    let reached = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(pred)).await;
    match reached {
        Ok(Ok(_)) => {}
        Ok(Err(_)) => panic!("state channel closed waiting for {what}"),
        Err(_) => panic!("timed out waiting for {what}, state is {:?}", manager.state()),
    }
}

pub async fn connected(manager: &ConnectionManager) {
    wait_for_state(manager, "Connected", |s| s.is_connected()).await;
}

pub type Seen = Arc<Mutex<Vec<Value>>>;

pub fn recorder() -> (Seen, impl Fn(Value) + Send + Sync + 'static) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |v| sink.lock().unwrap().push(v))
}
