#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis_mux::{
    ConfigurationOptions, ConnectionEvent, Endpoint, Multiplexer, NoHandshake, SlotSettings,
    Transport,
};
use redis_mux_test::MockTransport;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn endpoint(s: &str) -> Endpoint {
    s.parse().unwrap()
}

/// Options for tests: short timeouts, and a heartbeat that never fires on its own so
/// tests drive it explicitly.
pub fn options(endpoints: &[&str]) -> ConfigurationOptions {
    ConfigurationOptions::new()
        .set_endpoints(endpoints.iter().map(|s| endpoint(s)))
        .set_connect_timeout(Duration::from_secs(1))
        .set_async_timeout(Duration::from_secs(2))
        .set_sync_timeout(Duration::from_secs(2))
        .set_heartbeat_interval(Duration::from_secs(3600))
}

pub fn transport() -> Arc<MockTransport> {
    Arc::new(MockTransport::new())
}

pub fn multiplexer(transport: &Arc<MockTransport>) -> Multiplexer {
    Multiplexer::new(transport.clone() as Arc<dyn Transport>)
}

pub async fn connected(
    transport: &Arc<MockTransport>,
    options: ConfigurationOptions,
) -> (Multiplexer, usize) {
    let mux = multiplexer(transport);
    let connected = mux.connect(options).await.unwrap();
    (mux, connected)
}

pub fn slot_settings(
    transport: &Arc<MockTransport>,
) -> (SlotSettings, UnboundedReceiver<ConnectionEvent>) {
    let (tx, rx) = unbounded_channel();
    let settings = SlotSettings::new(transport.clone() as Arc<dyn Transport>)
        .set_handshake(Arc::new(NoHandshake))
        .set_connect_timeout(Duration::from_millis(200))
        .set_event_sender(tx);
    (settings, rx)
}

/// Waits until `condition` holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}

pub async fn next_event(events: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no event in time")
        .expect("event channel closed")
}

/// An `io::Write` whose output can be inspected.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
