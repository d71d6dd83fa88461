// Shared fixtures for the device subsystem integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use devmesh_core::{
    CoreConfig, CoreError, DeviceDescription, DeviceEvent, DeviceEventType, DeviceId,
    DeviceManager, DeviceProvider, DeviceType, EventStream, MastershipRole, MemoryCluster,
    ProviderId,
};

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(50);

static TRACING: Once = Once::new();

/// Route core logs to the test harness when `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ── Fake provider ───────────────────────────────────────────────────

/// Provider that records every callback it receives.
pub struct FakeProvider {
    id: ProviderId,
    pub roles: Mutex<Vec<(DeviceId, MastershipRole)>>,
    pub probes: Mutex<Vec<DeviceId>>,
}

impl FakeProvider {
    pub fn new(scheme: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::new(scheme, name),
            roles: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
        })
    }

    pub fn roles_for(&self, device: &DeviceId) -> Vec<MastershipRole> {
        self.roles
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == device)
            .map(|(_, r)| *r)
            .collect()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.lock().unwrap().len()
    }
}

impl DeviceProvider for FakeProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn trigger_probe<'a>(&'a self, device: &'a DeviceId) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            self.probes.lock().unwrap().push(device.clone());
            Ok(())
        }
        .boxed()
    }

    fn role_changed<'a>(
        &'a self,
        device: &'a DeviceId,
        role: MastershipRole,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            self.roles.lock().unwrap().push((device.clone(), role));
            Ok(())
        }
        .boxed()
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn manager(cluster: &MemoryCluster, node: &str) -> DeviceManager {
    init_tracing();
    let handle = Arc::new(cluster.node(node));
    let config = CoreConfig {
        handshake_timeout: Duration::from_millis(200),
        role_change_timeout: Duration::from_millis(200),
        ..CoreConfig::for_node(node)
    };
    DeviceManager::new(config, handle.clone(), handle)
}

pub fn did(s: &str) -> DeviceId {
    DeviceId::parse(s).unwrap()
}

pub fn description(id: &DeviceId, sw: &str) -> DeviceDescription {
    DeviceDescription::new(
        id.as_str(),
        DeviceType::Switch,
        "whitebox",
        "1.1.x",
        sw,
        "43311-12345",
    )
}

// ── Event assertions ────────────────────────────────────────────────

pub async fn next_event(stream: &mut EventStream) -> Arc<DeviceEvent> {
    tokio::time::timeout(WAIT, stream.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

pub async fn expect_event(stream: &mut EventStream, expected: DeviceEventType) -> Arc<DeviceEvent> {
    let event = next_event(stream).await;
    assert_eq!(event.event_type, expected, "unexpected event: {event:?}");
    event
}

pub async fn expect_quiet(stream: &mut EventStream) {
    if let Ok(Some(event)) = tokio::time::timeout(QUIET, stream.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

/// Poll `check` until it holds or the wait budget runs out.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
