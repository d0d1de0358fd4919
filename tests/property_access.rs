mod common;

use async_trait::async_trait;
use common::Harness;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use waydroid_manager::container::ContainerState;
use waydroid_manager::ipc::{RemoteService, ServiceScope};
use waydroid_manager::prop::{PropertyAdapter, PropertyCoordinator, PropertyError, Result};
use waydroid_manager::session::SessionId;

/// Property store that remembers what state the container was in when touched.
struct FakeProperties {
    runtime: Arc<common::FakeRuntime>,
    values: Mutex<HashMap<String, String>>,
    observed: Mutex<Vec<ContainerState>>,
}

impl FakeProperties {
    fn new(runtime: Arc<common::FakeRuntime>) -> Self {
        Self {
            runtime,
            values: Mutex::new(HashMap::new()),
            observed: Mutex::new(Vec::new()),
        }
    }

    fn observed(&self) -> Vec<ContainerState> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PropertyAdapter for FakeProperties {
    async fn get(&self, session_id: SessionId, key: &str) -> Result<Option<String>> {
        self.observed.lock().unwrap().push(self.runtime.state(session_id));
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, session_id: SessionId, key: &str, value: &str) -> Result<()> {
        self.observed.lock().unwrap().push(self.runtime.state(session_id));
        if key.is_empty() {
            return Err(PropertyError::Property("empty key".to_string()));
        }
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

fn coordinator(harness: &Harness) -> (PropertyCoordinator, Arc<FakeProperties>) {
    let properties = Arc::new(FakeProperties::new(harness.runtime.clone()));
    (
        PropertyCoordinator::new(harness.manager.clone(), properties.clone()),
        properties,
    )
}

#[tokio::test]
async fn test_running_session_is_left_running() {
    let harness = Harness::new();
    harness.start(0).await.unwrap();
    let (coordinator, properties) = coordinator(&harness);

    coordinator.set(0, "persist.waydroid.width", "1080").await.unwrap();
    let value = coordinator.get(0, "persist.waydroid.width").await.unwrap();

    assert_eq!(value.as_deref(), Some("1080"));
    assert_eq!(properties.observed(), vec![ContainerState::Running; 2]);
    assert_eq!(harness.runtime.count("freeze 0"), 0);
}

#[tokio::test]
async fn test_frozen_session_is_thawed_then_refrozen() {
    let harness = Harness::new();
    harness.start(0).await.unwrap();
    harness.manager.freeze(0).await.unwrap();
    let (coordinator, properties) = coordinator(&harness);

    coordinator.set(0, "persist.waydroid.height", "1920").await.unwrap();

    assert_eq!(properties.observed(), vec![ContainerState::Running]);
    assert_eq!(harness.runtime.state(0), ContainerState::Frozen);
    assert_eq!(harness.manager.freeze_holds(0).await, Some(1));
}

#[tokio::test]
async fn test_failed_operation_still_refreezes() {
    let harness = Harness::new();
    harness.start(0).await.unwrap();
    harness.manager.freeze(0).await.unwrap();
    let (coordinator, _) = coordinator(&harness);

    let result = coordinator.set(0, "", "x").await;

    assert!(matches!(result, Err(PropertyError::Property(_))));
    assert_eq!(harness.runtime.state(0), ContainerState::Frozen);
}

#[tokio::test]
async fn test_second_hold_keeps_session_frozen() {
    let harness = Harness::new();
    harness.start(0).await.unwrap();
    harness.manager.freeze(0).await.unwrap();
    harness.manager.freeze(0).await.unwrap();
    let (coordinator, properties) = coordinator(&harness);

    let result = coordinator.get(0, "ro.sf.lcd_density").await;

    assert!(matches!(result, Err(PropertyError::HeldFrozen(0))));
    assert!(properties.observed().is_empty());
    assert_eq!(harness.manager.freeze_holds(0).await, Some(2));
    assert_eq!(harness.runtime.state(0), ContainerState::Frozen);
}

#[tokio::test]
async fn test_untracked_session_reads_as_stopped() {
    let harness = Harness::new();
    let (coordinator, properties) = coordinator(&harness);

    let result = coordinator.get(3, "ro.sf.lcd_density").await;
    assert!(matches!(result, Err(PropertyError::SessionStopped)));
    assert!(properties.observed().is_empty());
}

#[tokio::test]
async fn test_stopped_container_reads_as_stopped() {
    let harness = Harness::new();
    harness.start(0).await.unwrap();
    harness.runtime.set_state(0, ContainerState::Stopped);
    let (coordinator, _) = coordinator(&harness);

    let result = coordinator.get(0, "ro.sf.lcd_density").await;
    assert!(matches!(result, Err(PropertyError::SessionStopped)));
}

#[tokio::test]
async fn test_missing_session_service_reads_as_stopped() {
    let harness = Harness::new();
    harness.start(0).await.unwrap();
    let (coordinator, properties) = coordinator(&harness);
    let coordinator = coordinator.with_session_service(Arc::new(RemoteService::new(
        harness.work_dir.path().join("no-session.sock"),
        ServiceScope::User,
    )));

    let result = coordinator.get(0, "ro.sf.lcd_density").await;
    assert!(matches!(result, Err(PropertyError::SessionStopped)));
    assert!(properties.observed().is_empty());
}
