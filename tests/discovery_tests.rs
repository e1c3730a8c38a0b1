//! Discovery cache flow and firmware propagation

use eway_rust::coordinator::{Coordinator, CtCoordinator};
use eway_rust::discovery::discovery_cache::DiscoveryCache;
use eway_rust::discovery::DiscoveryAbort;
use eway_rust::registry::{FirmwareListener, InMemoryRegistry};
use eway_rust::DeviceFamily;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

mod common;
use common::{fast_http_config, wait_for, MockEwayDevice, WAIT};

#[tokio::test]
async fn test_admit_list_and_select() {
    let cache = DiscoveryCache::new();
    let configured = HashSet::new();

    let charger = cache
        .admit(
            "192.168.1.40",
            8888,
            "EwayCS-TFT-ABC_123._http._tcp.local.",
            &configured,
        )
        .await
        .unwrap();
    assert_eq!(charger.family(), DeviceFamily::Charger);
    assert_eq!(charger.identity.device_id, "ABC");
    assert_eq!(charger.identity.device_sn, "123");

    cache
        .admit("192.168.1.41", 80, "EwayCT-CT0099", &configured)
        .await
        .unwrap();

    assert_eq!(
        cache
            .admit("192.168.1.40", 8888, "EwayCS-TFT-ABC_123", &configured)
            .await
            .unwrap_err(),
        DiscoveryAbort::AlreadyDiscovered
    );
    assert_eq!(
        cache
            .admit("192.168.1.50", 80, "Printer", &configured)
            .await
            .unwrap_err(),
        DiscoveryAbort::NotEwayDevice
    );
    assert_eq!(
        cache
            .admit("192.168.1.51", 8888, "EwayCS-TFT-XYZ", &configured)
            .await
            .unwrap_err(),
        DiscoveryAbort::IncompleteDiscoveryInfo
    );

    assert_eq!(cache.len().await, 2);
    let stats = cache.stats().await;
    assert_eq!((stats.added, stats.duplicates, stats.rejected), (2, 1, 2));

    let chargers = cache.list_family(DeviceFamily::Charger).await.unwrap();
    assert_eq!(chargers.len(), 1);
    assert_eq!(
        cache
            .select(DeviceFamily::Charger, "EwayCS-TFT-ABC_123._http._tcp.local.")
            .await
            .unwrap()
            .host,
        "192.168.1.40"
    );
    assert_eq!(
        cache
            .select(DeviceFamily::Charger, "EwayCS-TFT-OTHER_1")
            .await
            .unwrap_err(),
        DiscoveryAbort::DeviceNotFound
    );
    assert_eq!(
        cache
            .list_family(DeviceFamily::SmartPlug)
            .await
            .unwrap_err(),
        DiscoveryAbort::NoDevicesFound
    );
}

#[tokio::test]
async fn test_already_configured_device_is_not_cached() {
    let cache = DiscoveryCache::new();
    let configured: HashSet<String> = ["10.0.0.2_8888_ABC".to_string()].into_iter().collect();

    assert_eq!(
        cache
            .admit("10.0.0.2", 8888, "EwayCS-TFT-ABC_123", &configured)
            .await
            .unwrap_err(),
        DiscoveryAbort::AlreadyConfigured
    );
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_ct_firmware_reaches_registry() {
    let device = MockEwayDevice::start().await;
    device
        .mock_status(
            "EM1.GetStatus",
            json!({"id": 0, "voltage": 230.0, "current": 1.0, "act_power": 230.0, "calibration": "CT-FW-7"}),
        )
        .await;
    device
        .mock_status("EM1.GetConfig", json!({"anti_backflow": false}))
        .await;

    let ct = CtCoordinator::new(device.identity(DeviceFamily::Ct), fast_http_config()).unwrap();
    let registry = Arc::new(InMemoryRegistry::new());
    let listener = FirmwareListener::spawn(ct.store(), registry.clone());

    ct.refresh().await.unwrap();

    let registry_ref = &registry;
    assert!(
        wait_for(WAIT, || async move {
            registry_ref.sw_version("SN-TEST").await.is_some()
        })
        .await
    );
    assert_eq!(
        registry.sw_version("SN-TEST").await,
        Some("CT-FW-7".to_string())
    );

    ct.shutdown().await.unwrap();
    listener.abort();
}
