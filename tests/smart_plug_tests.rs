//! Smart plug coordinator against a mock HTTP device

use eway_rust::coordinator::{Coordinator, SmartPlugCoordinator};
use eway_rust::readings::ReadingKind;
use eway_rust::{DeviceFamily, EwayError};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

mod common;
use common::{fast_http_config, MockEwayDevice};

fn status_body(on: bool) -> Value {
    json!({
        "id": 0,
        "source": "HTTP_in",
        "output": on,
        "apower": if on { 118.6 } else { 0.0 },
        "voltage": 230.2,
        "freq": 50.0,
        "current": if on { 0.515 } else { 0.0 },
        "aenergy": {"total": 2048.75, "by_minute": [0.0, 0.0, 0.0], "minute_ts": 1700000000},
        "ret_aenergy": {"total": 0.0},
        "temperature": {"tC": 38.5, "tF": 101.3}
    })
}

fn plug_for(device: &MockEwayDevice) -> SmartPlugCoordinator {
    SmartPlugCoordinator::new(device.identity(DeviceFamily::SmartPlug), fast_http_config())
        .unwrap()
}

#[tokio::test]
async fn test_refresh_writes_plug_keys() {
    let device = MockEwayDevice::start().await;
    device.mock_status("Switch.GetStatus", status_body(true)).await;
    let plug = plug_for(&device);

    let snapshot = plug.refresh().await.unwrap();

    assert_eq!(snapshot["switch_state"], json!(true));
    assert_eq!(snapshot["power"], json!(118.6));
    assert_eq!(snapshot["voltage"], json!(230.2));
    assert_eq!(snapshot["current"], json!(0.515));
    assert_eq!(snapshot["frequency"], json!(50.0));
    assert_eq!(snapshot["temperature"], json!(38.5));
    assert_eq!(snapshot["energy_total"], json!(2048.75));
    assert_eq!(snapshot["ret_energy_total"], json!(0.0));
    assert!(snapshot.contains_key("last_update"));

    let readings: Vec<_> = ReadingKind::for_family(DeviceFamily::SmartPlug)
        .iter()
        .filter_map(|kind| kind.read(&snapshot))
        .collect();
    assert_eq!(readings.len(), 8);
}

#[tokio::test]
async fn test_set_switch_then_confirms() {
    let device = MockEwayDevice::start().await;
    Mock::given(method("GET"))
        .and(path("/rpc/Switch.Set"))
        .and(query_param("id", "0"))
        .and(query_param("on", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"was_on": true})))
        .expect(1)
        .mount(&device.server)
        .await;
    device.mock_status("Switch.GetStatus", status_body(false)).await;
    let plug = plug_for(&device);

    plug.set_switch(false).await.unwrap();

    assert_eq!(plug.switch_state().await, Some(false));
    assert_eq!(device.calls("Switch.GetStatus").await.len(), 1);
    assert_eq!(plug.store().get("power").await, Some(json!(0.0)));
}

#[tokio::test]
async fn test_set_switch_keeps_requested_state_when_confirmation_fails() {
    let device = MockEwayDevice::start().await;
    device
        .mock_status("Switch.Set", json!({"was_on": false}))
        .await;
    device.mock_error("Switch.GetStatus", 500).await;
    let plug = plug_for(&device);

    plug.set_switch(true).await.unwrap();
    assert_eq!(plug.switch_state().await, Some(true));
}

#[tokio::test]
async fn test_set_switch_failure_propagates() {
    let device = MockEwayDevice::start().await;
    device.mock_error("Switch.Set", 500).await;
    let plug = plug_for(&device);

    assert!(matches!(
        plug.set_switch(true).await,
        Err(EwayError::HttpStatus { status: 500, .. })
    ));
    assert_eq!(plug.switch_state().await, None);
}

#[tokio::test]
async fn test_availability_follows_polls() {
    let device = MockEwayDevice::start().await;
    device
        .mock_status_times("Switch.GetStatus", status_body(true), 1)
        .await;
    device.mock_error("Switch.GetStatus", 502).await;
    let plug = plug_for(&device);

    assert!(!plug.is_available().await);
    plug.refresh().await.unwrap();
    assert!(plug.is_available().await);

    for _ in 0..3 {
        plug.refresh().await.unwrap();
    }
    assert!(!plug.is_available().await);
    assert!(matches!(
        plug.refresh().await,
        Err(EwayError::UpdateFailed(_))
    ));
}
