use super::*;
use crate::{ClientConfig, SyncClient, Synchronizer};
use async_trait::async_trait;
use shared::error::StoreError;
use std::time::Duration;
use store::{RealtimeStore, Store, WatchHandle};
use tokio::time::timeout;

const RECV_DEADLINE: Duration = Duration::from_secs(5);

fn synchronizer() -> (Synchronizer, Store) {
    let store = Store::new();
    (Synchronizer::new(Arc::new(store.clone())), store)
}

async fn pump<F, T>(future: F) -> T
where
    F: std::future::Future<Output = Option<Result<T, StoreError>>>,
{
    timeout(RECV_DEADLINE, future)
        .await
        .expect("update deadline")
        .expect("subscription active")
        .expect("update ok")
}

struct WriteFailingStore {
    inner: Store,
}

#[async_trait]
impl RealtimeStore for WriteFailingStore {
    async fn get(&self, path: &KeyPath) -> Result<Option<Value>, StoreError> {
        self.inner.get(path).await
    }

    async fn put(&self, path: &KeyPath, _value: Value) -> Result<(), StoreError> {
        Err(StoreError::write(path.as_str(), "injected write failure"))
    }

    async fn delete(&self, path: &KeyPath) -> Result<(), StoreError> {
        Err(StoreError::write(path.as_str(), "injected write failure"))
    }

    async fn watch(&self, path: &KeyPath) -> Result<WatchHandle, StoreError> {
        self.inner.watch(path).await
    }
}

#[test]
fn readings_format_like_the_dashboard_cards() {
    assert_eq!(format_reading(Some(&json!(23.5)), 1, "°C"), "23.5°C");
    assert_eq!(format_reading(Some(&json!(60)), 1, "%"), "60.0%");
    assert_eq!(format_reading(Some(&json!(412)), 0, ""), "412");
    assert_eq!(format_reading(Some(&json!("elevated")), 0, ""), "elevated");
    assert_eq!(format_reading(None, 1, "°C"), "N/A");
    assert_eq!(format_reading(Some(&Value::Null), 0, ""), "N/A");
}

#[tokio::test]
async fn sensor_panel_reports_readings_with_units_and_placeholders() {
    let (sync, store) = synchronizer();
    store
        .put(&sensors::temperature(), json!(23.5))
        .await
        .expect("seed temperature");
    store
        .put(&sensors::humidity(), json!(60))
        .await
        .expect("seed humidity");

    let mut panel = SensorPanel::attach(&sync).await.expect("attach");
    let snapshot = pump(panel.next_snapshot()).await;

    assert_eq!(snapshot.temperature.display(), "23.5°C");
    assert_eq!(snapshot.temperature.unit(), "°C");
    assert_eq!(snapshot.humidity.display(), "60.0%");
    assert_eq!(snapshot.humidity.unit(), "%");
    assert_eq!(snapshot.gas.display(), "N/A");
}

#[tokio::test]
async fn sensor_panel_tracks_device_updates() {
    let (sync, store) = synchronizer();
    let mut panel = SensorPanel::attach(&sync).await.expect("attach");
    let initial = pump(panel.next_snapshot()).await;
    assert_eq!(initial.temperature.display(), "N/A");

    store
        .put(&sensors::gas(), json!("elevated"))
        .await
        .expect("device write");
    let updated = pump(panel.next_snapshot()).await;
    assert_eq!(updated.gas.display(), "elevated");

    panel.detach();
    assert!(panel.next_snapshot().await.is_none());
}

#[test]
fn toggle_walks_the_two_phase_transitions() {
    let mut toggle = Toggle::Confirmed(true);

    toggle.begin(false);
    assert_eq!(
        toggle,
        Toggle::Pending {
            last_confirmed: true,
            requested: false
        }
    );
    assert!(toggle.is_pending());
    assert!(!toggle.effective());

    toggle.confirm();
    assert_eq!(toggle, Toggle::Confirmed(false));

    toggle.begin(true);
    toggle.fail();
    assert_eq!(toggle, Toggle::Confirmed(false));

    // A re-request while pending keeps the original confirmed fallback.
    toggle.begin(true);
    toggle.begin(false);
    toggle.fail();
    assert_eq!(toggle, Toggle::Confirmed(false));

    toggle.apply_remote(true);
    assert_eq!(toggle, Toggle::Confirmed(true));
}

#[tokio::test]
async fn control_panel_defaults_apply_when_commands_are_absent() {
    let (sync, _store) = synchronizer();
    let mut panel = ControlPanel::attach(&sync).await.expect("attach");
    pump(panel.sync_once()).await;

    assert!(panel.auto_mode().effective());
    assert!(panel.buzzer().effective());
    for channel in LedChannel::ALL {
        assert!(!panel.led(channel).effective());
    }
}

#[tokio::test]
async fn control_panel_mirrors_remote_flags_and_tolerates_bad_types() {
    let (sync, store) = synchronizer();
    let mut panel = ControlPanel::attach(&sync).await.expect("attach");
    pump(panel.sync_once()).await;

    store
        .put(
            &commands::root(),
            json!({
                "autoMode": "banana",
                "buzzer": false,
                "leds": { "tempRed": true }
            }),
        )
        .await
        .expect("device write");
    pump(panel.sync_once()).await;

    // Non-boolean autoMode falls back to its default at the typed layer.
    assert!(panel.auto_mode().effective());
    assert!(!panel.buzzer().effective());
    assert!(panel.led(LedChannel::TempRed).effective());
    assert!(!panel.led(LedChannel::TempGreen).effective());
}

#[tokio::test]
async fn control_panel_confirms_writes_and_observes_its_own_echo() {
    let (sync, store) = synchronizer();
    let mut panel = ControlPanel::attach(&sync).await.expect("attach");
    pump(panel.sync_once()).await;

    panel.set_auto_mode(false).await.expect("set");
    assert_eq!(panel.auto_mode(), Toggle::Confirmed(false));
    assert_eq!(
        store.get(&commands::auto_mode()).await.expect("get"),
        Some(json!(false))
    );

    // The panel's own write comes back through the subscription.
    pump(panel.sync_once()).await;
    assert_eq!(panel.auto_mode(), Toggle::Confirmed(false));

    panel.set_led(LedChannel::HumidGreen, true).await.expect("set led");
    assert_eq!(
        store
            .get(&commands::led(LedChannel::HumidGreen))
            .await
            .expect("get"),
        Some(json!(true))
    );
}

#[tokio::test]
async fn control_panel_reverts_on_write_failure() {
    let inner = Store::new();
    let sync = Synchronizer::new(Arc::new(WriteFailingStore {
        inner: inner.clone(),
    }));
    let mut panel = ControlPanel::attach(&sync).await.expect("attach");
    pump(panel.sync_once()).await;

    let error = panel.set_buzzer(false).await.expect_err("write must fail");
    assert!(matches!(error, StoreError::Write { .. }));
    assert_eq!(panel.buzzer(), Toggle::Confirmed(true));
    assert_eq!(inner.get(&commands::buzzer()).await.expect("get"), None);
}

#[tokio::test]
async fn message_panel_round_trips_send_and_clear() {
    let (sync, store) = synchronizer();
    let mut panel = MessagePanel::attach(&sync).await.expect("attach");
    pump(panel.sync_once()).await;
    assert_eq!(panel.current(), NO_MESSAGE_PLACEHOLDER);

    panel.send("  open the windows  ").await.expect("send");
    assert_eq!(
        store.get(&commands::display()).await.expect("get"),
        Some(json!("open the windows"))
    );
    pump(panel.sync_once()).await;
    assert_eq!(panel.current(), "open the windows");

    panel.clear().await.expect("clear");
    pump(panel.sync_once()).await;
    assert_eq!(panel.current(), NO_MESSAGE_PLACEHOLDER);
}

#[tokio::test]
async fn message_panel_rejects_blank_messages() {
    let (sync, store) = synchronizer();
    let panel = MessagePanel::attach(&sync).await.expect("attach");

    let error = panel.send("   ").await.expect_err("must reject");
    assert!(matches!(error, StoreError::Write { .. }));
    assert_eq!(store.get(&commands::display()).await.expect("get"), None);
}

#[tokio::test]
async fn message_panel_renders_empty_string_distinct_from_placeholder() {
    let (sync, store) = synchronizer();
    let mut panel = MessagePanel::attach(&sync).await.expect("attach");
    pump(panel.sync_once()).await;

    // A device-side empty string is a real value, not absence.
    store
        .put(&commands::display(), json!(""))
        .await
        .expect("device write");
    pump(panel.sync_once()).await;
    assert_eq!(panel.current(), "");
    assert_ne!(panel.current(), NO_MESSAGE_PLACEHOLDER);
}

#[test]
fn sync_client_builds_ws_urls_from_the_http_endpoint() {
    let client = SyncClient::connect(ClientConfig {
        server_url: "http://127.0.0.1:8080/".into(),
        auth_token: Some("secret".into()),
    })
    .expect("connect");
    assert_eq!(client.data_url(&commands::display()), "http://127.0.0.1:8080/data/commands/display");
    assert_eq!(client.subscribe_url(), "ws://127.0.0.1:8080/ws?token=secret");
}

#[test]
fn sync_client_percent_encodes_the_subscription_token() {
    let client = SyncClient::connect(ClientConfig {
        server_url: "https://airlink.example".into(),
        auth_token: Some("a&b c#d".into()),
    })
    .expect("connect");
    assert_eq!(
        client.subscribe_url(),
        "wss://airlink.example/ws?token=a%26b+c%23d"
    );
}
