//! The three dashboard surfaces, mirrored one-to-one onto their remote
//! key paths: sensor readings, command flags, and the display message.

use std::sync::Arc;

use serde_json::{json, Value};
use shared::{
    error::StoreError,
    paths::{commands, sensors, KeyPath, LedChannel},
    paths::{AUTO_MODE_DEFAULT, BUZZER_DEFAULT, LED_DEFAULT, NO_MESSAGE_PLACEHOLDER},
};
use store::RealtimeStore;

use crate::{Synchronizer, ValueSubscription};

/// Placeholder for readings the device has not reported.
pub const ABSENT_READING: &str = "N/A";

/// Renders one sensor payload: absent becomes the placeholder, numbers
/// get fixed decimals plus the unit, strings pass through verbatim (the
/// gas sensor reports either).
pub fn format_reading(value: Option<&Value>, decimals: usize, unit: &str) -> String {
    match value {
        None | Some(Value::Null) => ABSENT_READING.to_string(),
        Some(Value::Number(number)) => match number.as_f64() {
            Some(number) => format!("{number:.decimals$}{unit}"),
            None => format!("{number}{unit}"),
        },
        Some(Value::String(text)) => format!("{text}{unit}"),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    value: Option<Value>,
    unit: &'static str,
    decimals: usize,
}

impl Reading {
    fn new(value: Option<Value>, unit: &'static str, decimals: usize) -> Self {
        Self {
            value,
            unit,
            decimals,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn unit(&self) -> &'static str {
        self.unit
    }

    pub fn display(&self) -> String {
        format_reading(self.value.as_ref(), self.decimals, self.unit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorSnapshot {
    pub temperature: Reading,
    pub humidity: Reading,
    pub gas: Reading,
}

impl SensorSnapshot {
    fn decode(value: &Value) -> Self {
        let field = |key: &str| value.get(key).filter(|v| !v.is_null()).cloned();
        Self {
            temperature: Reading::new(field("temperature"), "°C", 1),
            humidity: Reading::new(field("humidity"), "%", 1),
            gas: Reading::new(field("gas"), "", 0),
        }
    }
}

/// Read-only mirror of `sensors/*`, written by the device.
pub struct SensorPanel {
    subscription: ValueSubscription,
}

impl SensorPanel {
    pub async fn attach(sync: &Synchronizer) -> Result<Self, StoreError> {
        let subscription = sync.subscribe(sensors::root(), json!({})).await?;
        Ok(Self { subscription })
    }

    pub async fn next_snapshot(&mut self) -> Option<Result<SensorSnapshot, StoreError>> {
        self.subscription
            .next()
            .await
            .map(|result| result.map(|value| SensorSnapshot::decode(&value)))
    }

    pub fn detach(&mut self) {
        self.subscription.cancel();
    }
}

/// Two-phase optimistic flag state: a write moves the flag to `Pending`
/// immediately, then either confirms or reverts to the last confirmed
/// value when the remote write resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Confirmed(bool),
    Pending { last_confirmed: bool, requested: bool },
}

impl Toggle {
    /// What the UI shows: the optimistic value while pending.
    pub fn effective(&self) -> bool {
        match *self {
            Toggle::Confirmed(value) => value,
            Toggle::Pending { requested, .. } => requested,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Toggle::Pending { .. })
    }

    pub fn begin(&mut self, requested: bool) {
        let last_confirmed = match *self {
            Toggle::Confirmed(value) => value,
            Toggle::Pending { last_confirmed, .. } => last_confirmed,
        };
        *self = Toggle::Pending {
            last_confirmed,
            requested,
        };
    }

    pub fn confirm(&mut self) {
        if let Toggle::Pending { requested, .. } = *self {
            *self = Toggle::Confirmed(requested);
        }
    }

    pub fn fail(&mut self) {
        if let Toggle::Pending { last_confirmed, .. } = *self {
            *self = Toggle::Confirmed(last_confirmed);
        }
    }

    /// An incoming remote value always wins, including the echo of this
    /// panel's own confirmed write.
    pub fn apply_remote(&mut self, observed: bool) {
        *self = Toggle::Confirmed(observed);
    }
}

/// Mirror of `commands/*` flags with optimistic writes. Non-boolean
/// remote payloads fall back to the flag's documented default at this
/// typed layer.
pub struct ControlPanel {
    store: Arc<dyn RealtimeStore>,
    subscription: ValueSubscription,
    auto_mode: Toggle,
    buzzer: Toggle,
    leds: [Toggle; 6],
}

impl ControlPanel {
    pub async fn attach(sync: &Synchronizer) -> Result<Self, StoreError> {
        let subscription = sync.subscribe(commands::root(), json!({})).await?;
        Ok(Self {
            store: sync.store(),
            subscription,
            auto_mode: Toggle::Confirmed(AUTO_MODE_DEFAULT),
            buzzer: Toggle::Confirmed(BUZZER_DEFAULT),
            leds: [Toggle::Confirmed(LED_DEFAULT); 6],
        })
    }

    /// Pumps one remote update into the mirrored flags. Yields `None`
    /// once the underlying subscription is terminal.
    pub async fn sync_once(&mut self) -> Option<Result<(), StoreError>> {
        match self.subscription.next().await? {
            Ok(value) => {
                self.apply_update(&value);
                Some(Ok(()))
            }
            Err(error) => Some(Err(error)),
        }
    }

    fn apply_update(&mut self, value: &Value) {
        let flag = |key: &str, default: bool| {
            value.get(key).and_then(Value::as_bool).unwrap_or(default)
        };
        self.auto_mode.apply_remote(flag("autoMode", AUTO_MODE_DEFAULT));
        self.buzzer.apply_remote(flag("buzzer", BUZZER_DEFAULT));
        for channel in LedChannel::ALL {
            let observed = value
                .get("leds")
                .and_then(|leds| leds.get(channel.key()))
                .and_then(Value::as_bool)
                .unwrap_or(LED_DEFAULT);
            self.leds[channel as usize].apply_remote(observed);
        }
    }

    pub fn auto_mode(&self) -> Toggle {
        self.auto_mode
    }

    pub fn buzzer(&self) -> Toggle {
        self.buzzer
    }

    pub fn led(&self, channel: LedChannel) -> Toggle {
        self.leds[channel as usize]
    }

    pub async fn set_auto_mode(&mut self, enabled: bool) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        Self::write_flag(store.as_ref(), &mut self.auto_mode, commands::auto_mode(), enabled).await
    }

    pub async fn set_buzzer(&mut self, enabled: bool) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        Self::write_flag(store.as_ref(), &mut self.buzzer, commands::buzzer(), enabled).await
    }

    pub async fn set_led(&mut self, channel: LedChannel, enabled: bool) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        Self::write_flag(
            store.as_ref(),
            &mut self.leds[channel as usize],
            commands::led(channel),
            enabled,
        )
        .await
    }

    async fn write_flag(
        store: &dyn RealtimeStore,
        toggle: &mut Toggle,
        path: KeyPath,
        enabled: bool,
    ) -> Result<(), StoreError> {
        toggle.begin(enabled);
        match store.put(&path, Value::Bool(enabled)).await {
            Ok(()) => {
                toggle.confirm();
                Ok(())
            }
            Err(error) => {
                toggle.fail();
                Err(error)
            }
        }
    }

    pub fn detach(&mut self) {
        self.subscription.cancel();
    }
}

/// Mirror of `commands/display`. An absent message renders the
/// placeholder, which is distinct from an empty string; clearing deletes
/// the path rather than writing "".
pub struct MessagePanel {
    store: Arc<dyn RealtimeStore>,
    subscription: ValueSubscription,
    current: String,
}

impl MessagePanel {
    pub async fn attach(sync: &Synchronizer) -> Result<Self, StoreError> {
        let subscription = sync
            .subscribe(commands::display(), json!(NO_MESSAGE_PLACEHOLDER))
            .await?;
        Ok(Self {
            store: sync.store(),
            subscription,
            current: NO_MESSAGE_PLACEHOLDER.to_string(),
        })
    }

    pub async fn sync_once(&mut self) -> Option<Result<(), StoreError>> {
        match self.subscription.next().await? {
            Ok(value) => {
                self.current = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                Some(Ok(()))
            }
            Err(error) => Some(Err(error)),
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Publishes a trimmed message; empty or whitespace-only input is
    /// rejected before anything reaches the store.
    pub async fn send(&self, message: &str) -> Result<(), StoreError> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(StoreError::write(
                commands::display().as_str(),
                "message must not be empty",
            ));
        }
        self.store.put(&commands::display(), json!(trimmed)).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.delete(&commands::display()).await
    }

    pub fn detach(&mut self) {
        self.subscription.cancel();
    }
}

#[cfg(test)]
#[path = "tests/panels_tests.rs"]
mod tests;
