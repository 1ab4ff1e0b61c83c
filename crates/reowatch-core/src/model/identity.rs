// ── Core identity types ──
//
// MacAddress and CameraId form the foundation of every domain type.
// A device is addressed by its MAC; a camera is one channel of a device
// (standalone cameras are channel 0, NVRs fan out to many).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
///
/// Accepts colon-separated, dash-separated, or bare hex input; all three
/// canonicalize to the same value so identifiers parsed back out of topics
/// and URLs compare equal to the camera-reported form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let bare: String = raw
            .as_ref()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        if bare.len() == 12 && bare.chars().all(|c| c.is_ascii_hexdigit()) {
            let mut formatted = String::with_capacity(17);
            for (idx, c) in bare.chars().enumerate() {
                if idx > 0 && idx % 2 == 0 {
                    formatted.push(':');
                }
                formatted.push(c);
            }
            Self(formatted)
        } else {
            // Not a well-formed MAC; keep the lowercased input so lookups
            // still work against whatever the camera reported.
            Self(raw.as_ref().trim().to_lowercase().replace('-', ":"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Separator-free form (aabbccddeeff), used in topics, camera ids,
    /// and URL path segments.
    pub fn simple(&self) -> String {
        self.0.chars().filter(|c| *c != ':').collect()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(raw))
    }
}

// ── CameraId ────────────────────────────────────────────────────────

/// A single camera: one channel of a registered device.
///
/// Rendered as `<bare mac>-<channel>` (e.g. `aabbccddeeff-0`), which is
/// safe in URL paths and filenames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CameraId {
    device: MacAddress,
    channel: u8,
}

impl CameraId {
    pub fn new(device: MacAddress, channel: u8) -> Self {
        Self { device, channel }
    }

    pub fn device_id(&self) -> &MacAddress {
        &self.device
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.device.simple(), self.channel)
    }
}

/// Error parsing a camera id from its string form.
#[derive(Debug, thiserror::Error)]
#[error("Invalid camera id: {0}")]
pub struct InvalidCameraId(String);

impl FromStr for CameraId {
    type Err = InvalidCameraId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mac, channel) = s
            .rsplit_once('-')
            .ok_or_else(|| InvalidCameraId(s.to_owned()))?;
        if mac.is_empty() {
            return Err(InvalidCameraId(s.to_owned()));
        }
        let channel: u8 = channel.parse().map_err(|_| InvalidCameraId(s.to_owned()))?;
        Ok(Self::new(MacAddress::new(mac), channel))
    }
}

impl Serialize for CameraId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CameraId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
