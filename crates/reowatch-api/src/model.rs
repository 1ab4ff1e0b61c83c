// Vendor wire shapes for the Reolink JSON command API.
//
// Field names mirror the camera's JSON exactly (serde renames where the
// vendor uses camelCase or PascalCase). Consumers work with the typed
// accessors; raw `serde_json::Value` only appears in the settings
// round-trip used by capability toggles.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ── Command envelope ────────────────────────────────────────────────

/// One entry of the JSON array POSTed to `/cgi-bin/api.cgi`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest {
    pub cmd: String,
    pub action: u8,
    pub param: serde_json::Value,
}

impl CommandRequest {
    pub fn new(cmd: impl Into<String>, action: u8, param: serde_json::Value) -> Self {
        Self {
            cmd: cmd.into(),
            action,
            param,
        }
    }
}

/// One entry of the JSON array the camera replies with.
///
/// `code == 0` means success and `value` is populated; any other code
/// comes with an `error` body instead.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandReply {
    pub cmd: String,
    pub code: i32,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(rename = "rspCode")]
    pub rsp_code: i32,
    #[serde(default)]
    pub detail: Option<String>,
}

// ── Capabilities ────────────────────────────────────────────────────

/// Object classes the camera's AI detection reports.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AiKind {
    Person,
    Vehicle,
    Pet,
}

impl AiKind {
    /// The key the camera uses for this class in `GetAiState` replies.
    pub fn wire_key(self) -> &'static str {
        match self {
            Self::Person => "people",
            Self::Vehicle => "vehicle",
            Self::Pet => "dog_cat",
        }
    }
}

/// Togglable / observable camera capabilities.
///
/// One tagged enum covers every switch the camera exposes; there is a
/// single generic toggle path instead of one type per switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCapability {
    Motion,
    Ftp,
    Email,
    IrLights,
    Recording,
    Ai(AiKind),
    Spotlight,
    Siren,
    Push,
    Audio,
}

impl fmt::Display for DeviceCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Motion => write!(f, "motion"),
            Self::Ftp => write!(f, "ftp"),
            Self::Email => write!(f, "email"),
            Self::IrLights => write!(f, "ir_lights"),
            Self::Recording => write!(f, "recording"),
            Self::Ai(kind) => write!(f, "ai_{kind}"),
            Self::Spotlight => write!(f, "spotlight"),
            Self::Siren => write!(f, "siren"),
            Self::Push => write!(f, "push"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

// ── Auth ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LoginValue {
    #[serde(rename = "Token")]
    pub token: LoginToken,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginToken {
    pub name: String,
    #[serde(rename = "leaseTime", default)]
    pub lease_time: Option<u64>,
}

// ── Device identity & settings ──────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct DevInfoValue {
    #[serde(rename = "DevInfo")]
    pub dev_info: DevInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DevInfo {
    #[serde(rename = "channelNum")]
    pub channel_num: u8,
    pub model: String,
    pub name: String,
    #[serde(rename = "firmVer", default)]
    pub firm_ver: Option<String>,
    #[serde(rename = "serial", default)]
    pub serial: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalLinkValue {
    #[serde(rename = "LocalLink")]
    pub local_link: LocalLink,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalLink {
    pub mac: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetPortValue {
    #[serde(rename = "NetPort")]
    pub net_port: NetPort,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetPort {
    #[serde(rename = "onvifPort")]
    pub onvif_port: u16,
    #[serde(rename = "rtmpPort")]
    pub rtmp_port: u16,
    #[serde(rename = "rtspPort")]
    pub rtsp_port: u16,
}

/// Aggregated device identity, assembled from `GetDevInfo`,
/// `GetLocalLink`, and `GetNetPort`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Raw MAC string as the camera reports it.
    pub mac: String,
    pub model: String,
    pub name: String,
    /// Number of channels. 1 for standalone cameras, >1 for NVRs.
    pub channels: u8,
    pub host: String,
    pub onvif_port: u16,
    pub rtmp_port: u16,
}

/// Snapshot of the camera's current toggle settings.
#[derive(Debug, Clone, Default)]
pub struct CameraSettings {
    /// Current on/off state per capability the camera reported support for.
    /// Capabilities the camera rejected (unsupported command) are absent.
    pub toggles: HashMap<DeviceCapability, bool>,
}

// ── Motion / AI state ───────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct MdStateValue {
    pub state: u8,
}

/// Per-class AI detection state as reported by `GetAiState`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct AiObjectState {
    pub alarm_state: u8,
    pub support: u8,
}

impl AiObjectState {
    pub fn detected(&self) -> bool {
        self.alarm_state != 0
    }

    pub fn supported(&self) -> bool {
        self.support != 0
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AiStateValue {
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub people: Option<AiObjectState>,
    #[serde(default)]
    pub vehicle: Option<AiObjectState>,
    #[serde(rename = "dog_cat", default)]
    pub pet: Option<AiObjectState>,
}

impl AiStateValue {
    /// Look up the state for one object class.
    pub fn class(&self, kind: AiKind) -> Option<AiObjectState> {
        match kind {
            AiKind::Person => self.people,
            AiKind::Vehicle => self.vehicle,
            AiKind::Pet => self.pet,
        }
    }
}

/// Authoritative per-channel state snapshot from one `get_states` call.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub channel: u8,
    pub motion: bool,
    /// Absent on models without AI detection.
    pub ai: Option<AiStateValue>,
}

#[derive(Debug, Clone, Default)]
pub struct CameraStates {
    pub channels: Vec<ChannelState>,
}

impl CameraStates {
    pub fn channel(&self, channel: u8) -> Option<&ChannelState> {
        self.channels.iter().find(|c| c.channel == channel)
    }

    /// True if any channel currently reports motion.
    pub fn any_motion(&self) -> bool {
        self.channels.iter().any(|c| c.motion)
    }
}

// ── Recording search ────────────────────────────────────────────────

/// Timestamp structure the camera uses in search requests and replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTime {
    pub year: i32,
    pub mon: u32,
    pub day: u32,
    pub hour: u32,
    pub min: u32,
    pub sec: u32,
}

impl SearchTime {
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            year: dt.year(),
            mon: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            min: dt.minute(),
            sec: dt.second(),
        }
    }

    /// Convert to an absolute timestamp. Returns `None` for nonsense
    /// field values (the camera occasionally emits zeroed structs).
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(self.year, self.mon, self.day, self.hour, self.min, self.sec)
            .single()
    }
}

/// One month of day-level recording availability.
///
/// `table` is a bitmap string with one character per day of the month;
/// `'1'` at (1-indexed) position N means day N has recordings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub year: i32,
    pub mon: u32,
    pub table: String,
}

impl SearchStatus {
    /// Decode the bitmap into 1-indexed day numbers.
    pub fn days(&self) -> Vec<u32> {
        self.table
            .chars()
            .enumerate()
            .filter(|&(_, flag)| flag == '1')
            .filter_map(|(idx, _)| u32::try_from(idx + 1).ok())
            .collect()
    }
}

/// One recording segment from a full (non-status-only) search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFile {
    #[serde(rename = "StartTime")]
    pub start_time: SearchTime,
    #[serde(rename = "EndTime")]
    pub end_time: SearchTime,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "type", default)]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResultValue {
    #[serde(rename = "SearchResult")]
    pub search_result: SearchResultBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResultBody {
    #[serde(default)]
    pub channel: u8,
    #[serde(rename = "Status", default)]
    pub status: Option<Vec<SearchStatus>>,
    #[serde(rename = "File", default)]
    pub file: Option<Vec<SearchFile>>,
}

/// Unified search output: month statuses and/or file records.
///
/// Cameras without an HDD reply with both lists absent; that decodes to
/// two empty vectors here, which callers treat as "no recordings".
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub statuses: Vec<SearchStatus>,
    pub files: Vec<SearchFile>,
}
