//! Data models for ResQ.
//!
//! Persisted records (`User`, `Alert`) and the request/response types of the
//! HTTP surface. All shapes are fixed value types: required and optional
//! fields are enumerated here and validated once when a request body is
//! deserialized, never re-checked ad hoc downstream.
//!
//! JSON uses camelCase field names (`deviceId`, `helperId`, `createdAt`) to
//! match the client contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of an SOS, with 1 the most urgent.
///
/// Serialized as its numeric value; any number outside {1, 2, 3} is rejected
/// at the deserialization boundary with a 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AlertLevel {
    /// Life-threatening, needs help right now.
    Immediate = 1,
    /// Urgent but not immediately life-threatening.
    Urgent = 2,
    /// Needs assistance soon.
    SemiUrgent = 3,
}

impl AlertLevel {
    /// Decode from a stored integer column.
    pub fn from_repr(value: i64) -> Option<Self> {
        match value {
            1 => Some(AlertLevel::Immediate),
            2 => Some(AlertLevel::Urgent),
            3 => Some(AlertLevel::SemiUrgent),
            _ => None,
        }
    }

    /// The integer stored in the database and sent over the wire.
    pub fn as_repr(self) -> i64 {
        self as i64
    }
}

impl TryFrom<u8> for AlertLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        AlertLevel::from_repr(i64::from(value))
            .ok_or_else(|| format!("level must be 1, 2, or 3, got {value}"))
    }
}

impl From<AlertLevel> for u8 {
    fn from(level: AlertLevel) -> Self {
        level as u8
    }
}

/// A participating device, optionally linked to an account.
///
/// Identified by a durable client-generated `device_id`; a device can exist
/// purely from anonymous heartbeats (no email, no name) or be linked to an
/// account after registration. Never hard-deleted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,

    /// Client-generated stable token, unique across users.
    pub device_id: String,

    pub email: Option<String>,

    /// Plaintext-equivalent credential; auth hardening is out of scope.
    /// Never serialized into responses.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Last reported position, absent until the first heartbeat with one.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    /// Server-assigned liveness timestamp, refreshed on every heartbeat.
    pub last_seen: DateTime<Utc>,

    pub name: Option<String>,
}

/// One SOS broadcast.
///
/// Coordinates and level are immutable once created; the lifecycle flags
/// (`active`, `helper_id`, `verified`) are interpreted by
/// [`crate::lifecycle::AlertState`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,

    /// Device that sent the SOS.
    pub device_id: String,

    pub latitude: f64,
    pub longitude: f64,

    pub level: AlertLevel,

    pub message: String,

    /// Visible in discovery while true.
    pub active: bool,

    /// The responder who claimed this alert, at most one.
    pub helper_id: Option<i64>,

    /// Sender confirmed the responder's help.
    pub verified: bool,

    /// Server-assigned creation time.
    pub created_at: DateTime<Utc>,
}

/// Request body for POST /api/heartbeat.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,

    /// Updates the display name only when present and non-empty.
    pub name: Option<String>,
}

/// Response body for POST /api/heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
}

/// Request body for POST /api/alerts.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRequest {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub level: AlertLevel,
    pub message: String,
}

/// Query parameters for GET /api/alerts.
///
/// Latitude and longitude are required; a missing or non-numeric value is a
/// 400 at extraction time.
#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,

    /// Search radius in meters (default: 5000).
    #[serde(default = "default_radius_m")]
    pub radius: f64,
}

fn default_radius_m() -> f64 {
    5000.0
}

/// Request body for POST /api/alerts/:id/respond.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub helper_id: i64,
}

/// Request body for POST /api/auth/register.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub device_id: String,
    pub name: Option<String>,
}

/// Request body for POST /api/auth/login.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}
