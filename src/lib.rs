//! ResQ - An emergency-alert broadcasting server.
//!
//! # Overview
//!
//! A device in distress issues a leveled SOS with GPS coordinates; nearby
//! devices poll for active alerts within a radius, claim them as responders,
//! and the sender later verifies that help arrived. Devices report presence
//! and location through periodic heartbeats.
//!
//! The system is single-instance and single-database: every client operation
//! is a short-lived transaction against one SQLite store, and discovery is
//! cooperative polling rather than push. Racing responders are resolved with
//! conditional writes, so exactly one wins a given alert.
//!
//! # API Endpoints
//!
//! - `POST /api/heartbeat` - Record a device's location and liveness
//! - `POST /api/alerts` - Broadcast a new SOS
//! - `GET /api/alerts` - Poll for active alerts within a radius
//! - `POST /api/alerts/:id/respond` - Claim an alert as its responder
//! - `POST /api/alerts/:id/verify` - Confirm the responder's help
//! - `DELETE /api/alerts/:id` - Cancel an alert
//! - `GET /api/history/resquest/:deviceId` - Alerts a device sent
//! - `GET /api/history/resqued/:helperId` - Alerts a helper responded to
//! - `POST /api/auth/register`, `POST /api/auth/login` - Optional accounts
//! - `GET /health` - Health check
//!
//! # Modules
//!
//! - [`model`]: Persisted records and HTTP request/response types
//! - [`geo`]: Great-circle distance calculation
//! - [`lifecycle`]: The alert state machine (ACTIVE → RESPONDED → VERIFIED / CANCELLED)
//! - [`storage`]: SQLite storage layer
//! - [`api`]: HTTP API handlers and router
//! - [`error`]: Error taxonomy and HTTP status mapping

pub mod api;
pub mod error;
pub mod geo;
pub mod lifecycle;
pub mod model;
pub mod storage;
