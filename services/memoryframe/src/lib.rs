//! MemoryFrame
//!
//! Stores a photo and a video as one "memory frame" and plays it back to
//! anyone holding the frame's QR code or direct link.
//!
//! ## Features
//!
//! - **Frame uploads**: signed-in users upload a photo/video pair; media lands
//!   in one object-storage bucket and a metadata row in PostgreSQL
//! - **Persisted sign-in**: email/password auth against a GoTrue backend, with
//!   the session kept on disk between runs
//! - **QR and direct-link lookup**: `?frame=<id>` links, QR codes encoding
//!   those links, and QR codes encoding a bare id all resolve the same frame
//! - **Playback API**: public HTTP endpoints for visitors
//! - **Order form**: order requests delivered through a transactional email API
//!
//! ## Architecture
//!
//! ```text
//!  CLI / Playback API
//!        │
//!        ▼
//! ┌──────────────┐   ┌──────────────┐
//! │ Lookup       │──▶│ Frame        │◀──── Auth Session ──▶ GoTrue
//! │ Resolver     │   │ Service      │
//! └──────────────┘   └──────────────┘
//!        ▲              │        │
//!        │              ▼        ▼
//! ┌──────────────┐ ┌─────────┐ ┌──────────┐
//! │ QR Scanner   │ │ Storage │ │ Record   │
//! └──────────────┘ │ Gateway │ │ Gateway  │
//!                  └─────────┘ └──────────┘
//!                      │            │
//!                      ▼            ▼
//!                  S3 bucket    PostgreSQL
//! ```

pub mod auth_session;
pub mod config;
pub mod error;
pub mod frame_service;
pub mod lookup_resolver;
pub mod order_mailer;
pub mod playback_api;
pub mod record_gateway;
pub mod scanner;
pub mod storage_gateway;

pub use auth_session::{AuthProvider, AuthSession, AuthUser, GoTrueClient, Session};
pub use config::Config;
pub use error::{FrameError, FrameResult};
pub use frame_service::{validate_submission, FrameService, MediaFile, NewFrameInput};
pub use lookup_resolver::{direct_link, resolve_identifier, LookupInput, LookupResolver};
pub use order_mailer::{OrderError, OrderMailer, OrderRequest};
pub use playback_api::{AppState, FrameResponse};
pub use record_gateway::{Frame, FrameRecords, NewFrameRecord, PgFrameStore};
pub use scanner::{
    LineQrSource, ProcessQrSource, QrScanner, QrSource, ScanError, ScanOutcome, ScanState,
};
pub use storage_gateway::{sanitize_filename, MediaKind, ObjectStore, S3StorageGateway};
