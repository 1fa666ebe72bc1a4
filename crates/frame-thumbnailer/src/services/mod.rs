//! Thumbnail pipeline services, leaves first

pub mod capture_loop;
pub mod concurrency_gate;
pub mod frame_encoder;
pub mod render_session;
pub mod thumbnail_service;
pub mod thumbnail_store;

pub use capture_loop::{CaptureLoop, CapturePolicy};
pub use concurrency_gate::{ConcurrencyGate, Ticket};
pub use frame_encoder::FrameEncoder;
pub use render_session::{ActiveSessions, RenderSession, SessionState};
pub use thumbnail_service::ThumbnailService;
pub use thumbnail_store::{StoreStats, ThumbnailStore};
