//! Boardlog Core Library
//!
//! Platform-agnostic engine for the Boardlog shared whiteboard: an
//! append-only action log, deterministic replay onto a drawing surface,
//! local undo/redo and realtime synchronization with late-join catch-up.

pub mod action;
pub mod config;
pub mod history;
pub mod input;
pub mod log;
pub mod session;
pub mod surface;
pub mod sync;
pub mod whiteboard;

pub use action::{Action, ActionKind, ActionPayload, LoggedAction, SerializableColor, ShapeVariant};
pub use config::{ConfigError, WhiteboardConfig};
pub use history::HistoryController;
pub use input::{InputController, InputOutcome, Key, Tool};
pub use crate::log::{ActionLog, LogError, MemoryActionLog, visible_since_last_clear};
pub use session::{LogSource, SessionError, SessionManager, SessionState, SessionUpdate, Submission};
pub use surface::{DrawingSurface, Primitive, VectorSurface, replay};
pub use sync::{ChannelEvent, ClientMessage, ConnectionState, ServerMessage, SyncChannel, SyncError};
pub use whiteboard::Whiteboard;

#[cfg(not(target_arch = "wasm32"))]
pub use crate::log::FileActionLog;
#[cfg(not(target_arch = "wasm32"))]
pub use session::HttpLogSource;
#[cfg(not(target_arch = "wasm32"))]
pub use sync::NativeChannel;
