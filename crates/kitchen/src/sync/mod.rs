//! Offline-first sync engine
//!
//! A round pulls remote deltas for every kind, migrates locally referenced
//! assets, pushes local deltas and only then advances the cursor. Any round
//! can be repeated safely: upserts overwrite by id and asset rewrites are
//! one-directional.

mod assets;
mod cancel;
mod conflict;
mod cursor;
mod events;
mod fetch;
mod orchestrator;
mod push;
mod result;
mod timing;

pub use assets::{AssetMigrator, MigrationStats, logical_path, pending_assets};
pub use cancel::CancelFlag;
pub use conflict::{ConflictDecision, resolve};
pub use cursor::{CursorStore, effective_cursor};
pub use events::{SyncEvent, SyncEvents};
pub use fetch::{Confirmed, DeltaFetcher, Fetched, PullStats};
pub use orchestrator::SyncOrchestrator;
pub use push::{DeltaPusher, PushStats};
pub use result::{SyncMode, SyncResult, SyncStatus};
pub use timing::{cooldown_elapsed, cooldown_remaining};
