//! Core engine modules - resolver, cache, synchronizer, workers
//!
//! These modules form the playback engine, independent of UI.

pub mod clock;
pub mod preloader;
pub mod resolver;
pub mod resource_cache;
pub mod session;
pub mod sim;
pub mod synchronizer;
pub mod workers;

// Re-exports for convenience
pub use clock::{ManualClock, SystemClock};
pub use preloader::Preloader;
pub use resource_cache::{CacheStats, MediaResourceCache};
pub use session::EditorSession;
pub use sim::SimulatedProvider;
pub use synchronizer::PlaybackSynchronizer;
pub use workers::{InlinePool, Workers};
