pub mod audio;
pub mod events;
pub mod recorder;
pub mod session;
pub mod transcript;
pub mod usage;

// Re-export commonly used types for convenience
pub use events::{DeviceCredentials, Envelope, InferenceConfig, Role};
pub use recorder::{Direction, EVENT_LOG_CAPACITY, EventLogEntry, EventRecorder};
pub use session::{
    CaptureFeed, CaptureTarget, ConnectionState, DeviceAuthState, S2sSession, SessionError,
    SessionNotice,
};
pub use transcript::{ChatMessage, Transcript};
pub use usage::{UsageMeter, UsageTotals};
