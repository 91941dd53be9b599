pub mod channel;
pub mod discovery;
pub mod media;
pub mod personas;
pub mod preview;
pub mod settings;

// Public library API - hosts embedding the preview flow should only need
// these; everything else is public for tests and custom channels/sinks.
pub use channel::{Channel, PendingReply};
pub use media::{AudioSink, ObjectStore, ObjectUrl};
pub use preview::{
    PreviewError, PreviewRequest, PreviewSession, PreviewStarted, RequestBuilder, SessionConfig,
    SessionState,
};
pub use settings::{Settings, SettingsManager};
