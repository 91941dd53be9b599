//! The preview exchange: form values in, a playing clip out

pub mod error;
pub mod request;
pub mod response;
pub mod session;

pub use error::{DecodeError, PreviewError};
pub use request::{
    FormData, PreviewRequest, RequestBuilder, DEFAULT_PREVIEW_TEXT, PREVIEW_COMMAND,
};
pub use response::PreviewResponse;
pub use session::{PreviewSession, PreviewStarted, SessionConfig, SessionState};
