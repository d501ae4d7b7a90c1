pub mod api;
pub mod conversion_session;
pub mod error;
pub mod login;
pub mod pack_links;
pub mod timer;
pub mod upload;

pub use api::{HttpResourcePackApi, ResourcePackApi};
pub use conversion_session::{
    select_converted, ConversionEvent, ConversionOutcome, ConversionPolicy,
    ConversionSessionController, ConversionSnapshot, Preflight, SessionPhase,
};
pub use error::{ApiClientError, ConversionError};
pub use login::{LoginGate, LoginOutcome};
pub use timer::{PollTimer, TokioTimer};
pub use upload::{PackUpload, UploadRejected};
