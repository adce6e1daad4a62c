mod bail;
mod cancel;

pub mod prelude {
    pub use crate::bail::ParticipantBailError;
    pub use crate::cancel::{CancelHandle, DelegatedCancelListener, RunCancelledError};
}
