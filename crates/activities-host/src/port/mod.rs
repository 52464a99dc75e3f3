//! Client side of the protocol: the page that opens an activity.
//!
//! `ActivityPorts` is the page-level entry point. It opens iframe and window
//! activities and routes results, including ones that come back by
//! redirect, to handlers registered per request id.

pub mod iframe;
pub mod ports;
pub mod redirect;
pub mod window;

use std::sync::Arc;

use async_trait::async_trait;

use activities_core::error::Result;
use activities_core::{ActivityMode, ActivityResult};

pub use iframe::{ActivityIframePort, ResizeRequestCallback};
pub use ports::{ActivityPorts, ResultHandler};
pub use redirect::{discover_redirect_result, ActivityWindowRedirectPort};
pub use window::{ActivityWindowPort, OpenOptions};

/// Client view of one activity run.
///
/// Callers should check the result's origin, `origin_verified` and
/// `secure_channel` before trusting its data.
#[async_trait]
pub trait ActivityPort: Send + Sync {
    fn mode(&self) -> ActivityMode;

    /// Resolves once the activity finished. Cancellation is
    /// `ActivityError::Aborted` and failure `ActivityError::Failed`.
    async fn accept_result(&self) -> Result<ActivityResult>;
}

pub type PortRef = Arc<dyn ActivityPort>;

#[async_trait]
impl ActivityPort for ActivityIframePort {
    fn mode(&self) -> ActivityMode {
        ActivityIframePort::mode(self)
    }

    async fn accept_result(&self) -> Result<ActivityResult> {
        ActivityIframePort::accept_result(self).await
    }
}
