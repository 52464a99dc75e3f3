use std::sync::Arc;

use activities_core::error::Result;
use activities_core::ActivityMode;

use crate::config::ActivitiesConfig;
use crate::env::WindowRef;
use crate::host::{
    ActivityHost, ActivityIframeHost, ActivityWindowPopupHost, ActivityWindowRedirectHost,
    HostRef, RequestInput,
};

/// Page-level entry point: picks the host transport for the current window
/// and connects it.
pub struct ActivityHosts {
    win: WindowRef,
    config: Arc<ActivitiesConfig>,
}

impl ActivityHosts {
    pub const VERSION: &'static str = "1.12";

    pub fn new(win: WindowRef, config: Arc<ActivitiesConfig>) -> Self {
        Self { win, config }
    }

    /// Iframe detection comes first: a popup may itself be framed.
    pub fn select_mode(&self) -> ActivityMode {
        let win = &self.win;
        if win.top_id() != win.id() {
            return ActivityMode::Iframe;
        }
        match win.opener() {
            Some(opener) if opener.id() != win.id() && !opener.is_closed() => ActivityMode::Popup,
            _ => ActivityMode::Redirect,
        }
    }

    pub async fn connect_host(&self, request: Option<RequestInput>) -> Result<HostRef> {
        let mode = self.select_mode();
        tracing::debug!(mode = mode.as_str(), version = Self::VERSION, "connecting activity host");
        let win = Arc::clone(&self.win);
        match mode {
            ActivityMode::Iframe => ActivityIframeHost::new(win, &self.config).connect(request).await,
            ActivityMode::Popup => {
                ActivityWindowPopupHost::new(win, &self.config)?
                    .connect(request)
                    .await
            }
            ActivityMode::Redirect => {
                ActivityWindowRedirectHost::new(win, &self.config)
                    .connect(request)
                    .await
            }
        }
    }
}
