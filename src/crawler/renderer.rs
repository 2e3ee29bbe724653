//! Rendering capability for script-driven pages
//!
//! Rendering is provided by an injected browser-like backend. A session is
//! one logical browsing context per site: pagination clicks operate on the
//! session's current DOM.

use crate::Result;
use async_trait::async_trait;
use url::Url;

/// Opens rendering sessions
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Opens `url` in a fresh session and waits for it to settle
    async fn open(&self, url: &Url) -> Result<Box<dyn RenderSession>>;
}

/// A live rendered page
#[async_trait]
pub trait RenderSession: Send {
    /// URL of the currently displayed page
    fn current_url(&self) -> Url;

    /// Serialized DOM of the current page
    async fn content(&mut self) -> Result<String>;

    /// Activates the first element matching `selector`
    ///
    /// Returns `Ok(false)` when the control is missing, hidden or disabled.
    async fn click_next(&mut self, selector: &str) -> Result<bool>;

    /// Releases the session
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
