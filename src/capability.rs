//! Automation capability — the opaque page-driving dependency.
//!
//! The capability executes a natural-language instruction against the
//! current page (optionally scoped to one element) and returns an
//! observation string. It is the only non-deterministic part of the system,
//! so everything behind this trait can be swapped for a scripted stub in
//! tests.
//!
//! Secrets never travel through `act`. `type_literal` is the direct,
//! non-interpreted keyboard channel, and its input is never echoed into any
//! observation or log.
//!
//! Page-mutating calls (`act`, `type_literal`) share one browser state and
//! must be issued sequentially per session; implementations are not required
//! to tolerate concurrent mutation.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::CapabilityError;

/// Handle to an on-page element, minted by the capability.
///
/// Handles are arena indices owned by the live session; they are invalid
/// once the session stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(usize);

impl ElementHandle {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// An image element discovered on the page, in page order.
#[derive(Debug, Clone)]
pub struct ImageElement {
    pub handle: ElementHandle,
    pub src: String,
    pub alt: String,
}

/// Page-driving automation capability.
#[async_trait]
pub trait AutomationCapability: Send + Sync {
    /// Open the browser session on the configured starting page.
    async fn start(&self) -> Result<(), CapabilityError>;

    /// Execute a natural-language instruction, optionally scoped to an
    /// element, and return the observation text.
    async fn act(
        &self,
        instruction: &str,
        target: Option<ElementHandle>,
    ) -> Result<String, CapabilityError>;

    /// Inject literal keystrokes into the focused element.
    ///
    /// This bypasses instruction interpretation entirely — the only channel
    /// through which credentials reach the page.
    async fn type_literal(&self, text: &SecretString) -> Result<(), CapabilityError>;

    /// Enumerate candidate mail-piece images, in page order.
    async fn list_images(&self) -> Result<Vec<ImageElement>, CapabilityError>;

    /// Capture a PNG of a single element.
    async fn capture_element(&self, target: ElementHandle) -> Result<Vec<u8>, CapabilityError>;

    /// Capture a PNG of the full page.
    async fn capture_page(&self) -> Result<Vec<u8>, CapabilityError>;

    /// Tear the session down. Idempotent.
    async fn stop(&self) -> Result<(), CapabilityError>;
}

/// Default per-call timeout for the HTTP bridge.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Deserialize)]
struct ActResponse {
    observation: String,
}

#[derive(Deserialize)]
struct ImagesResponse {
    images: Vec<ImageRecord>,
}

#[derive(Deserialize)]
struct ImageRecord {
    handle: usize,
    #[serde(default)]
    src: String,
    #[serde(default)]
    alt: String,
}

/// HTTP bridge to an automation sidecar (headless browser driver).
///
/// Wire surface: `POST /start`, `POST /act {instruction, target?}`,
/// `POST /type {text}`, `GET /images`, `GET /screenshot[?element=n]`,
/// `POST /stop`.
pub struct HttpCapability {
    base_url: String,
    portal_url: String,
    client: reqwest::Client,
    call_timeout: Duration,
}

impl HttpCapability {
    pub fn new(base_url: impl Into<String>, portal_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            portal_url: portal_url.into(),
            client: reqwest::Client::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn map_transport(&self, e: reqwest::Error) -> CapabilityError {
        if e.is_timeout() {
            CapabilityError::Timeout {
                timeout: self.call_timeout,
            }
        } else {
            CapabilityError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl AutomationCapability for HttpCapability {
    async fn start(&self) -> Result<(), CapabilityError> {
        let response = self
            .client
            .post(self.endpoint("start"))
            .timeout(self.call_timeout)
            .json(&serde_json::json!({ "starting_page": self.portal_url }))
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        if !response.status().is_success() {
            return Err(CapabilityError::Transport(format!(
                "start returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn act(
        &self,
        instruction: &str,
        target: Option<ElementHandle>,
    ) -> Result<String, CapabilityError> {
        let body = serde_json::json!({
            "instruction": instruction,
            "target": target.map(|t| t.index()),
        });
        let response = self
            .client
            .post(self.endpoint("act"))
            .timeout(self.call_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            return Err(CapabilityError::Act {
                reason: format!("driver returned {}", response.status()),
            });
        }

        let parsed: ActResponse = response.json().await.map_err(|e| CapabilityError::Act {
            reason: format!("malformed observation: {e}"),
        })?;
        Ok(parsed.observation)
    }

    async fn type_literal(&self, text: &SecretString) -> Result<(), CapabilityError> {
        let body = serde_json::json!({ "text": text.expose_secret() });
        let response = self
            .client
            .post(self.endpoint("type"))
            .timeout(self.call_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        if !response.status().is_success() {
            return Err(CapabilityError::Input {
                reason: format!("driver returned {}", response.status()),
            });
        }
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageElement>, CapabilityError> {
        let response = self
            .client
            .get(self.endpoint("images"))
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        if !response.status().is_success() {
            return Err(CapabilityError::Transport(format!(
                "images returned {}",
                response.status()
            )));
        }
        let parsed: ImagesResponse =
            response
                .json()
                .await
                .map_err(|e| CapabilityError::Transport(format!("malformed image list: {e}")))?;
        Ok(parsed
            .images
            .into_iter()
            .map(|r| ImageElement {
                handle: ElementHandle::new(r.handle),
                src: r.src,
                alt: r.alt,
            })
            .collect())
    }

    async fn capture_element(&self, target: ElementHandle) -> Result<Vec<u8>, CapabilityError> {
        let url = format!("{}?element={}", self.endpoint("screenshot"), target.index());
        let response = self
            .client
            .get(url)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        if !response.status().is_success() {
            return Err(CapabilityError::Transport(format!(
                "screenshot returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn capture_page(&self) -> Result<Vec<u8>, CapabilityError> {
        let response = self
            .client
            .get(self.endpoint("screenshot"))
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        if !response.status().is_success() {
            return Err(CapabilityError::Transport(format!(
                "screenshot returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn stop(&self) -> Result<(), CapabilityError> {
        let response = self
            .client
            .post(self.endpoint("stop"))
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;
        if !response.status().is_success() {
            return Err(CapabilityError::Transport(format!(
                "stop returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
