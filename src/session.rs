//! Session orchestration — login and navigation state machine.
//!
//! Drives `START → CREDENTIALS_ENTERED → AUTHENTICATED → MAIL_SECTION_READY
//! → (ENDED | FAILED)`. Credentials enter the page only through
//! `type_literal`; instruction text never contains them, so the recorded
//! transcript is credential-free by construction.
//!
//! Failures at or before `MAIL_SECTION_READY` fail the whole run — the
//! schedule is the retry boundary. A wrong or stale credential is never
//! retried within a run to avoid account lockout.

use std::sync::Arc;

use secrecy::SecretString;
use serde::Serialize;
use tracing::{info, warn};

use crate::capability::AutomationCapability;
use crate::error::{CapabilityError, SessionError};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    CredentialsEntered,
    Authenticated,
    MailSectionReady,
    Ended,
    Failed,
}

/// One recorded capability exchange.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub step: &'static str,
    pub instruction: String,
    pub observation: String,
}

const OPEN_SIGN_IN: &str = "I need to access my personal account to check my mail. \
     Click the sign-in button at the top of the main page. \
     If you are already on a sign-in page, just proceed to the login form.";

const FOCUS_USERNAME: &str = "Find the username input field and click on it to focus it.";

const FOCUS_PASSWORD: &str = "Now find the password input field and click on it to focus it.";

const SUBMIT_SIGN_IN: &str = "Click the sign in button to submit the login form.";

const VERIFY_SIGN_IN: &str = "Check if the login was successful. Look for signs of a \
     signed-in session, such as a user menu, account dashboard, or welcome message. \
     If there are any error messages, report them.";

const OPEN_MAIL_SECTION: &str = "Open the mail preview section for my account. \
     If you are already on the mail preview page, just proceed.";

/// Markers expected in the observation after a successful sign-in.
const SIGNED_IN_MARKERS: &[&str] = &["signed in", "dashboard", "welcome", "account menu", "user menu"];

/// Markers expected once the mail preview section is open.
const MAIL_SECTION_MARKERS: &[&str] = &["mail preview", "informed delivery", "today's mail", "mail piece"];

/// Drives the portal session through login and navigation.
pub struct SessionOrchestrator {
    capability: Arc<dyn AutomationCapability>,
    state: SessionState,
    transcript: Vec<TranscriptEntry>,
}

impl SessionOrchestrator {
    pub fn new(capability: Arc<dyn AutomationCapability>) -> Self {
        Self {
            capability,
            state: SessionState::Start,
            transcript: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Enumeration may only proceed from `MailSectionReady`.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::MailSectionReady
    }

    /// Credential-free record of every instruction/observation pair.
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Serialize the transcript for the TRACE diagnostic artifact.
    pub fn transcript_json(&self) -> String {
        serde_json::to_string_pretty(&self.transcript).unwrap_or_else(|_| "[]".to_string())
    }

    /// Open the browser session and reach the sign-in form.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.require_state(SessionState::Start, "connect")?;

        self.capability.start().await.map_err(|e| {
            self.state = SessionState::Failed;
            transport("start", e)
        })?;
        info!("Capability session started");

        self.record_act("open_sign_in", OPEN_SIGN_IN).await?;
        Ok(())
    }

    /// Enter credentials and submit the sign-in form.
    ///
    /// Secrets go through the literal keyboard channel only; the sign-in
    /// verification marker decides `Authenticated` vs `Failed`.
    pub async fn authenticate(
        &mut self,
        username: &SecretString,
        password: &SecretString,
    ) -> Result<(), SessionError> {
        self.require_state(SessionState::Start, "authenticate")?;

        self.record_act("focus_username", FOCUS_USERNAME).await?;
        self.type_secret("username", username).await?;

        self.record_act("focus_password", FOCUS_PASSWORD).await?;
        self.type_secret("password", password).await?;

        self.state = SessionState::CredentialsEntered;

        self.record_act("submit_sign_in", SUBMIT_SIGN_IN).await?;
        let observation = self.record_act("verify_sign_in", VERIFY_SIGN_IN).await?;

        if contains_marker(&observation, SIGNED_IN_MARKERS) {
            self.state = SessionState::Authenticated;
            info!("Authenticated");
            Ok(())
        } else {
            self.state = SessionState::Failed;
            Err(SessionError::Auth {
                reason: "no signed-in marker in post-submit observation".to_string(),
            })
        }
    }

    /// Navigate to the mail preview section.
    pub async fn open_mail_section(&mut self) -> Result<(), SessionError> {
        self.require_state(SessionState::Authenticated, "open_mail_section")?;

        let observation = self.record_act("open_mail_section", OPEN_MAIL_SECTION).await?;

        if contains_marker(&observation, MAIL_SECTION_MARKERS) {
            self.state = SessionState::MailSectionReady;
            info!("Mail section ready");
            Ok(())
        } else {
            self.state = SessionState::Failed;
            Err(SessionError::MailSection {
                reason: "no mail-section marker in observation".to_string(),
            })
        }
    }

    /// Tear the session down. Best-effort; safe to call from any state.
    pub async fn end(&mut self) {
        if let Err(e) = self.capability.stop().await {
            warn!(error = %e, "Error stopping capability session");
        }
        if self.state != SessionState::Failed {
            self.state = SessionState::Ended;
        }
        info!("Session ended");
    }

    async fn record_act(
        &mut self,
        step: &'static str,
        instruction: &str,
    ) -> Result<String, SessionError> {
        let observation = self.capability.act(instruction, None).await.map_err(|e| {
            self.state = SessionState::Failed;
            transport(step, e)
        })?;
        info!(step, observation = %observation, "Session step");
        self.transcript.push(TranscriptEntry {
            step,
            instruction: instruction.to_string(),
            observation: observation.clone(),
        });
        Ok(observation)
    }

    async fn type_secret(
        &mut self,
        step: &'static str,
        secret: &SecretString,
    ) -> Result<(), SessionError> {
        self.capability.type_literal(secret).await.map_err(|e| {
            self.state = SessionState::Failed;
            transport(step, e)
        })?;
        info!(step, "Entered literal input");
        Ok(())
    }

    fn require_state(
        &self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        if self.state != expected {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation,
            });
        }
        Ok(())
    }
}

fn transport(step: &'static str, e: CapabilityError) -> SessionError {
    SessionError::Transport {
        step,
        reason: e.to_string(),
    }
}

fn contains_marker(observation: &str, markers: &[&str]) -> bool {
    let lowered = observation.to_lowercase();
    markers.iter().any(|m| lowered.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::capability::{ElementHandle, ImageElement};

    /// Scripted capability: canned observations keyed by instruction order,
    /// with recorded calls for assertions.
    struct ScriptedCapability {
        observations: Mutex<Vec<String>>,
        acts: Mutex<Vec<String>>,
        typed: Mutex<usize>,
        fail_transport: bool,
    }

    impl ScriptedCapability {
        fn new(observations: Vec<&str>) -> Self {
            Self {
                observations: Mutex::new(
                    observations.into_iter().rev().map(String::from).collect(),
                ),
                acts: Mutex::new(Vec::new()),
                typed: Mutex::new(0),
                fail_transport: false,
            }
        }

        fn failing() -> Self {
            Self {
                observations: Mutex::new(Vec::new()),
                acts: Mutex::new(Vec::new()),
                typed: Mutex::new(0),
                fail_transport: true,
            }
        }
    }

    #[async_trait]
    impl AutomationCapability for ScriptedCapability {
        async fn start(&self) -> Result<(), CapabilityError> {
            Ok(())
        }

        async fn act(
            &self,
            instruction: &str,
            _target: Option<ElementHandle>,
        ) -> Result<String, CapabilityError> {
            if self.fail_transport {
                return Err(CapabilityError::Transport("connection reset".to_string()));
            }
            self.acts.lock().unwrap().push(instruction.to_string());
            Ok(self
                .observations
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| "ok".to_string()))
        }

        async fn type_literal(&self, _text: &SecretString) -> Result<(), CapabilityError> {
            *self.typed.lock().unwrap() += 1;
            Ok(())
        }

        async fn list_images(&self) -> Result<Vec<ImageElement>, CapabilityError> {
            Ok(vec![])
        }

        async fn capture_element(
            &self,
            _target: ElementHandle,
        ) -> Result<Vec<u8>, CapabilityError> {
            Ok(vec![])
        }

        async fn capture_page(&self) -> Result<Vec<u8>, CapabilityError> {
            Ok(vec![])
        }

        async fn stop(&self) -> Result<(), CapabilityError> {
            Ok(())
        }
    }

    async fn login_happy_path(cap: Arc<ScriptedCapability>) -> SessionOrchestrator {
        let mut session = SessionOrchestrator::new(cap);
        session.connect().await.unwrap();
        let user = SecretString::from("alice");
        let pass = SecretString::from("hunter2");
        session.authenticate(&user, &pass).await.unwrap();
        session.open_mail_section().await.unwrap();
        session
    }

    #[tokio::test]
    async fn reaches_mail_section_ready() {
        let cap = Arc::new(ScriptedCapability::new(vec![
            "on the sign-in page",
            "username field focused",
            "password field focused",
            "submitted",
            "You are signed in, welcome to your dashboard",
            "Mail preview for today's mail is shown",
        ]));
        let session = login_happy_path(Arc::clone(&cap)).await;
        assert_eq!(session.state(), SessionState::MailSectionReady);
        assert!(session.is_ready());
        assert_eq!(*cap.typed.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn secrets_never_appear_in_instructions_or_transcript() {
        let cap = Arc::new(ScriptedCapability::new(vec![
            "sign-in page",
            "focused",
            "focused",
            "submitted",
            "welcome back, dashboard loaded",
            "mail preview open",
        ]));
        let session = login_happy_path(Arc::clone(&cap)).await;

        for instruction in cap.acts.lock().unwrap().iter() {
            assert!(!instruction.contains("alice"));
            assert!(!instruction.contains("hunter2"));
        }
        let transcript = session.transcript_json();
        assert!(!transcript.contains("alice"));
        assert!(!transcript.contains("hunter2"));
    }

    #[tokio::test]
    async fn missing_sign_in_marker_fails_auth() {
        let cap = Arc::new(ScriptedCapability::new(vec![
            "sign-in page",
            "focused",
            "focused",
            "submitted",
            "Invalid username or password",
        ]));
        let mut session = SessionOrchestrator::new(cap);
        session.connect().await.unwrap();
        let user = SecretString::from("alice");
        let pass = SecretString::from("wrong");
        let err = session.authenticate(&user, &pass).await.unwrap_err();
        assert!(matches!(err, SessionError::Auth { .. }));
        assert!(!err.is_recoverable());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn transport_failure_is_recoverable() {
        let cap = Arc::new(ScriptedCapability::failing());
        let mut session = SessionOrchestrator::new(cap);
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::Transport { .. }));
        assert!(err.is_recoverable());
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn enumeration_requires_ready_state() {
        let cap = Arc::new(ScriptedCapability::new(vec!["sign-in page"]));
        let mut session = SessionOrchestrator::new(cap);
        session.connect().await.unwrap();
        assert!(!session.is_ready());
        let err = session.open_mail_section().await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { .. }));
    }

    #[test]
    fn marker_match_is_case_insensitive() {
        assert!(contains_marker("Welcome to your DASHBOARD", SIGNED_IN_MARKERS));
        assert!(!contains_marker("please sign in", SIGNED_IN_MARKERS));
    }
}
