//! Content classification — is a candidate image a genuine mail piece?
//!
//! Two stages, cheap-first:
//! 1. Heuristic pre-filter: UI-chrome keywords in the source locator or alt
//!    text reject immediately, skipping the semantic check.
//! 2. Semantic check: one capability instruction scoped to the element,
//!    answered with a fixed positive/negative token.
//!
//! Ambiguity fails closed: a capability error or unparseable observation is
//! a rejection (`ClassifierError`), never an acceptance. Precision over
//! recall.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::capability::AutomationCapability;
use crate::enumerate::Candidate;

/// Keywords marking obvious non-mail UI chrome (case-insensitive substring
/// over src and alt).
pub const UI_CHROME_KEYWORDS: &[&str] = &["logo", "banner", "icon", "button", "nav"];

const ANALYZE_INSTRUCTION: &str = "Examine this mail image carefully. Look for addressing \
     information such as: recipient name and address, street address, city, state, zip code, \
     return address information, or any text that looks like mailing labels. \
     Respond with 'HAS_ADDRESS' if you can clearly see addressing information, \
     or 'NO_ADDRESS' if it is blank, just a logo, or contains no addressing text.";

/// Matches the positive token or address-indicative keywords. Word-bounded
/// so the negative token `NO_ADDRESS` cannot match through its `ADDRESS`
/// substring.
static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(HAS_ADDRESS|ADDRESS|RECIPIENT|STREET|ZIP)\b")
        .expect("hard-coded address regex")
});

static NEGATIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bNO_ADDRESS\b").expect("hard-coded negative regex"));

/// Why a candidate was accepted or rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictReason {
    UiElement,
    NoAddress,
    HasAddress,
    ClassifierError,
}

/// Immutable classification outcome for one candidate.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub ordinal: usize,
    pub accepted: bool,
    pub reason: VerdictReason,
    /// Raw observation text from the semantic check; empty when stage 1
    /// short-circuited.
    pub observation: String,
}

/// Two-stage mail-piece classifier.
pub struct Classifier {
    capability: Arc<dyn AutomationCapability>,
}

impl Classifier {
    pub fn new(capability: Arc<dyn AutomationCapability>) -> Self {
        Self { capability }
    }

    /// Classify one candidate. Never errors — every failure mode collapses
    /// to a rejection verdict.
    pub async fn classify(&self, candidate: &Candidate) -> Verdict {
        if let Some(keyword) = ui_chrome_match(&candidate.src, &candidate.alt) {
            debug!(
                ordinal = candidate.ordinal,
                keyword,
                src = %candidate.src,
                "Rejected as UI element"
            );
            return Verdict {
                ordinal: candidate.ordinal,
                accepted: false,
                reason: VerdictReason::UiElement,
                observation: String::new(),
            };
        }

        let observation = match self
            .capability
            .act(ANALYZE_INSTRUCTION, Some(candidate.handle))
            .await
        {
            Ok(obs) if !obs.trim().is_empty() => obs,
            Ok(_) => {
                warn!(ordinal = candidate.ordinal, "Empty observation from semantic check");
                return classifier_error(candidate.ordinal, String::new());
            }
            Err(e) => {
                warn!(ordinal = candidate.ordinal, error = %e, "Semantic check failed");
                return classifier_error(candidate.ordinal, String::new());
            }
        };

        if observation_accepts(&observation) {
            info!(ordinal = candidate.ordinal, "Candidate contains addressing information");
            Verdict {
                ordinal: candidate.ordinal,
                accepted: true,
                reason: VerdictReason::HasAddress,
                observation,
            }
        } else {
            info!(ordinal = candidate.ordinal, "Candidate has no addressing information");
            Verdict {
                ordinal: candidate.ordinal,
                accepted: false,
                reason: VerdictReason::NoAddress,
                observation,
            }
        }
    }
}

fn classifier_error(ordinal: usize, observation: String) -> Verdict {
    Verdict {
        ordinal,
        accepted: false,
        reason: VerdictReason::ClassifierError,
        observation,
    }
}

/// Stage 1: first UI-chrome keyword found in src or alt, if any.
pub fn ui_chrome_match(src: &str, alt: &str) -> Option<&'static str> {
    let src = src.to_lowercase();
    let alt = alt.to_lowercase();
    UI_CHROME_KEYWORDS
        .iter()
        .find(|k| src.contains(*k) || alt.contains(*k))
        .copied()
}

/// Stage 2 parse: explicit negative token rejects; otherwise the positive
/// token or any address-indicative keyword accepts.
pub fn observation_accepts(observation: &str) -> bool {
    if NEGATIVE_RE.is_match(observation) {
        return false;
    }
    ADDRESS_RE.is_match(observation)
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use secrecy::SecretString;

    use crate::capability::{ElementHandle, ImageElement};
    use crate::error::CapabilityError;

    /// Capability that answers every semantic check with a fixed response,
    /// or errors. Panics if `act` is called when `forbid_act` is set, which
    /// proves the stage-1 short-circuit.
    struct SemanticStub {
        response: Result<String, ()>,
        forbid_act: bool,
    }

    impl SemanticStub {
        fn answering(response: &str) -> Self {
            Self {
                response: Ok(response.to_string()),
                forbid_act: false,
            }
        }

        fn erroring() -> Self {
            Self {
                response: Err(()),
                forbid_act: false,
            }
        }

        fn forbidden() -> Self {
            Self {
                response: Ok(String::new()),
                forbid_act: true,
            }
        }
    }

    #[async_trait]
    impl AutomationCapability for SemanticStub {
        async fn start(&self) -> Result<(), CapabilityError> {
            Ok(())
        }
        async fn act(
            &self,
            _instruction: &str,
            _target: Option<ElementHandle>,
        ) -> Result<String, CapabilityError> {
            assert!(!self.forbid_act, "semantic check invoked for UI-chrome candidate");
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(()) => Err(CapabilityError::Act {
                    reason: "driver unavailable".to_string(),
                }),
            }
        }
        async fn type_literal(&self, _text: &SecretString) -> Result<(), CapabilityError> {
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

    fn candidate(ordinal: usize, src: &str, alt: &str) -> Candidate {
        Candidate {
            ordinal,
            src: src.to_string(),
            alt: alt.to_string(),
            handle: ElementHandle::new(ordinal),
        }
    }

    fn classifier(stub: SemanticStub) -> Classifier {
        Classifier::new(Arc::new(stub))
    }

    #[tokio::test]
    async fn ui_keyword_short_circuits_semantic_check() {
        let c = classifier(SemanticStub::forbidden());
        let verdict = c
            .classify(&candidate(0, "/static/site-logo.png", ""))
            .await;
        assert!(!verdict.accepted);
        assert_eq!(verdict.reason, VerdictReason::UiElement);
    }

    #[tokio::test]
    async fn ui_keyword_in_alt_text_rejects() {
        let c = classifier(SemanticStub::forbidden());
        let verdict = c
            .classify(&candidate(0, "/img/x.png", "Navigation Button"))
            .await;
        assert_eq!(verdict.reason, VerdictReason::UiElement);
    }

    #[tokio::test]
    async fn positive_token_accepts() {
        let c = classifier(SemanticStub::answering("HAS_ADDRESS — label clearly visible"));
        let verdict = c.classify(&candidate(2, "/mail/piece.png", "mail")).await;
        assert!(verdict.accepted);
        assert_eq!(verdict.reason, VerdictReason::HasAddress);
        assert_eq!(verdict.ordinal, 2);
    }

    #[tokio::test]
    async fn negative_token_rejects() {
        let c = classifier(SemanticStub::answering("NO_ADDRESS"));
        let verdict = c.classify(&candidate(0, "/mail/piece.png", "mail")).await;
        assert!(!verdict.accepted);
        assert_eq!(verdict.reason, VerdictReason::NoAddress);
    }

    #[tokio::test]
    async fn capability_error_fails_closed() {
        let c = classifier(SemanticStub::erroring());
        let verdict = c.classify(&candidate(0, "/mail/piece.png", "mail")).await;
        assert!(!verdict.accepted);
        assert_eq!(verdict.reason, VerdictReason::ClassifierError);
    }

    #[tokio::test]
    async fn empty_observation_fails_closed() {
        let c = classifier(SemanticStub::answering("   "));
        let verdict = c.classify(&candidate(0, "/mail/piece.png", "mail")).await;
        assert_eq!(verdict.reason, VerdictReason::ClassifierError);
    }

    #[test]
    fn parse_accepts_keywords_case_insensitively() {
        assert!(observation_accepts("has_address"));
        assert!(observation_accepts("I can see the recipient name"));
        assert!(observation_accepts("there is a street and zip visible"));
    }

    #[test]
    fn parse_rejects_negative_and_unrelated_text() {
        assert!(!observation_accepts("no_address"));
        assert!(!observation_accepts("This is a blank card"));
        // The ADDRESS substring inside NO_ADDRESS must not accept.
        assert!(!observation_accepts("NO_ADDRESS — blank side of envelope"));
    }

    #[test]
    fn ui_chrome_match_finds_keywords() {
        assert_eq!(ui_chrome_match("/assets/Logo.svg", ""), Some("logo"));
        assert_eq!(ui_chrome_match("", "hero banner"), Some("banner"));
        assert_eq!(ui_chrome_match("/mail/1.png", "mail piece"), None);
    }
}
