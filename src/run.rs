//! Capture run — end-to-end orchestration of one scheduled invocation.
//!
//! Flow: deadline clock → credentials → session login/navigation →
//! candidate enumeration → per-candidate classify/capture with pipelined
//! uploads → diagnostics → finalized `ExecutionResult`.
//!
//! Two-tier failure policy: anything at or before `MAIL_SECTION_READY`
//! fails the run fast (the schedule is the retry boundary); everything
//! after it is per-candidate or per-artifact and never aborts the run.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::AutomationCapability;
use crate::classify::Classifier;
use crate::config::CaptureConfig;
use crate::credentials::{CredentialProvider, Credentials};
use crate::enumerate::{enumerate_candidates, Candidate};
use crate::report::{redact, Deadline, ErrorRecord, ExecutionResult, Stage};
use crate::session::SessionOrchestrator;
use crate::storage::{
    content_type_for, ArtifactKind, ObjectStore, StoredArtifact, UploadStatus, Uploader,
};

/// One scheduled capture invocation. Fresh state per run; nothing crosses
/// run boundaries.
pub struct CaptureRun {
    config: CaptureConfig,
    credentials: Arc<dyn CredentialProvider>,
    capability: Arc<dyn AutomationCapability>,
    store: Arc<dyn ObjectStore>,
    run_log: Option<PathBuf>,
}

/// Accumulated state handed to finalization.
struct RunOutcome {
    success: bool,
    candidates_seen: usize,
    images_accepted: usize,
    /// Mail-image artifacts, already ordinal-sorted.
    artifacts: Vec<StoredArtifact>,
    errors: Vec<ErrorRecord>,
    transcript: Option<String>,
    page_screenshot: Option<Vec<u8>>,
}

impl CaptureRun {
    pub fn new(
        config: CaptureConfig,
        credentials: Arc<dyn CredentialProvider>,
        capability: Arc<dyn AutomationCapability>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            credentials,
            capability,
            store,
            run_log: None,
        }
    }

    /// Attach the run-log file that becomes the LOG diagnostic artifact.
    pub fn with_run_log(mut self, path: PathBuf) -> Self {
        self.run_log = Some(path);
        self
    }

    /// Execute the run and produce its result. Infallible by contract:
    /// every failure mode is folded into the result object.
    pub async fn execute(&self) -> ExecutionResult {
        let deadline = Deadline::new(self.config.time_budget);
        let run_id = Uuid::new_v4();
        let run_date = Utc::now().date_naive();
        let partition = run_date.format("%Y-%m-%d").to_string();
        let uploader = Arc::new(
            Uploader::new(Arc::clone(&self.store))
                .with_backoff_base(self.config.upload_backoff)
                .with_retention_days(self.config.storage_retention_days),
        );
        let mut errors: Vec<ErrorRecord> = Vec::new();

        info!(%run_id, date = %partition, budget = ?self.config.time_budget, "Capture run started");

        let credentials = match self
            .credentials
            .get_credentials(&self.config.secret_id)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Credentials unavailable; aborting before session start");
                errors.push(ErrorRecord::new(Stage::Auth, e.to_string(), false));
                let outcome = RunOutcome {
                    success: false,
                    candidates_seen: 0,
                    images_accepted: 0,
                    artifacts: vec![],
                    errors,
                    transcript: None,
                    page_screenshot: None,
                };
                return self.finalize(run_id, run_date, &partition, &deadline, &uploader, outcome).await;
            }
        };

        let mut session = SessionOrchestrator::new(Arc::clone(&self.capability));
        if let Err(e) = self.establish(&mut session, &credentials).await {
            error!(error = %e, "Run failed before mail section was ready");
            errors.push(ErrorRecord::redacted(
                Stage::Auth,
                e.to_string(),
                e.is_recoverable(),
                &credentials,
            ));
            session.end().await;
            let outcome = RunOutcome {
                success: false,
                candidates_seen: 0,
                images_accepted: 0,
                artifacts: vec![],
                errors,
                transcript: transcript_of(&session, &credentials),
                page_screenshot: None,
            };
            return self.finalize(run_id, run_date, &partition, &deadline, &uploader, outcome).await;
        }

        let candidates = match enumerate_candidates(self.capability.as_ref()).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Enumeration failed; continuing with no candidates");
                errors.push(ErrorRecord::redacted(
                    Stage::Enumeration,
                    e.to_string(),
                    true,
                    &credentials,
                ));
                Vec::new()
            }
        };
        let candidates_seen = candidates.len();

        let (images_accepted, artifacts) = self
            .process_candidates(&uploader, &deadline, &partition, candidates, &credentials, &mut errors)
            .await;

        // Nothing stored: keep a full-page view of the mail section as a
        // diagnostic, while the page is still alive.
        let stored = artifacts
            .iter()
            .filter(|a| a.status == UploadStatus::Stored)
            .count();
        let page_screenshot = if stored == 0 {
            match self.capability.capture_page().await {
                Ok(bytes) if !bytes.is_empty() => Some(bytes),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "Fallback page screenshot failed");
                    None
                }
            }
        } else {
            None
        };

        session.end().await;

        let outcome = RunOutcome {
            success: true,
            candidates_seen,
            images_accepted,
            artifacts,
            errors,
            transcript: transcript_of(&session, &credentials),
            page_screenshot,
        };
        self.finalize(run_id, run_date, &partition, &deadline, &uploader, outcome).await
    }

    /// Drive the session to `MAIL_SECTION_READY`.
    async fn establish(
        &self,
        session: &mut SessionOrchestrator,
        credentials: &Credentials,
    ) -> Result<(), crate::error::SessionError> {
        session.connect().await?;
        session
            .authenticate(&credentials.username, &credentials.password)
            .await?;
        session.open_mail_section().await
    }

    /// Classify candidates in order, uploading accepted captures as they
    /// come. Classification of candidate i+1 overlaps the upload of
    /// candidate i; the artifact sequence is re-sorted by ordinal so the
    /// result stays deterministic.
    async fn process_candidates(
        &self,
        uploader: &Arc<Uploader>,
        deadline: &Deadline,
        partition: &str,
        candidates: Vec<Candidate>,
        credentials: &Credentials,
        errors: &mut Vec<ErrorRecord>,
    ) -> (usize, Vec<StoredArtifact>) {
        let classifier = Classifier::new(Arc::clone(&self.capability));
        let semaphore = Arc::new(Semaphore::new(self.config.upload_workers));
        let mut uploads: JoinSet<(usize, StoredArtifact)> = JoinSet::new();
        let mut images_accepted = 0usize;

        for candidate in candidates {
            if deadline.expired() {
                warn!(
                    ordinal = candidate.ordinal,
                    elapsed = ?deadline.elapsed(),
                    "Time budget exhausted; stopping candidate processing"
                );
                errors.push(ErrorRecord::new(
                    Stage::Deadline,
                    format!("time budget exhausted before candidate {}", candidate.ordinal),
                    true,
                ));
                break;
            }

            let verdict = classifier.classify(&candidate).await;
            debug!(ordinal = candidate.ordinal, reason = ?verdict.reason, "Classified candidate");
            if !verdict.accepted {
                continue;
            }

            let bytes = match self.capability.capture_element(candidate.handle).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(ordinal = candidate.ordinal, error = %e, "Capture failed for accepted candidate");
                    errors.push(ErrorRecord::redacted(
                        Stage::Classification,
                        format!("capture failed for candidate {}: {e}", candidate.ordinal),
                        true,
                        credentials,
                    ));
                    continue;
                }
            };
            images_accepted += 1;

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(p) => p,
                // The semaphore is never closed.
                Err(_) => break,
            };
            let uploader = Arc::clone(uploader);
            let partition = partition.to_string();
            let ordinal = candidate.ordinal;
            let filename = format!(
                "mail_image_{}_{}.png",
                ordinal + 1,
                Utc::now().format("%Y%m%d_%H%M%S")
            );
            let key = format!("{partition}/{filename}");
            uploads.spawn(async move {
                let _permit = permit;
                let artifact = uploader
                    .upload(ArtifactKind::MailImage, &partition, key, bytes, "image/png")
                    .await;
                (ordinal, artifact)
            });
        }

        let mut indexed: Vec<(usize, StoredArtifact)> = Vec::new();
        while let Some(joined) = uploads.join_next().await {
            match joined {
                Ok(pair) => indexed.push(pair),
                Err(e) => {
                    errors.push(ErrorRecord::new(
                        Stage::Upload,
                        format!("upload task failed: {e}"),
                        true,
                    ));
                }
            }
        }
        indexed.sort_by_key(|(ordinal, _)| *ordinal);

        let mut artifacts = Vec::with_capacity(indexed.len());
        for (_, artifact) in indexed {
            if artifact.status == UploadStatus::Failed {
                errors.push(ErrorRecord::new(
                    Stage::Upload,
                    format!(
                        "upload of {} failed after {} attempts",
                        artifact.key, artifact.attempts
                    ),
                    true,
                ));
            }
            artifacts.push(artifact);
        }
        (images_accepted, artifacts)
    }

    /// Append diagnostics and produce the result object.
    async fn finalize(
        &self,
        run_id: Uuid,
        run_date: NaiveDate,
        partition: &str,
        deadline: &Deadline,
        uploader: &Uploader,
        outcome: RunOutcome,
    ) -> ExecutionResult {
        let mut artifacts = outcome.artifacts;

        if self.config.log_upload_enabled {
            let diagnostics = self
                .upload_diagnostics(uploader, partition, outcome.transcript, outcome.page_screenshot)
                .await;
            artifacts.extend(diagnostics);
        } else {
            info!("Diagnostic artifact upload disabled");
        }

        let images_stored = artifacts
            .iter()
            .filter(|a| a.kind == ArtifactKind::MailImage && a.status == UploadStatus::Stored)
            .count();

        let result = ExecutionResult {
            run_id,
            success: outcome.success,
            candidates_seen: outcome.candidates_seen,
            images_accepted: outcome.images_accepted,
            images_stored,
            artifacts,
            errors: outcome.errors,
            elapsed_seconds: deadline.elapsed().as_secs_f64(),
            run_date,
        };
        info!(
            success = result.success,
            seen = result.candidates_seen,
            accepted = result.images_accepted,
            stored = result.images_stored,
            elapsed = result.elapsed_seconds,
            "Capture run finished"
        );
        result
    }

    /// Best-effort diagnostic uploads: transcript (TRACE), run log (LOG),
    /// fallback page screenshot (SCREENSHOT). Failures here never flip the
    /// run's success flag.
    async fn upload_diagnostics(
        &self,
        uploader: &Uploader,
        partition: &str,
        transcript: Option<String>,
        screenshot: Option<Vec<u8>>,
    ) -> Vec<StoredArtifact> {
        let mut artifacts = Vec::new();
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");

        if let Some(json) = transcript {
            let name = format!("act_transcript_{stamp}.json");
            let key = format!("{partition}/logs/{name}");
            artifacts.push(
                uploader
                    .upload(
                        ArtifactKind::Trace,
                        partition,
                        key,
                        json.into_bytes(),
                        content_type_for(&name),
                    )
                    .await,
            );
        }

        if let Some(path) = &self.run_log {
            match tokio::fs::read(path).await {
                Ok(bytes) if !bytes.is_empty() => {
                    let name = format!("run_{stamp}.log");
                    let key = format!("{partition}/logs/{name}");
                    artifacts.push(
                        uploader
                            .upload(ArtifactKind::Log, partition, key, bytes, content_type_for(&name))
                            .await,
                    );
                }
                Ok(_) => debug!("Run log is empty; skipping upload"),
                Err(e) => warn!(error = %e, path = %path.display(), "Could not read run log"),
            }
        }

        if let Some(bytes) = screenshot {
            let name = format!("mail_preview_full_{stamp}.png");
            let key = format!("{partition}/logs/{name}");
            artifacts.push(
                uploader
                    .upload(ArtifactKind::Screenshot, partition, key, bytes, "image/png")
                    .await,
            );
        }

        artifacts
    }
}

/// Transcript for the TRACE artifact, credential-scrubbed. Observations
/// should never contain secrets, but a misbehaving driver echoing typed
/// input must not leak through the artifact either.
fn transcript_of(session: &SessionOrchestrator, credentials: &Credentials) -> Option<String> {
    if session.transcript().is_empty() {
        None
    } else {
        Some(redact(&session.transcript_json(), credentials))
    }
}
