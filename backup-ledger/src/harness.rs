//! Concurrent execution harness.
//!
//! Drives one container backup: lists sub-containers, processes them
//! under a bounded worker pool, isolates per-unit and per-sub-container
//! failures, and aggregates outcomes into the session tracker. Retrying
//! transient remote failures is the provider's concern; the harness
//! only prevents one failure from aborting the whole session.

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::models::Fingerprint;
use crate::remote::{AccessToken, ContainerRef, CredentialProvider, RemoteProvider};
use crate::session::{BackupKind, SessionCounters, SessionStatus, SessionTotals, SessionTracker};
use crate::store::LedgerStore;
use crate::strategy::{ChangeDecision, ChangeDetection};
use futures_util::future::join_all;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Refresh the bearer token proactively when it expires this soon.
const TOKEN_REFRESH_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub max_workers: usize,
    pub backup_kind: BackupKind,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            backup_kind: BackupKind::Incremental,
        }
    }
}

impl HarnessConfig {
    /// Harness settings for one run under a given ledger configuration.
    pub fn from_ledger(config: &LedgerConfig, backup_kind: BackupKind) -> Self {
        Self {
            max_workers: config.max_workers,
            backup_kind,
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub session_id: i64,
    pub status: SessionStatus,
    pub totals: SessionTotals,
    pub sub_containers: usize,
    pub sub_containers_failed: usize,
    pub error_detail: Option<String>,
}

pub struct BackupHarness {
    store: LedgerStore,
    tracker: SessionTracker,
    provider: Arc<dyn RemoteProvider>,
    credentials: Arc<dyn CredentialProvider>,
    strategy: Arc<dyn ChangeDetection>,
    cancel: CancellationToken,
    config: HarnessConfig,
}

impl BackupHarness {
    pub fn new(
        store: LedgerStore,
        tracker: SessionTracker,
        provider: Arc<dyn RemoteProvider>,
        credentials: Arc<dyn CredentialProvider>,
        strategy: Arc<dyn ChangeDetection>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            provider,
            credentials,
            strategy,
            cancel: CancellationToken::new(),
            config,
        }
    }

    /// Token used to stop issuing new per-unit work. In-flight upserts
    /// complete or are never attempted; the ledger is never left with a
    /// partially fetched unit.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one container backup end to end, returning after the session
    /// row has been finished.
    pub async fn run(&self, container_id: &str) -> Result<RunReport> {
        let session_id = {
            let tracker = self.tracker.clone();
            let kind = self.config.backup_kind;
            let cid = container_id.to_string();
            tokio::task::spawn_blocking(move || tracker.start(kind, Some(&cid)))
                .await
                .map_err(join_error)??
        };

        let subs = match self.provider.list_sub_containers(container_id).await {
            Ok(subs) => subs,
            Err(e) => {
                // Total inability to reach the provider fails the session.
                let detail = e.to_string();
                self.finish_session(session_id, &SessionTotals::default(), SessionStatus::Failed, Some(detail.clone()))
                    .await?;
                return Ok(RunReport {
                    session_id,
                    status: SessionStatus::Failed,
                    totals: SessionTotals::default(),
                    sub_containers: 0,
                    sub_containers_failed: 0,
                    error_detail: Some(detail),
                });
            }
        };

        tracing::info!(
            container_id,
            sub_containers = subs.len(),
            strategy = self.strategy.name(),
            workers = self.config.max_workers,
            "Starting container backup"
        );

        let counters = Arc::new(SessionCounters::default());
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let failed_subs = Arc::new(AtomicUsize::new(0));
        let sub_count = subs.len();

        let mut handles = Vec::with_capacity(sub_count);
        for sub in subs {
            let store = self.store.clone();
            let provider = Arc::clone(&self.provider);
            let credentials = Arc::clone(&self.credentials);
            let strategy = Arc::clone(&self.strategy);
            let counters = Arc::clone(&counters);
            let failed_subs = Arc::clone(&failed_subs);
            let sem = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                if cancel.is_cancelled() {
                    return;
                }
                let permit = tokio::select! {
                    permit = sem.acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => return,
                    },
                    _ = cancel.cancelled() => return,
                };

                let outcome = process_sub_container(
                    &store,
                    &provider,
                    &credentials,
                    &strategy,
                    &counters,
                    &cancel,
                    &sub,
                )
                .await;
                drop(permit);

                match outcome {
                    Ok(()) => {}
                    Err(LedgerError::Cancelled) => {
                        tracing::info!(sub_container = %sub.name, "Sub-container cancelled");
                    }
                    Err(e) => {
                        // One sub-container's failure never aborts the rest.
                        tracing::warn!(sub_container = %sub.name, error = %e, "Sub-container failed");
                        failed_subs.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Sub-container task panicked");
                failed_subs.fetch_add(1, Ordering::Relaxed);
            }
        }

        // All workers have quiesced; this is the single synchronization
        // point for the session.
        let totals = counters.snapshot();
        let status = if self.cancel.is_cancelled() {
            SessionStatus::Partial
        } else {
            // A run with per-unit failures still completed; only not
            // running at all is reported as failed.
            SessionStatus::Completed
        };
        self.finish_session(session_id, &totals, status, None).await?;

        Ok(RunReport {
            session_id,
            status,
            totals,
            sub_containers: sub_count,
            sub_containers_failed: failed_subs.load(Ordering::Relaxed),
            error_detail: None,
        })
    }

    async fn finish_session(
        &self,
        session_id: i64,
        totals: &SessionTotals,
        status: SessionStatus,
        error_detail: Option<String>,
    ) -> Result<()> {
        let tracker = self.tracker.clone();
        let totals = *totals;
        tokio::task::spawn_blocking(move || {
            tracker.finish(session_id, &totals, status, error_detail.as_deref())
        })
        .await
        .map_err(join_error)?
    }
}

async fn process_sub_container(
    store: &LedgerStore,
    provider: &Arc<dyn RemoteProvider>,
    credentials: &Arc<dyn CredentialProvider>,
    strategy: &Arc<dyn ChangeDetection>,
    counters: &Arc<SessionCounters>,
    cancel: &CancellationToken,
    sub: &ContainerRef,
) -> Result<()> {
    // Each worker owns its own token handle.
    let mut token = credentials.token().await?;

    let units = list_units_with_retry(provider, credentials, &mut token, sub).await?;
    tracing::info!(sub_container = %sub.name, units = units.len(), "Listed sub-container");

    for fp in units {
        if cancel.is_cancelled() {
            return Err(LedgerError::Cancelled);
        }
        match process_unit(
            store,
            provider,
            credentials,
            strategy,
            counters,
            cancel,
            sub,
            &mut token,
            fp,
        )
        .await
        {
            Ok(_) => {}
            Err(LedgerError::Cancelled) => return Err(LedgerError::Cancelled),
            Err(e) => {
                // Per-unit failures are isolated and counted, never
                // recorded as placeholder rows.
                counters.record_failed();
                tracing::warn!(sub_container = %sub.name, error = %e, "Unit failed");
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn process_unit(
    store: &LedgerStore,
    provider: &Arc<dyn RemoteProvider>,
    credentials: &Arc<dyn CredentialProvider>,
    strategy: &Arc<dyn ChangeDetection>,
    counters: &Arc<SessionCounters>,
    cancel: &CancellationToken,
    sub: &ContainerRef,
    token: &mut AccessToken,
    fp: Fingerprint,
) -> Result<ChangeDecision> {
    let counters_bytes = fp.byte_size;
    let existing = {
        let store = store.clone();
        let container_id = fp.container_id.clone();
        let unit_path = fp.unit_path.clone();
        tokio::task::spawn_blocking(move || store.get_record(&container_id, &unit_path))
            .await
            .map_err(join_error)??
    };

    let mut candidate = fp;
    let mut content: Option<Vec<u8>> = None;

    // The checksum strategy cannot decide without the content hash.
    if strategy.requires_content() {
        let bytes =
            fetch_with_retry(provider, credentials, token, sub, &candidate.unit_path).await?;
        candidate.checksum = Some(sha256_hex(&bytes));
        content = Some(bytes);
    }

    let decision = strategy.decide(existing.as_ref(), &candidate);
    match decision {
        ChangeDecision::Unchanged => {
            counters.record_skipped(counters_bytes);
        }
        ChangeDecision::New | ChangeDecision::Changed => {
            let bytes = match content {
                Some(bytes) => bytes,
                None => {
                    fetch_with_retry(provider, credentials, token, sub, &candidate.unit_path)
                        .await?
                }
            };
            if candidate.checksum.is_none() {
                candidate.checksum = Some(sha256_hex(&bytes));
            }
            // A cancelled unit is never recorded, even when its content
            // has already been fetched.
            if cancel.is_cancelled() {
                return Err(LedgerError::Cancelled);
            }
            let transferred = bytes.len() as i64;
            {
                let store = store.clone();
                let candidate = candidate.clone();
                tokio::task::spawn_blocking(move || store.upsert(&candidate))
                    .await
                    .map_err(join_error)??;
            }
            counters.record_fetched(transferred);
        }
    }
    Ok(decision)
}

async fn list_units_with_retry(
    provider: &Arc<dyn RemoteProvider>,
    credentials: &Arc<dyn CredentialProvider>,
    token: &mut AccessToken,
    sub: &ContainerRef,
) -> Result<Vec<Fingerprint>> {
    refresh_if_near_expiry(credentials, token).await?;
    match provider.list_units(sub, token).await {
        Err(LedgerError::AuthExpired(_)) => {
            *token = credentials.refresh().await?;
            provider.list_units(sub, token).await
        }
        other => other,
    }
}

async fn fetch_with_retry(
    provider: &Arc<dyn RemoteProvider>,
    credentials: &Arc<dyn CredentialProvider>,
    token: &mut AccessToken,
    sub: &ContainerRef,
    unit_path: &str,
) -> Result<Vec<u8>> {
    refresh_if_near_expiry(credentials, token).await?;
    match provider.fetch_content(sub, unit_path, token).await {
        Err(LedgerError::AuthExpired(_)) => {
            *token = credentials.refresh().await?;
            provider.fetch_content(sub, unit_path, token).await
        }
        other => other,
    }
}

async fn refresh_if_near_expiry(
    credentials: &Arc<dyn CredentialProvider>,
    token: &mut AccessToken,
) -> Result<()> {
    if token.expires_within(chrono::Duration::seconds(TOKEN_REFRESH_WINDOW_SECS)) {
        *token = credentials.refresh().await?;
    }
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn join_error(e: tokio::task::JoinError) -> LedgerError {
    LedgerError::Io(std::io::Error::other(e))
}
