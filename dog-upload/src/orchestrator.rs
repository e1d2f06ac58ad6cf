//! Two-phase multipart upload: initiate, transfer every part, then finalize.
//!
//! Parts run as independent tasks admitted through a counting gate, so a
//! slow part never holds back the next one once a slot frees up. Every task is
//! joined before the orchestrator decides anything. The finalize call only
//! happens when all parts succeeded, and it always lists them in ascending
//! part order.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::planner::{compute_plan_with_limits, derive_part_tasks};
use crate::retry::{with_backoff_if, RetryPolicy};
use crate::source::{open_source, PartSource};
use crate::{
    CompletedPart, Destination, PartResult, PartTask, TransferClient, UploadConfig, UploadError,
    UploadId, UploadLogger, UploadReceipt, UploadResult, UploadSession, UploadState,
};

/// Upload `path` to `destination` through `client`
pub async fn upload(
    client: Arc<dyn TransferClient>,
    path: impl AsRef<Path>,
    destination: &Destination,
    config: &UploadConfig,
) -> UploadResult<UploadReceipt> {
    UploadOrchestrator::from_arc(client)
        .upload(path, destination, config)
        .await
}

/// Drives multipart uploads against one backend
#[derive(Clone)]
pub struct UploadOrchestrator {
    client: Arc<dyn TransferClient>,
}

/// Everything a part task needs, shared by all of them
struct PartContext {
    client: Arc<dyn TransferClient>,
    source: Arc<dyn PartSource>,
    gate: Arc<Semaphore>,
    upload_id: UploadId,
    destination: Destination,
    logger: Arc<dyn UploadLogger>,
}

impl UploadOrchestrator {
    pub fn new<C: TransferClient + 'static>(client: C) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn from_arc(client: Arc<dyn TransferClient>) -> Self {
        Self { client }
    }

    /// Upload a local file as a multipart object
    pub async fn upload(
        &self,
        path: impl AsRef<Path>,
        destination: &Destination,
        config: &UploadConfig,
    ) -> UploadResult<UploadReceipt> {
        let path = path.as_ref();
        let source = open_source(path, config.read_mode).await?;
        config.logger.debug(
            "opened upload source",
            &[("file", &path.display()), ("size", &source.size())],
        );
        self.upload_source(source, destination, config).await
    }

    /// Re-run the whole upload, each time in a fresh session, while it fails retryably
    pub async fn upload_with_retry(
        &self,
        path: impl AsRef<Path>,
        destination: &Destination,
        config: &UploadConfig,
        policy: RetryPolicy,
    ) -> UploadResult<UploadReceipt> {
        let path = path.as_ref();
        let orchestrator = self;
        with_backoff_if(
            policy.max_attempts,
            policy.initial_backoff,
            move || orchestrator.upload(path, destination, config),
            UploadError::is_retryable,
        )
        .await
    }

    /// Upload from an already opened source
    pub async fn upload_source(
        &self,
        source: Arc<dyn PartSource>,
        destination: &Destination,
        config: &UploadConfig,
    ) -> UploadResult<UploadReceipt> {
        let logger = config.logger.clone();
        let started = Instant::now();

        let plan = compute_plan_with_limits(source.size(), config.part_size, &config.limits)?;
        logger.debug(
            "will upload file in parts",
            &[
                ("destination", destination),
                ("size", &plan.total_size),
                ("part_size", &plan.part_size),
                ("parts", &plan.part_count),
            ],
        );

        let deadline = deadline_after(started, config.timeout);
        let mut session = UploadSession::new(destination.clone(), plan, deadline);

        match self.run(&mut session, source, config).await {
            Ok((upload_id, parts)) => {
                let receipt = UploadReceipt::new(
                    upload_id,
                    session.destination.clone(),
                    &session.plan,
                    parts,
                    started.elapsed(),
                );
                logger.info(
                    "multipart upload completed",
                    &[
                        ("destination", &receipt.destination),
                        ("upload_id", &receipt.upload_id),
                        ("bytes", &receipt.total_bytes),
                        ("elapsed_ms", &receipt.elapsed.as_millis()),
                    ],
                );
                Ok(receipt)
            }
            Err(err) => {
                mark_failed(&mut session, &err, logger.as_ref());
                if matches!(err, UploadError::Timeout { .. }) {
                    logger.error(
                        "multipart upload deadline exceeded",
                        &[("destination", destination), ("timeout", &format!("{:?}", config.timeout))],
                    );
                }
                if let Some(upload_id) = session.upload_id.clone() {
                    if config.abort_on_failure {
                        self.abort_quietly(&upload_id, destination, config).await;
                    }
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        session: &mut UploadSession,
        source: Arc<dyn PartSource>,
        config: &UploadConfig,
    ) -> UploadResult<(UploadId, Vec<CompletedPart>)> {
        let deadline = session.deadline;
        let timeout = config.timeout;
        let logger = config.logger.clone();
        let destination = session.destination.clone();

        let upload_id = before_deadline(deadline, timeout, self.client.initiate(&destination)).await?;
        if upload_id.is_empty() {
            return Err(UploadError::protocol(
                "no upload ID returned when starting the upload; check the client and credentials",
            ));
        }
        session.upload_id = Some(upload_id.clone());
        session.transition(UploadState::Initiated)?;
        logger.info(
            "multipart upload initiated",
            &[("destination", &destination), ("upload_id", &upload_id)],
        );

        let context = Arc::new(PartContext {
            client: self.client.clone(),
            source,
            gate: Arc::new(Semaphore::new(config.effective_concurrency())),
            upload_id: upload_id.clone(),
            destination: destination.clone(),
            logger: logger.clone(),
        });

        session.transition(UploadState::PartsInFlight)?;
        let mut tasks = JoinSet::new();
        for task in derive_part_tasks(&session.plan) {
            let context = context.clone();
            tasks.spawn(async move {
                PartResult {
                    part_number: task.part_number,
                    result: transfer_part(&context, task).await,
                }
            });
        }

        let collected = before_deadline(
            deadline,
            timeout,
            collect_parts(&mut tasks, session, logger.as_ref()),
        )
        .await;
        if collected.is_err() {
            tasks.abort_all();
        }
        let parts = collected?;
        session.transition(UploadState::AllPartsOk)?;

        // The object only becomes visible once this succeeds.
        before_deadline(
            deadline,
            timeout,
            self.client.complete(&upload_id, &destination, parts.clone()),
        )
        .await?;
        session.transition(UploadState::Completed)?;

        Ok((upload_id, parts))
    }

    async fn abort_quietly(&self, upload_id: &UploadId, destination: &Destination, config: &UploadConfig) {
        let logger = &config.logger;
        match tokio::time::timeout(config.abort_timeout, self.client.abort(upload_id, destination)).await {
            Ok(Ok(())) => logger.info(
                "aborted multipart upload",
                &[("destination", destination), ("upload_id", upload_id)],
            ),
            Ok(Err(err)) => logger.warn(
                "failed to abort multipart upload",
                &[("destination", destination), ("upload_id", upload_id), ("error", &err)],
            ),
            Err(_) => logger.warn(
                "timed out aborting multipart upload",
                &[("destination", destination), ("upload_id", upload_id)],
            ),
        }
    }
}

/// Read one part and hand it to the backend, once admitted by the gate
async fn transfer_part(context: &PartContext, task: PartTask) -> UploadResult<String> {
    let _permit = context
        .gate
        .acquire()
        .await
        .map_err(|_| UploadError::internal("part admission gate closed"))?;

    context.logger.debug(
        "uploading file part",
        &[("part", &task.part_number), ("offset", &task.offset), ("size", &task.length)],
    );

    let body = context.source.read_at(task.offset, task.length).await?;
    let etag = context
        .client
        .upload_part(&context.upload_id, &context.destination, task.part_number, body)
        .await?;

    context.logger.debug(
        "finished uploading file part",
        &[("part", &task.part_number), ("size", &task.length)],
    );
    Ok(etag)
}

/// Wait for every part task, then report the first failure seen or the ordered confirmations
async fn collect_parts(
    tasks: &mut JoinSet<PartResult>,
    session: &mut UploadSession,
    logger: &dyn UploadLogger,
) -> UploadResult<Vec<CompletedPart>> {
    let mut first_failed_part = None;
    let mut task_failure = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(part) => {
                if let Err(err) = &part.result {
                    logger.warn(
                        "part upload failed",
                        &[("part", &part.part_number), ("error", err)],
                    );
                    if first_failed_part.is_none() && task_failure.is_none() {
                        first_failed_part = Some(part.part_number);
                    }
                }
                session.record(part)?;
            }
            Err(join_err) => {
                logger.warn("part task did not finish", &[("error", &join_err)]);
                if first_failed_part.is_none() && task_failure.is_none() {
                    task_failure = Some(UploadError::internal(format!("part task failed: {}", join_err)));
                }
            }
        }
    }

    if let Some(err) = task_failure {
        return Err(err);
    }
    if let Some(part_number) = first_failed_part {
        return Err(session.take_failure(part_number).unwrap_or_else(|| {
            UploadError::internal(format!("part {} failed without an error", part_number))
        }));
    }

    session
        .ordered_confirmations()
        .ok_or_else(|| UploadError::internal("part results missing after all tasks finished"))
}

async fn before_deadline<T, F>(deadline: Instant, timeout: Duration, operation: F) -> UploadResult<T>
where
    F: Future<Output = UploadResult<T>>,
{
    tokio::time::timeout_at(deadline, operation)
        .await
        .map_err(|_| UploadError::Timeout { timeout })?
}

/// Roughly 30 years; stands in for timeouts too large to add to an instant
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Absolute deadline `timeout` after `started`, clamped instead of overflowing
fn deadline_after(started: Instant, timeout: Duration) -> Instant {
    started
        .checked_add(timeout)
        .or_else(|| started.checked_add(FAR_FUTURE))
        .unwrap_or(started)
}

/// Walk the session into `Failed` through whichever intermediate state `err` implies
fn mark_failed(session: &mut UploadSession, err: &UploadError, logger: &dyn UploadLogger) {
    let via = match (err, session.state()) {
        (UploadError::Timeout { .. }, _) => Some(UploadState::DeadlineExceeded),
        (_, UploadState::PartsInFlight) => Some(UploadState::AnyPartFailed),
        _ => None,
    };
    for next in via.into_iter().chain(Some(UploadState::Failed)) {
        if let Err(illegal) = session.transition(next) {
            logger.warn("upload session left in unexpected state", &[("error", &illegal)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{compute_plan, LogFields, LogLevel};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Captured {
        warnings: Mutex<Vec<String>>,
    }

    impl UploadLogger for Captured {
        fn log(&self, level: LogLevel, message: &str, _fields: LogFields<'_>) {
            if level == LogLevel::Warn {
                self.warnings.lock().push(message.to_string());
            }
        }
    }

    fn session_in(states: &[UploadState]) -> UploadSession {
        let plan = compute_plan(1, 5_242_880).unwrap();
        let mut session = UploadSession::new(Destination::new("bucket", "key"), plan, Instant::now());
        for state in states {
            session.transition(*state).unwrap();
        }
        session
    }

    #[tokio::test]
    async fn oversized_timeouts_clamp_to_far_future() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert!(deadline_after(now, Duration::MAX) >= now + FAR_FUTURE);
        assert!(deadline_after(now, Duration::from_secs(u64::MAX)) > now);
    }

    #[tokio::test]
    async fn part_failure_walks_through_any_part_failed() {
        let logger = Captured::default();
        let mut session = session_in(&[UploadState::Initiated, UploadState::PartsInFlight]);

        mark_failed(&mut session, &UploadError::backend_message("upload_part", "boom"), &logger);

        assert_eq!(session.state(), UploadState::Failed);
        assert!(logger.warnings.lock().is_empty());
    }

    #[tokio::test]
    async fn timeout_walks_through_deadline_exceeded() {
        let logger = Captured::default();
        let mut session = session_in(&[UploadState::Initiated]);

        mark_failed(&mut session, &UploadError::Timeout { timeout: Duration::from_secs(1) }, &logger);

        assert_eq!(session.state(), UploadState::Failed);
        assert!(logger.warnings.lock().is_empty());
    }

    #[tokio::test]
    async fn illegal_transitions_are_reported() {
        let logger = Captured::default();
        let mut session = session_in(&[
            UploadState::Initiated,
            UploadState::PartsInFlight,
            UploadState::AllPartsOk,
            UploadState::Completed,
        ]);

        mark_failed(&mut session, &UploadError::internal("late failure"), &logger);

        assert_eq!(session.state(), UploadState::Completed);
        assert_eq!(
            logger.warnings.lock().as_slice(),
            ["upload session left in unexpected state".to_string()]
        );
    }
}
