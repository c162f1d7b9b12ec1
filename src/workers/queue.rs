use async_channel::{Receiver, Sender, TrySendError};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::TranscodeError;
use super::job::Job;
use super::transcoder::Transcoder;

/// Bounded FIFO of encode jobs drained by a fixed pool of workers.
///
/// `capacity` only counts jobs waiting for a worker. Admission never waits:
/// a full buffer is reported straight back to the caller.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    workers: usize,
    in_flight: Arc<AtomicUsize>,
    transcoder: Transcoder,
}

impl JobQueue {
    pub fn new(capacity: usize, workers: usize, transcoder: Transcoder) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            workers: workers.max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
            transcoder,
        }
    }

    pub fn enqueue(&self, job: Job) -> Result<(), TranscodeError> {
        let job_id = job.id.clone();
        let owner_id = job.owner_id;

        match self.sender.try_send(job) {
            Ok(()) => {
                debug!(%job_id, %owner_id, buffered = self.buffered(), "job enqueued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(%job_id, %owner_id, in_flight = self.in_flight(), "job queue full, rejecting job");
                Err(TranscodeError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TranscodeError::QueueClosed),
        }
    }

    pub fn start_worker_pool(&self) -> Vec<JoinHandle<()>> {
        info!(workers = self.workers, capacity = self.capacity(), "starting transcode workers");

        (0..self.workers)
            .map(|worker| {
                let receiver = self.receiver.clone();
                let transcoder = self.transcoder.clone();
                let in_flight = self.in_flight.clone();

                tokio::spawn(async move {
                    while let Ok(mut job) = receiver.recv().await {
                        in_flight.fetch_add(1, Ordering::SeqCst);

                        let result = AssertUnwindSafe(transcoder.run(&mut job))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                error!(worker, job_id = %job.id, "transcode worker panicked");
                                Err(TranscodeError::Abandoned)
                            });

                        transcoder.progress().finish(job.owner_id, &job.id);
                        in_flight.fetch_sub(1, Ordering::SeqCst);

                        match &result {
                            Ok(()) => debug!(worker, job_id = %job.id, "job finished"),
                            Err(e) => warn!(worker, job_id = %job.id, owner_id = %job.owner_id, error = %e, "job failed"),
                        }

                        job.complete(result);
                    }
                    debug!(worker, "job queue closed, worker exiting");
                })
            })
            .collect()
    }

    /// Jobs accepted but not yet picked up by a worker.
    pub fn buffered(&self) -> usize {
        self.sender.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.sender.capacity().unwrap_or_default()
    }

    pub fn close(&self) {
        self.sender.close();
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::lifetime::Lifetime;
    use crate::workers::encoder::{EncoderSettings, SOFTWARE_ENCODER};
    use crate::workers::job::{Completion, JobInput};
    use crate::workers::progress::ProgressStore;
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    fn queue(capacity: usize, workers: usize) -> JobQueue {
        let settings = EncoderSettings {
            ffmpeg_path: "sh".into(),
            ffprobe_path: "ffprobe".into(),
            software_encoder: SOFTWARE_ENCODER.into(),
            hw: None,
            threads_per_job: 1,
        };
        let transcoder = Transcoder::new(Arc::new(settings), ProgressStore::new(Duration::from_secs(60)));
        JobQueue::new(capacity, workers, transcoder)
    }

    fn job(script: &str, lifetime: &Lifetime) -> (Job, Completion) {
        Job::new(
            Uuid::new_v4(),
            "/dev/null",
            JobInput::Args {
                args: vec!["-c".into(), script.into()],
                duration: None,
            },
            Box::new(tokio::io::sink()),
            lifetime,
        )
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn full_buffer_rejects_immediately() {
        let q = queue(2, 1);
        let lifetime = Lifetime::new(Duration::from_secs(60));

        q.enqueue(job("exit 0", &lifetime).0).unwrap();
        q.enqueue(job("exit 0", &lifetime).0).unwrap();

        let started = Instant::now();
        let rejected = q.enqueue(job("exit 0", &lifetime).0);

        assert!(matches!(rejected, Err(TranscodeError::QueueFull)));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(q.buffered(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn busy_workers_plus_full_buffer_rejects() {
        let q = queue(2, 2);
        q.start_worker_pool();
        let lifetime = Lifetime::new(Duration::from_secs(60));

        let mut waiting = Vec::new();
        for _ in 0..2 {
            let (j, done) = job("sleep 30", &lifetime);
            q.enqueue(j).unwrap();
            waiting.push(done);
        }
        wait_until(|| q.in_flight() == 2).await;
        assert_eq!(q.in_flight(), 2);

        for _ in 0..2 {
            let (j, done) = job("sleep 30", &lifetime);
            q.enqueue(j).unwrap();
            waiting.push(done);
        }

        let started = Instant::now();
        let rejected = q.enqueue(job("exit 0", &lifetime).0);
        assert!(matches!(rejected, Err(TranscodeError::QueueFull)));
        assert!(started.elapsed() < Duration::from_millis(50));

        lifetime.cancel();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn worker_reports_result_and_clears_progress() {
        let q = queue(4, 1);
        q.start_worker_pool();
        let lifetime = Lifetime::new(Duration::from_secs(10));

        let (j, done) = job("printf 'progress=end\\n' >&2", &lifetime);
        let owner = j.owner_id;
        q.transcoder().progress().begin(owner, &j.id);
        q.enqueue(j).unwrap();

        done.wait(&lifetime).await.unwrap();

        assert!(q.transcoder().progress().get(owner).is_none());
        wait_until(|| q.in_flight() == 0).await;
        assert_eq!(q.in_flight(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn jobs_run_in_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("order");
        let q = queue(8, 1);
        let lifetime = Lifetime::new(Duration::from_secs(10));

        let mut waiting = Vec::new();
        for n in 0..4 {
            let (j, done) = job(&format!("echo {n} >> {}", log.display()), &lifetime);
            q.enqueue(j).unwrap();
            waiting.push(done);
        }
        q.start_worker_pool();

        for done in waiting {
            done.wait(&lifetime).await.unwrap();
        }
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "0\n1\n2\n3\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn submitter_timeout_kills_the_running_job() {
        let q = queue(2, 1);
        q.start_worker_pool();
        let lifetime = Lifetime::new(Duration::from_millis(200));

        let (j, done) = job("sleep 30", &lifetime);
        q.enqueue(j).unwrap();

        let started = Instant::now();
        assert!(matches!(done.wait(&lifetime).await, Err(TranscodeError::Cancelled)));
        wait_until(|| q.in_flight() == 0).await;
        assert_eq!(q.in_flight(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn closed_queue_refuses_jobs() {
        let q = queue(2, 1);
        q.close();
        let lifetime = Lifetime::new(Duration::from_secs(10));

        assert!(matches!(q.enqueue(job("exit 0", &lifetime).0), Err(TranscodeError::QueueClosed)));
    }
}
