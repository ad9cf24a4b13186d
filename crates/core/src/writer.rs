//! File writer for registry dumps and snapshot files.
//!
//! A [`FileJob`] describes a file as a header followed by records pulled one
//! at a time through [`FileJob::next_record`]. [`run_job`] drives a job to
//! completion on the calling thread. A [`FileWriter`] decides where jobs run:
//! [`InlineFileWriter`] runs them immediately, [`BackgroundFileWriter`] hands
//! them to a worker thread through a bounded channel.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, WriterBusySnafu, internal};

/// What a completed job produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSummary {
    /// Records written after the header.
    pub records: usize,
    /// Total bytes written.
    pub bytes: u64,
    /// True if the file existed before the job ran.
    pub overwritten: bool,
}

/// A file to produce.
pub trait FileJob: Send {
    /// Destination path.
    fn path(&self) -> &str;

    /// Bytes written before the first record.
    fn header(&mut self) -> Vec<u8>;

    /// Record `index`, or `None` once there are no more.
    fn next_record(&mut self, index: usize) -> Option<Vec<u8>>;

    /// Called once with the outcome.
    fn complete(&mut self, result: std::io::Result<JobSummary>);
}

/// Runs `job` on the current thread and reports the outcome to it.
pub fn run_job(job: &mut dyn FileJob) {
    let result = write_job(job);
    job.complete(result);
}

fn write_job(job: &mut dyn FileJob) -> std::io::Result<JobSummary> {
    let path = job.path().to_string();
    let overwritten = Path::new(&path).exists();
    let mut out = BufWriter::new(File::create(&path)?);
    let header = job.header();
    out.write_all(&header)?;
    let mut bytes = header.len() as u64;
    let mut records = 0;
    while let Some(record) = job.next_record(records) {
        out.write_all(&record)?;
        bytes += record.len() as u64;
        records += 1;
    }
    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(JobSummary { records, bytes, overwritten })
}

/// Accepts file jobs.
pub trait FileWriter: Send + Sync {
    /// Queues or runs `job`.
    ///
    /// # Errors
    ///
    /// Returns `WriterBusy` if the writer cannot accept more work.
    fn submit(&self, job: Box<dyn FileJob>) -> Result<()>;

    /// Blocks until every job submitted so far has completed.
    fn flush(&self) {}
}

/// Runs each job on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineFileWriter;

impl FileWriter for InlineFileWriter {
    fn submit(&self, mut job: Box<dyn FileJob>) -> Result<()> {
        run_job(job.as_mut());
        Ok(())
    }
}

enum Command {
    Run(Box<dyn FileJob>),
    Barrier(Sender<()>),
}

/// Runs jobs on a dedicated worker thread.
///
/// At most `depth` jobs wait in the queue; further submissions fail with
/// `WriterBusy` instead of blocking the caller. Dropping the writer drains
/// the queue and joins the worker.
pub struct BackgroundFileWriter {
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundFileWriter {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the thread cannot be spawned.
    pub fn start(depth: usize) -> Result<Self> {
        let (sender, receiver) = bounded(depth.max(1));
        let worker = std::thread::Builder::new()
            .name("tbl-file-writer".to_string())
            .spawn(move || worker_loop(&receiver))
            .map_err(|e| internal(format!("failed to spawn file writer: {e}")))?;
        Ok(Self { sender: Mutex::new(Some(sender)), worker: Mutex::new(Some(worker)) })
    }
}

fn worker_loop(receiver: &Receiver<Command>) {
    for command in receiver {
        match command {
            Command::Run(mut job) => {
                debug!(path = job.path(), "writing file");
                run_job(job.as_mut());
            },
            Command::Barrier(done) => {
                let _ = done.send(());
            },
        }
    }
}

impl FileWriter for BackgroundFileWriter {
    fn submit(&self, job: Box<dyn FileJob>) -> Result<()> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(internal("file writer has shut down"));
        };
        match sender.try_send(Command::Run(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => WriterBusySnafu.fail(),
            Err(TrySendError::Disconnected(_)) => Err(internal("file writer worker exited")),
        }
    }

    fn flush(&self) {
        let (done_tx, done_rx) = bounded(1);
        let sent = self.sender.lock().as_ref().map(|s| s.send(Command::Barrier(done_tx)).is_ok());
        if sent == Some(true) && done_rx.recv().is_err() {
            warn!("file writer exited before reaching the flush barrier");
        }
    }
}

impl Drop for BackgroundFileWriter {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("file writer thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for BackgroundFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundFileWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use flight_tables_test_utils::TestDir;

    use super::*;
    use crate::error::TableError;

    struct LinesJob {
        path: String,
        lines: Vec<&'static str>,
        outcome: Arc<Mutex<Option<std::io::Result<JobSummary>>>>,
    }

    impl FileJob for LinesJob {
        fn path(&self) -> &str {
            &self.path
        }

        fn header(&mut self) -> Vec<u8> {
            b"HDR\n".to_vec()
        }

        fn next_record(&mut self, index: usize) -> Option<Vec<u8>> {
            self.lines.get(index).map(|l| format!("{l}\n").into_bytes())
        }

        fn complete(&mut self, result: std::io::Result<JobSummary>) {
            *self.outcome.lock() = Some(result);
        }
    }

    fn job(path: String) -> (Box<LinesJob>, Arc<Mutex<Option<std::io::Result<JobSummary>>>>) {
        let outcome = Arc::new(Mutex::new(None));
        (Box::new(LinesJob { path, lines: vec!["a", "bb"], outcome: Arc::clone(&outcome) }), outcome)
    }

    #[test]
    fn test_inline_writes_and_reports_overwrite() {
        let dir = TestDir::new();
        let path = dir.path_string("reg.log");
        let (first, outcome) = job(path.clone());
        InlineFileWriter.submit(first).unwrap();
        let summary = outcome.lock().take().unwrap().unwrap();
        assert_eq!(summary, JobSummary { records: 2, bytes: 4 + 2 + 3, overwritten: false });
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "HDR\na\nbb\n");

        let (second, outcome) = job(path);
        InlineFileWriter.submit(second).unwrap();
        assert!(outcome.lock().take().unwrap().unwrap().overwritten);
    }

    #[test]
    fn test_failure_reported_to_job() {
        let dir = TestDir::new();
        let path = dir.join("no/such/dir/file").to_string_lossy().into_owned();
        let (j, outcome) = job(path);
        InlineFileWriter.submit(j).unwrap();
        assert!(outcome.lock().take().unwrap().is_err());
    }

    #[test]
    fn test_background_flush_waits_for_jobs() {
        let dir = TestDir::new();
        let writer = BackgroundFileWriter::start(4).unwrap();
        let mut outcomes = Vec::new();
        for i in 0..3 {
            let (j, outcome) = job(dir.path_string(&format!("f{i}")));
            writer.submit(j).unwrap();
            outcomes.push(outcome);
        }
        writer.flush();
        for outcome in outcomes {
            assert!(outcome.lock().take().unwrap().is_ok());
        }
    }

    struct BlockingJob {
        gate: Receiver<()>,
    }

    impl FileJob for BlockingJob {
        fn path(&self) -> &str {
            "/dev/null"
        }

        fn header(&mut self) -> Vec<u8> {
            let _ = self.gate.recv();
            Vec::new()
        }

        fn next_record(&mut self, _index: usize) -> Option<Vec<u8>> {
            None
        }

        fn complete(&mut self, _result: std::io::Result<JobSummary>) {}
    }

    #[test]
    fn test_background_queue_full_is_busy() {
        let writer = BackgroundFileWriter::start(1).unwrap();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        writer.submit(Box::new(BlockingJob { gate: gate_rx.clone() })).unwrap();
        let mut busy = false;
        for _ in 0..4 {
            if let Err(e) = writer.submit(Box::new(BlockingJob { gate: gate_rx.clone() })) {
                assert!(matches!(e, TableError::WriterBusy));
                busy = true;
                break;
            }
        }
        assert!(busy);
        drop(gate_tx);
        drop(writer);
    }
}
