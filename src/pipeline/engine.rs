//! Request-level engine
//!
//! Analyze runs on the calling thread: decode, extract, rank against the
//! current corpus snapshot. Separation is handed to a fixed pool of worker
//! threads fed by a bounded channel. At most `workers + queue_depth` jobs
//! are admitted at once; beyond that callers get `Busy` straight away.
//!
//! Every admitted job is tracked by a [`SeparationTicket`]. Dropping the
//! ticket before the job finishes cancels it.

use crate::analysis::{CancelFlag, FeatureExtractor, SeparationControl, SpectralStemSeparator, StemSeparator};
use crate::audio::decode_bytes;
use crate::config::EngineConfig;
use crate::error::{Result, TunematchError};
use crate::export::{store_all, AnalyzeResponse, SeparateResponse, StemSink};
use crate::matching::{CorpusIndex, MatchRanker};
use crate::types::{RankedResult, SeparationState, Stem, Waveform};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use hash32::FnvHasher;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Analysis and separation front end
pub struct Engine {
    config: EngineConfig,
    corpus: Arc<CorpusIndex>,
    extractor: FeatureExtractor,
    ranker: MatchRanker,
    pool: SeparationPool,
}

impl Engine {
    /// Engine with the built-in spectral separator
    pub fn new(config: EngineConfig, corpus: Arc<CorpusIndex>) -> Result<Self> {
        let separator = Arc::new(SpectralStemSeparator::new(&config.separation));
        Self::with_separator(config, corpus, separator)
    }

    pub fn with_separator(
        config: EngineConfig,
        corpus: Arc<CorpusIndex>,
        separator: Arc<dyn StemSeparator>,
    ) -> Result<Self> {
        config.validate()?;

        let extractor = FeatureExtractor::new(&config.analysis);
        let ranker = MatchRanker::new(&config.scoring, &config.ranking);
        let pool = SeparationPool::start(&config, separator)?;

        info!(
            "Engine ready: corpus v{} ({} tracks), {} separation workers, queue depth {}",
            corpus.version(),
            corpus.len(),
            config.separation.workers,
            config.separation.queue_depth
        );

        Ok(Self {
            config,
            corpus,
            extractor,
            ranker,
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The corpus this engine ranks against; publish to it to update rankings
    pub fn corpus(&self) -> &Arc<CorpusIndex> {
        &self.corpus
    }

    /// Decode `bytes`, extract features and rank them against the corpus
    pub fn analyze(&self, bytes: &[u8], hint: Option<&str>) -> Result<RankedResult> {
        let waveform = decode_bytes(bytes, hint, self.config.analysis.sample_rate)?;
        self.analyze_waveform(&waveform)
    }

    /// Rank an already decoded waveform
    pub fn analyze_waveform(&self, waveform: &Waveform) -> Result<RankedResult> {
        let features = self.extractor.extract(waveform)?;
        let snapshot = self.corpus.snapshot();
        self.ranker.rank(&features, &snapshot)
    }

    /// [`Engine::analyze`] as a response; errors become `status: "error"`
    pub fn analyze_response(&self, bytes: &[u8], hint: Option<&str>) -> AnalyzeResponse {
        match self.analyze(bytes, hint) {
            Ok(result) => AnalyzeResponse::success(&result),
            Err(e) => {
                warn!("Analyze request failed: {}", e);
                AnalyzeResponse::error(&e)
            }
        }
    }

    /// Admit a separation job
    ///
    /// Fails with `Busy` when the pool is saturated and with a loader error
    /// when the bytes cannot be decoded. Neither admits anything.
    pub fn submit_separation(&self, bytes: &[u8], hint: Option<&str>) -> Result<SeparationTicket> {
        let slot = self.pool.admit()?;
        let waveform = decode_bytes(bytes, hint, self.config.analysis.sample_rate)?;

        let id = job_id(bytes, self.pool.next_seq());
        let budget = self.config.separation.budget_for(waveform.duration());
        let shared = Arc::new(JobShared::new(id));
        debug!(
            "Separation {} received: {:.2}s of audio, budget {:.1}s",
            shared.id,
            waveform.duration(),
            budget.as_secs_f64()
        );

        let job = Job {
            shared: Arc::clone(&shared),
            waveform,
            budget,
        };
        self.pool.enqueue(job, slot)?;

        Ok(SeparationTicket { shared })
    }

    /// Submit a separation and block until it finishes
    pub fn separate(&self, bytes: &[u8], hint: Option<&str>) -> Result<Vec<Stem>> {
        self.submit_separation(bytes, hint)?.wait()
    }

    /// Separate and store every stem through `sink`
    ///
    /// Either all four stems are stored and listed, or the response is an
    /// error and nothing of the job is left behind in the sink.
    pub fn separate_and_export(&self, bytes: &[u8], hint: Option<&str>, sink: &dyn StemSink) -> SeparateResponse {
        let result = self.submit_separation(bytes, hint).and_then(|ticket| {
            let job_id = ticket.id().to_string();
            let mut stems = ticket.wait()?;
            store_all(sink, &job_id, &mut stems)?;
            Ok(stems)
        });

        match result {
            Ok(stems) => SeparateResponse::success(&stems),
            Err(e) => {
                warn!("Separate request failed: {}", e);
                SeparateResponse::error(&e)
            }
        }
    }

    /// Jobs currently admitted (running or queued)
    pub fn separations_in_flight(&self) -> usize {
        self.pool.shared.admitted.load(Ordering::SeqCst)
    }
}

/// `<fnv32 of the payload>-<sequence>`, unique per engine
fn job_id(bytes: &[u8], seq: u64) -> String {
    use hash32::Hasher as _;
    use std::hash::Hasher as _;

    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    format!("{:08x}-{}", hasher.finish32(), seq)
}

// =============================================================================
// Tickets
// =============================================================================

struct JobStatus {
    state: SeparationState,
    outcome: Option<Result<Vec<Stem>>>,
}

/// State shared between a ticket and the worker running its job
struct JobShared {
    id: String,
    cancel: CancelFlag,
    status: Mutex<JobStatus>,
    finished: Condvar,
}

impl JobShared {
    fn new(id: String) -> Self {
        Self {
            id,
            cancel: CancelFlag::new(),
            status: Mutex::new(JobStatus {
                state: SeparationState::Received,
                outcome: None,
            }),
            finished: Condvar::new(),
        }
    }

    fn transition(status: &mut JobStatus, id: &str, next: SeparationState) {
        if status.state.can_transition_to(next) {
            debug!("Separation {}: {:?} -> {:?}", id, status.state, next);
            status.state = next;
        } else {
            error!("Separation {}: illegal transition {:?} -> {:?}", id, status.state, next);
        }
    }

    fn start(&self) {
        let mut status = self.status.lock();
        Self::transition(&mut status, &self.id, SeparationState::Decomposing);
    }

    fn finish(&self, outcome: Result<Vec<Stem>>) {
        let mut status = self.status.lock();
        let next = if outcome.is_ok() {
            SeparationState::Complete
        } else {
            SeparationState::Failed
        };
        Self::transition(&mut status, &self.id, next);
        status.outcome = Some(outcome);
        self.finished.notify_all();
    }
}

/// Handle on an admitted separation job
pub struct SeparationTicket {
    shared: Arc<JobShared>,
}

impl SeparationTicket {
    /// Job id, also used to address the exported stems
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> SeparationState {
        self.shared.status.lock().state
    }

    /// Ask the worker to stop; the job then finishes with `Cancelled`
    pub fn cancel(&self) {
        debug!("Separation {} cancel requested", self.shared.id);
        self.shared.cancel.cancel();
    }

    /// Block until the job finishes
    pub fn wait(self) -> Result<Vec<Stem>> {
        let mut status = self.shared.status.lock();
        loop {
            if let Some(outcome) = status.outcome.take() {
                return outcome;
            }
            self.shared.finished.wait(&mut status);
        }
    }

    /// Block until the job finishes or `timeout` passes
    ///
    /// On timeout the ticket is handed back and the job keeps running.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<Vec<Stem>>, Self> {
        let deadline = Instant::now() + timeout;
        {
            let mut status = self.shared.status.lock();
            loop {
                if let Some(outcome) = status.outcome.take() {
                    return Ok(outcome);
                }
                if self.shared.finished.wait_until(&mut status, deadline).timed_out() {
                    if let Some(outcome) = status.outcome.take() {
                        return Ok(outcome);
                    }
                    break;
                }
            }
        }
        Err(self)
    }
}

impl Drop for SeparationTicket {
    fn drop(&mut self) {
        let status = self.shared.status.lock();
        if !status.state.is_terminal() {
            debug!("Separation {} abandoned, cancelling", self.shared.id);
            self.shared.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for SeparationTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeparationTicket")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Worker pool
// =============================================================================

struct Job {
    shared: Arc<JobShared>,
    waveform: Waveform,
    budget: Duration,
}

struct PoolShared {
    admitted: AtomicUsize,
    closing: AtomicBool,
}

/// Admission slot; released on drop unless handed to a queued job
struct Slot<'a> {
    pool: &'a PoolShared,
    armed: bool,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.admitted.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct SeparationPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
    limit: usize,
    seq: AtomicU64,
}

impl SeparationPool {
    fn start(config: &EngineConfig, separator: Arc<dyn StemSeparator>) -> Result<Self> {
        let limit = config.separation.admission_limit();
        // Admission caps the queue, the channel never fills before it
        let (tx, rx) = bounded::<Job>(limit);
        let shared = Arc::new(PoolShared {
            admitted: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(config.separation.workers);
        for index in 0..config.separation.workers {
            let rx = rx.clone();
            let separator = Arc::clone(&separator);
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("tunematch-sep-{}", index))
                .spawn(move || worker_loop(index, rx, separator, shared))?;
            workers.push(handle);
        }

        Ok(Self {
            sender: Some(tx),
            workers,
            shared,
            limit,
            seq: AtomicU64::new(0),
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn admit(&self) -> Result<Slot<'_>> {
        let in_flight = self.shared.admitted.fetch_add(1, Ordering::SeqCst);
        let slot = Slot {
            pool: &self.shared,
            armed: true,
        };
        if in_flight >= self.limit || self.shared.closing.load(Ordering::SeqCst) {
            warn!(
                "Rejecting separation: {} of {} slots in use",
                in_flight, self.limit
            );
            return Err(TunematchError::Busy {
                in_flight,
                limit: self.limit,
            });
        }
        Ok(slot)
    }

    fn enqueue(&self, job: Job, mut slot: Slot<'_>) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(TunematchError::Busy {
            in_flight: self.limit,
            limit: self.limit,
        })?;
        match sender.try_send(job) {
            Ok(()) => {
                // The worker releases the slot when the job finishes
                slot.armed = false;
                Ok(())
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                warn!("Separation queue unavailable, rejecting job");
                Err(TunematchError::Busy {
                    in_flight: self.shared.admitted.load(Ordering::SeqCst),
                    limit: self.limit,
                })
            }
        }
    }
}

impl Drop for SeparationPool {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        // Closing the channel ends every worker loop once the queue drains
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if let Err(panic_info) = handle.join() {
                error!("Separation worker panicked: {}", panic_message(panic_info.as_ref()));
            }
        }
        debug!("Separation pool shut down");
    }
}

fn worker_loop(index: usize, rx: Receiver<Job>, separator: Arc<dyn StemSeparator>, pool: Arc<PoolShared>) {
    debug!("Separation worker {} started ({})", index, separator.name());

    for job in rx {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            run_job(&job, separator.as_ref(), &pool)
        })) {
            Ok(outcome) => outcome,
            Err(panic_info) => {
                let panic_msg = panic_message(panic_info.as_ref());
                error!(
                    "Separator {} panicked on {}: {}",
                    separator.name(),
                    job.shared.id,
                    panic_msg
                );
                Err(TunematchError::separation_failed(format!(
                    "separator {} panicked: {}",
                    separator.name(),
                    panic_msg
                )))
            }
        };
        match &outcome {
            Ok(_) => info!("Separation {} complete", job.shared.id),
            Err(e) => warn!("Separation {} failed: {}", job.shared.id, e),
        }
        // Free the slot before waking the waiter so it can resubmit at once
        pool.admitted.fetch_sub(1, Ordering::SeqCst);
        job.shared.finish(outcome);
    }

    debug!("Separation worker {} stopped", index);
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_job(job: &Job, separator: &dyn StemSeparator, pool: &PoolShared) -> Result<Vec<Stem>> {
    if job.shared.cancel.is_cancelled() || pool.closing.load(Ordering::SeqCst) {
        return Err(TunematchError::Cancelled);
    }

    job.shared.start();
    // The budget covers the work only, not the time spent queued
    let control = SeparationControl::start(job.budget, job.shared.cancel.clone());
    let stems = separator.separate(&job.waveform, &control)?;

    let expected = separator.stem_names();
    if stems.len() != expected.len() || stems.iter().zip(expected).any(|(s, n)| s.name != *n) {
        error!(
            "Separator {} returned an incomplete stem set ({} stems)",
            separator.name(),
            stems.len()
        );
        return Err(TunematchError::separation_failed(format!(
            "separator {} returned {} of {} stems",
            separator.name(),
            stems.len(),
            expected.len()
        )));
    }

    Ok(stems)
}
