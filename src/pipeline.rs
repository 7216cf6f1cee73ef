//! # Streaming Pipeline
//!
//! Bounded producer/consumer pipeline for builds too large to hold in memory.
//!
//! Any number of producers [`append`](StreamingPipeline::append) batches of rows into a
//! bounded channel; a single consumer task owns the [`SheetWriter`] and its sink and
//! writes batches in queue order. A full queue blocks producers. Closing the channel is
//! the stop signal: [`build`](StreamingPipeline::build) drops the sender, waits for the
//! consumer to drain the queue, then finishes the workbook on the calling thread.
//!
//! A consumer failure latches: the sink is closed, queued batches are discarded, and every
//! later `append` or `build` returns the same error.
use crate::error::Html2SheetError;
use crate::sink::WorkbookSink;
use crate::table::parse_rows;
use crate::table::Tr;
use crate::writer::SheetWriter;
use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::SendTimeoutError;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use thiserror::Error;

/// How often a producer blocked on a full queue rechecks for a latched failure.
const SEND_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lifecycle of a pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed, consumer not running
    Created,
    /// Consumer running, appends accepted
    Started,
    /// Stop signalled, waiting for the queue to drain
    Stopping,
    /// Consumer finished every queued batch
    Drained,
    /// Workbook finished and returned
    Closed,
    /// A failure latched
    Failed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Cannot {operation} while the pipeline is {state:?}")]
    InvalidState { operation: &'static str, state: PipelineState },

    #[error("Streaming build failed in {operation}: {cause}")]
    Failed { operation: String, cause: String },

    #[error("Consumer did not drain the queue within {0:?}")]
    Timeout(Duration),
}

/// State shared between producers, the consumer and the builder thread.
#[derive(Debug)]
struct Shared {
    state: Mutex<PipelineState>,
    failure: Mutex<Option<PipelineError>>,
}

impl Shared {
    fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    fn transition(&self, state: PipelineState) {
        let mut current = self.state.lock();
        if *current != PipelineState::Failed {
            log::debug!("Pipeline {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Records the first failure; later ones are ignored.
    fn latch(&self, error: PipelineError) -> PipelineError {
        let mut failure = self.failure.lock();
        let latched = failure.get_or_insert(error).clone();
        *self.state.lock() = PipelineState::Failed;
        latched
    }

    fn check(&self) -> Result<(), PipelineError> {
        match self.failure.lock().as_ref() {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

type Outcome<S> = Option<SheetWriter<S>>;

/// Consumer side handed to the task at start.
struct Consumer<S: WorkbookSink> {
    receiver: Receiver<Vec<Tr>>,
    writer: SheetWriter<S>,
    done: Sender<Outcome<S>>,
}

impl<S: WorkbookSink> Consumer<S> {
    fn run(self, shared: Arc<Shared>) {
        let Consumer { receiver, mut writer, done } = self;
        let mut batches = 0usize;
        let mut rows = 0usize;
        log::debug!("Consumer started");
        for batch in receiver.iter() {
            for tr in batch {
                if let Err(error) = writer.write_row(tr) {
                    let error = shared.latch(PipelineError::Failed { operation: "write_row".to_owned(), cause: error.to_string() });
                    log::error!("{error}; closing the sink and discarding queued rows");
                    drop(receiver);
                    writer.abandon();
                    let _ = done.send(None);
                    return;
                }
                rows += 1;
            }
            batches += 1;
        }
        log::debug!("Consumer drained {batches} batches with {rows} rows");
        shared.transition(PipelineState::Drained);
        let _ = done.send(Some(writer));
    }
}

/// Thread pool hosting the consumer task.
pub enum ConsumerHost {
    /// A dedicated background thread
    Thread,
    /// A caller-supplied rayon pool
    Pool(Arc<rayon::ThreadPool>),
}

/// Bounded streaming build over one sink.
pub struct StreamingPipeline<S: WorkbookSink + 'static> {
    sender: RwLock<Option<Sender<Vec<Tr>>>>,
    pending: Mutex<Option<Consumer<S>>>,
    done: Mutex<Option<Receiver<Outcome<S>>>>,
    shared: Arc<Shared>,
    drain_timeout: Option<Duration>,
}

impl<S: WorkbookSink + 'static> StreamingPipeline<S> {
    /// A pipeline in the `Created` state with a queue of `capacity` batches.
    pub fn new(writer: SheetWriter<S>, capacity: usize, drain_timeout: Option<Duration>) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let (done_sender, done) = crossbeam_channel::bounded(1);
        StreamingPipeline {
            sender: RwLock::new(Some(sender)),
            pending: Mutex::new(Some(Consumer { receiver, writer, done: done_sender })),
            done: Mutex::new(Some(done)),
            shared: Arc::new(Shared { state: Mutex::new(PipelineState::Created), failure: Mutex::new(None) }),
            drain_timeout,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// The latched failure, if any.
    pub fn failure(&self) -> Option<PipelineError> {
        self.shared.failure.lock().clone()
    }

    /// Starts the consumer task.
    pub fn start(&self, host: ConsumerHost) -> Result<(), Html2SheetError> {
        self.shared.check()?;
        let consumer = self.pending.lock().take().ok_or(PipelineError::InvalidState {
            operation: "start",
            state: self.state(),
        })?;
        let shared = Arc::clone(&self.shared);
        match host {
            ConsumerHost::Thread => {
                std::thread::Builder::new()
                    .name("html2sheet-consumer".to_owned())
                    .spawn(move || consumer.run(shared))?;
            }
            ConsumerHost::Pool(pool) => pool.spawn(move || consumer.run(shared)),
        }
        self.shared.transition(PipelineState::Started);
        Ok(())
    }

    /// Queues a batch of rows, blocking while the queue is full.
    ///
    /// A blocked producer gives up with the latched error once the pipeline fails.
    pub fn append(&self, mut rows: Vec<Tr>) -> Result<(), Html2SheetError> {
        self.shared.check()?;
        let sender = {
            let sender = self.sender.read();
            let state = self.state();
            match sender.as_ref().filter(|_| state == PipelineState::Started) {
                Some(sender) => sender.clone(),
                None => Err(PipelineError::InvalidState { operation: "append", state })?,
            }
        };
        if rows.is_empty() {
            return Ok(());
        }
        loop {
            match sender.send_timeout(rows, SEND_POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    self.shared.check()?;
                    rows = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    // The consumer dropped the queue; it only does so after latching.
                    self.shared.check()?;
                    return Err(PipelineError::InvalidState { operation: "append", state: self.state() }.into());
                }
            }
        }
    }

    /// Parses a `<tr>` fragment and queues its rows as one batch.
    pub fn append_html(&self, fragment: &str) -> Result<(), Html2SheetError> {
        self.append(parse_rows(fragment))
    }

    /// Stops accepting rows, waits for the queue to drain, finishes the workbook and
    /// returns the closed sink.
    pub fn build(&self) -> Result<S, Html2SheetError> {
        self.shared.check()?;
        let state = self.state();
        if state != PipelineState::Started {
            Err(PipelineError::InvalidState { operation: "build", state })?;
        }
        let deadline = self.drain_timeout.map(|timeout| (Instant::now() + timeout, timeout));
        self.shared.transition(PipelineState::Stopping);
        drop(self.sender.write().take());

        let done = self.done.lock().take().ok_or(PipelineError::InvalidState {
            operation: "build",
            state: self.state(),
        })?;
        let outcome = match deadline {
            Some((deadline, timeout)) => done.recv_deadline(deadline).map_err(|error| match error {
                RecvTimeoutError::Timeout => PipelineError::Timeout(timeout),
                RecvTimeoutError::Disconnected => terminated(),
            }),
            None => done.recv().map_err(|_| terminated()),
        };
        let writer = match outcome {
            Ok(Some(writer)) => writer,
            Ok(None) => {
                self.shared.check()?;
                Err(terminated())?
            }
            Err(error) => Err(self.shared.latch(error))?,
        };
        match writer.finish() {
            Ok(sink) => {
                self.shared.transition(PipelineState::Closed);
                Ok(sink)
            }
            Err(error) => {
                let failure = PipelineError::Failed { operation: "build".to_owned(), cause: error.to_string() };
                Err(self.shared.latch(failure))?
            }
        }
    }
}

fn terminated() -> PipelineError {
    PipelineError::Failed { operation: "consume".to_owned(), cause: "consumer terminated unexpectedly".to_owned() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuildConfig;
    use crate::sink::memory::MemorySink;
    use crate::sink::CellValue;
    use crate::sink::FreezePane;
    use crate::sink::MergeRegion;
    use crate::sink::SheetFormat;
    use crate::table::style::CellStyle;
    use crate::table::style::StyleCache;
    use crate::table::LayoutPolicy;
    use std::thread;

    fn pipeline(config: &BuildConfig) -> StreamingPipeline<MemorySink> {
        let writer = SheetWriter::new(MemorySink::default(), config, Arc::new(StyleCache::new()));
        StreamingPipeline::new(writer, config.queue_capacity, config.drain_timeout)
    }

    #[test]
    fn lifecycle() {
        let pipeline = pipeline(&BuildConfig::default());
        assert_eq!(pipeline.state(), PipelineState::Created);
        let error = pipeline.append(vec![Tr::from_values(0, ["early"])]).unwrap_err();
        assert!(error.to_string().contains("Created"));

        pipeline.start(ConsumerHost::Thread).unwrap();
        assert!(pipeline.start(ConsumerHost::Thread).is_err());
        pipeline.append(vec![Tr::from_values(0, ["a"]), Tr::from_values(1, ["b"])]).unwrap();
        pipeline.append_html("<tr><td>c</td></tr>").unwrap();
        let workbook = pipeline.build().unwrap().into_workbook();
        assert_eq!(pipeline.state(), PipelineState::Closed);
        let sheet = &workbook.sheets[0];
        assert_eq!((0..3).map(|row| sheet.row_text(row)[0].clone()).collect::<Vec<_>>(), ["a", "b", "c"]);

        let error = pipeline.append(vec![Tr::from_values(0, ["late"])]).unwrap_err();
        assert!(matches!(
            error,
            Html2SheetError::PipelineError(PipelineError::InvalidState { operation: "append", state: PipelineState::Closed })
        ));
        assert!(pipeline.build().is_err());
    }

    #[test]
    fn concurrent_producers_keep_batches_whole() {
        let config = BuildConfig::builder().queue_capacity(2).build().unwrap();
        let pipeline = Arc::new(pipeline(&config));
        pipeline.start(ConsumerHost::Thread).unwrap();
        let producers = (0..4)
            .map(|producer| {
                let pipeline = Arc::clone(&pipeline);
                thread::spawn(move || {
                    for batch in 0..25 {
                        let rows = (0..4).map(|row| Tr::from_values(row, [format!("{producer}-{batch}")])).collect();
                        pipeline.append(rows).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        for producer in producers {
            producer.join().unwrap();
        }
        let workbook = pipeline.build().unwrap().into_workbook();
        let sheet = &workbook.sheets[0];
        assert_eq!(sheet.row_count(), 400);
        for start in (0..400).step_by(4) {
            let first = sheet.row_text(start);
            assert!((start..start + 4).all(|row| sheet.row_text(row) == first));
        }
    }

    #[test]
    fn spans_reach_across_batches() {
        let pipeline = pipeline(&BuildConfig::default());
        pipeline.start(ConsumerHost::Thread).unwrap();
        pipeline.append_html(r#"<tr><td rowspan="2">A</td><td>B</td></tr>"#).unwrap();
        pipeline.append_html("<tr><td>C</td></tr>").unwrap();
        let workbook = pipeline.build().unwrap().into_workbook();
        let sheet = &workbook.sheets[0];
        assert_eq!(sheet.row_text(1), vec!["", "C"]);
        assert_eq!(sheet.merges, vec![MergeRegion { first_row: 0, last_row: 1, first_col: 0, last_col: 0 }]);
    }

    #[test]
    fn consumer_failures_latch() {
        let config = BuildConfig::builder().layout_policy(LayoutPolicy::Strict).build().unwrap();
        let pipeline = pipeline(&config);
        pipeline.start(ConsumerHost::Thread).unwrap();
        pipeline
            .append_html(r#"<tr><td>a</td><td rowspan="2">b</td></tr><tr><td colspan="2">c</td></tr>"#)
            .unwrap();
        let error = pipeline.build().unwrap_err();
        assert!(error.to_string().contains("Layout conflict"));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        let again = pipeline.append(vec![Tr::from_values(0, ["x"])]).unwrap_err();
        assert_eq!(again.to_string(), error.to_string());
        assert_eq!(pipeline.build().unwrap_err().to_string(), error.to_string());
    }

    #[test]
    fn consumer_runs_on_a_caller_pool() {
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap());
        let pipeline = pipeline(&BuildConfig::default());
        pipeline.start(ConsumerHost::Pool(pool)).unwrap();
        pipeline.append(vec![Tr::from_values(0, ["pooled"])]).unwrap();
        let workbook = pipeline.build().unwrap().into_workbook();
        assert_eq!(workbook.sheets[0].row_text(0), vec!["pooled"]);
    }

    /// Sink whose rows never finish, to exercise the drain timeout.
    #[derive(Debug)]
    struct StalledSink(crossbeam_channel::Receiver<()>);

    impl WorkbookSink for StalledSink {
        fn format(&self) -> SheetFormat {
            SheetFormat::Xlsx
        }
        fn create_sheet(&mut self, _: &str) -> Result<(), Html2SheetError> {
            Ok(())
        }
        fn create_row(&mut self, _: usize, _: Option<f64>, _: bool) -> Result<(), Html2SheetError> {
            let _ = self.0.recv();
            Ok(())
        }
        fn create_cell(&mut self, _: usize, _: usize, _: CellValue, _: Option<Arc<CellStyle>>) -> Result<(), Html2SheetError> {
            Ok(())
        }
        fn add_merge_region(&mut self, _: MergeRegion) -> Result<(), Html2SheetError> {
            Ok(())
        }
        fn add_dropdown(&mut self, _: usize, _: usize, _: &[String]) -> Result<(), Html2SheetError> {
            Ok(())
        }
        fn set_column_width(&mut self, _: usize, _: f64) -> Result<(), Html2SheetError> {
            Ok(())
        }
        fn create_freeze_pane(&mut self, _: FreezePane) -> Result<(), Html2SheetError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), Html2SheetError> {
            Ok(())
        }
    }

    #[test]
    fn drain_timeout_latches() {
        let (release, gate) = crossbeam_channel::unbounded();
        let config = BuildConfig::builder().drain_timeout(Duration::from_millis(50)).build().unwrap();
        let writer = SheetWriter::new(StalledSink(gate), &config, Arc::new(StyleCache::new()));
        let pipeline = StreamingPipeline::new(writer, 1, config.drain_timeout);
        pipeline.start(ConsumerHost::Thread).unwrap();
        pipeline.append(vec![Tr::from_values(0, ["stuck"])]).unwrap();
        let error = pipeline.build().unwrap_err();
        assert!(matches!(error, Html2SheetError::PipelineError(PipelineError::Timeout(_))));
        assert_eq!(pipeline.state(), PipelineState::Failed);
        drop(release);
    }

    #[test]
    fn drain_timeout_holds_while_a_producer_is_blocked() {
        let (release, gate) = crossbeam_channel::unbounded();
        let config = BuildConfig::builder().drain_timeout(Duration::from_millis(100)).build().unwrap();
        let writer = SheetWriter::new(StalledSink(gate), &config, Arc::new(StyleCache::new()));
        let pipeline = Arc::new(StreamingPipeline::new(writer, 1, config.drain_timeout));
        pipeline.start(ConsumerHost::Thread).unwrap();
        pipeline.append(vec![Tr::from_values(0, ["held"])]).unwrap();
        pipeline.append(vec![Tr::from_values(1, ["queued"])]).unwrap();

        let producer = {
            let pipeline = Arc::clone(&pipeline);
            thread::spawn(move || pipeline.append(vec![Tr::from_values(2, ["blocked"])]))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        let started = Instant::now();
        let error = pipeline.build().unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(error, Html2SheetError::PipelineError(PipelineError::Timeout(_))));

        let blocked = producer.join().unwrap().unwrap_err();
        assert!(matches!(blocked, Html2SheetError::PipelineError(PipelineError::Timeout(_))));
        drop(release);
    }
}
