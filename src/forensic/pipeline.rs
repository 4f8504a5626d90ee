use crate::forensic::progress::{CancelToken, Monotonic, ProgressSink};
use anyhow::{Result, anyhow};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Progress(f64),
    Log(String),
}

struct ChannelSink {
    tx: Sender<PipelineEvent>,
}

impl ProgressSink for ChannelSink {
    fn progress(&self, pct: f64) {
        let _ = self.tx.send(PipelineEvent::Progress(pct));
    }

    fn log(&self, line: &str) {
        let _ = self.tx.send(PipelineEvent::Log(line.to_string()));
    }
}

/// A job running on its own worker thread.
pub struct PipelineHandle<T> {
    events: Receiver<PipelineEvent>,
    cancel: CancelToken,
    join: JoinHandle<Result<T>>,
}

/// Runs `job` off the caller's thread. Progress from the job is monotonic within the run.
pub fn spawn<T, F>(job: F) -> PipelineHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ProgressSink, &CancelToken) -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let join = thread::spawn(move || {
        let sink = Monotonic::new(ChannelSink { tx });
        job(&sink, &worker_cancel)
    });
    PipelineHandle {
        events: rx,
        cancel,
        join,
    }
}

impl<T> PipelineHandle<T> {
    /// Forwards worker events to `sink` on the calling thread until the job ends.
    /// `should_stop` is polled between events; once true the job is cancelled cooperatively.
    pub fn wait(self, sink: &dyn ProgressSink, should_stop: impl Fn() -> bool) -> Result<T> {
        loop {
            match self.events.recv_timeout(POLL_INTERVAL) {
                Ok(PipelineEvent::Progress(pct)) => sink.progress(pct),
                Ok(PipelineEvent::Log(line)) => sink.log(&line),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.cancel.is_cancelled() && should_stop() {
                self.cancel.cancel();
                sink.log("stop requested; finishing the in-flight request");
            }
        }
        self.join
            .join()
            .map_err(|_| anyhow!("pipeline worker panicked"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forensic::progress::recording::RecordingSink;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn events_are_forwarded_and_result_returned() {
        let handle = spawn(|sink, _cancel| {
            sink.log("starting");
            sink.progress(50.0);
            sink.progress(40.0);
            sink.progress(100.0);
            Ok(7u32)
        });
        let recorder = RecordingSink::default();
        let value = handle.wait(&recorder, || false).expect("job result");
        assert_eq!(value, 7);
        assert_eq!(recorder.lines(), vec!["starting".to_string()]);
        assert_eq!(recorder.percents(), vec![50.0, 100.0]);
    }

    #[test]
    fn stop_request_cancels_the_worker() {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = spawn(move |_sink, cancel| {
            stop_flag.store(true, Ordering::SeqCst);
            let mut iterations = 0u32;
            while !cancel.is_cancelled() {
                iterations += 1;
                cancel.sleep(Duration::from_millis(10));
            }
            Ok(iterations)
        });
        let recorder = RecordingSink::default();
        let iterations = handle
            .wait(&recorder, || stop.load(Ordering::SeqCst))
            .expect("job result");
        assert!(iterations >= 1);
        assert!(recorder.lines().iter().any(|l| l.contains("stop requested")));
    }

    #[test]
    fn worker_errors_propagate() {
        let handle = spawn(|_sink, _cancel| -> Result<()> { Err(anyhow!("boom")) });
        let err = handle
            .wait(&RecordingSink::default(), || false)
            .expect_err("error propagates");
        assert_eq!(err.to_string(), "boom");
    }
}
