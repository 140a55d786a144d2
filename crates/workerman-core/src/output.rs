//! Structured operator-facing output.
//!
//! Internal diagnostics go through `tracing`; everything addressed to the
//! operator goes through an [`Output`] handle holding a list of sinks. The
//! facade carries two lists: the general sinks and the ones that survive
//! daemonization. Entering daemon mode swaps the lists and silences
//! `debug`.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

/// Progress-bar lifecycle events emitted during a graceful drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Start { total: usize },
    Tick,
    Finish,
}

/// A structured sink for operator events.
pub trait OutputSink: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
    fn success(&self, message: &str);
    fn exception(&self, message: &str);
    fn progress(&self, event: ProgressEvent);
}

/// Plain console sink: info and success to stdout, the rest to stderr.
/// Terminal styling belongs to the CLI layer, not here.
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn debug(&self, message: &str) {
        eprintln!("{message}");
    }

    fn info(&self, message: &str) {
        println!("{message}");
    }

    fn warning(&self, message: &str) {
        eprintln!("warning: {message}");
    }

    fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    fn success(&self, message: &str) {
        println!("{message}");
    }

    fn exception(&self, message: &str) {
        eprintln!("exception: {message}");
    }

    fn progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Start { total } => eprint!("draining {total} workers "),
            ProgressEvent::Tick => eprint!("."),
            ProgressEvent::Finish => eprintln!(" done"),
        }
    }
}

/// Routes operator events into the tracing pipeline. The sink of choice
/// after daemonization, when the terminal is gone.
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn debug(&self, message: &str) {
        debug!("{message}");
    }

    fn info(&self, message: &str) {
        info!("{message}");
    }

    fn warning(&self, message: &str) {
        warn!("{message}");
    }

    fn error(&self, message: &str) {
        error!("{message}");
    }

    fn success(&self, message: &str) {
        info!("{message}");
    }

    fn exception(&self, message: &str) {
        error!("{message}");
    }

    fn progress(&self, event: ProgressEvent) {
        debug!(?event, "progress");
    }
}

/// Decorator that prepends a process-scoped prefix to every message.
pub struct PrefixSink {
    prefix: String,
    inner: Arc<dyn OutputSink>,
}

impl PrefixSink {
    pub fn new(prefix: impl Into<String>, inner: Arc<dyn OutputSink>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    fn compose(&self, message: &str) -> String {
        format!("{} {}", self.prefix, message)
    }
}

impl OutputSink for PrefixSink {
    fn debug(&self, message: &str) {
        self.inner.debug(&self.compose(message));
    }

    fn info(&self, message: &str) {
        self.inner.info(&self.compose(message));
    }

    fn warning(&self, message: &str) {
        self.inner.warning(&self.compose(message));
    }

    fn error(&self, message: &str) {
        self.inner.error(&self.compose(message));
    }

    fn success(&self, message: &str) {
        self.inner.success(&self.compose(message));
    }

    fn exception(&self, message: &str) {
        self.inner.exception(&self.compose(message));
    }

    fn progress(&self, event: ProgressEvent) {
        self.inner.progress(event);
    }
}

struct OutputState {
    sinks: Vec<Arc<dyn OutputSink>>,
    post_daemonize: Vec<Arc<dyn OutputSink>>,
    daemonized: bool,
}

/// Shared handle over the sink lists. Cloning shares state, which is what
/// the master, worker, and controller constructors expect.
#[derive(Clone)]
pub struct Output {
    state: Arc<Mutex<OutputState>>,
}

impl Output {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>, post_daemonize: Vec<Arc<dyn OutputSink>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(OutputState {
                sinks,
                post_daemonize,
                daemonized: false,
            })),
        }
    }

    /// Console sink before daemonization, tracing sink after.
    pub fn standard() -> Self {
        Self::new(vec![Arc::new(ConsoleSink)], vec![Arc::new(TracingSink)])
    }

    /// Swaps in the post-daemonize sinks. `debug` becomes a no-op.
    pub fn apply_daemon_mode(&self) {
        let mut state = self.state.lock().unwrap();
        state.sinks = std::mem::take(&mut state.post_daemonize);
        state.daemonized = true;
    }

    pub fn debug(&self, message: &str) {
        let state = self.state.lock().unwrap();
        if state.daemonized {
            return;
        }
        for sink in &state.sinks {
            sink.debug(message);
        }
    }

    pub fn info(&self, message: &str) {
        self.each(|sink| sink.info(message));
    }

    pub fn warning(&self, message: &str) {
        self.each(|sink| sink.warning(message));
    }

    pub fn error(&self, message: &str) {
        self.each(|sink| sink.error(message));
    }

    pub fn success(&self, message: &str) {
        self.each(|sink| sink.success(message));
    }

    pub fn exception(&self, message: &str) {
        self.each(|sink| sink.exception(message));
    }

    pub fn progress(&self, event: ProgressEvent) {
        self.each(|sink| sink.progress(event));
    }

    fn each<F: Fn(&Arc<dyn OutputSink>)>(&self, f: F) {
        let state = self.state.lock().unwrap();
        for sink in &state.sinks {
            f(sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        fn push(&self, kind: &str, message: &str) {
            self.lines.lock().unwrap().push(format!("{kind}:{message}"));
        }
    }

    impl OutputSink for Recorder {
        fn debug(&self, message: &str) {
            self.push("debug", message);
        }
        fn info(&self, message: &str) {
            self.push("info", message);
        }
        fn warning(&self, message: &str) {
            self.push("warning", message);
        }
        fn error(&self, message: &str) {
            self.push("error", message);
        }
        fn success(&self, message: &str) {
            self.push("success", message);
        }
        fn exception(&self, message: &str) {
            self.push("exception", message);
        }
        fn progress(&self, event: ProgressEvent) {
            self.push("progress", &format!("{event:?}"));
        }
    }

    #[test]
    fn test_daemon_mode_swaps_sinks_and_silences_debug() {
        let general = Arc::new(Recorder::default());
        let daemon = Arc::new(Recorder::default());
        let output = Output::new(vec![general.clone()], vec![daemon.clone()]);

        output.debug("before");
        output.info("hello");
        output.apply_daemon_mode();
        output.debug("after");
        output.error("boom");

        assert_eq!(general.lines(), vec!["debug:before", "info:hello"]);
        assert_eq!(daemon.lines(), vec!["error:boom"]);
    }

    #[test]
    fn test_prefix_sink_decorates_messages() {
        let recorder = Arc::new(Recorder::default());
        let prefixed = PrefixSink::new("[worker 3]", recorder.clone());
        prefixed.info("draining");
        prefixed.progress(ProgressEvent::Tick);
        assert_eq!(
            recorder.lines(),
            vec!["info:[worker 3] draining", "progress:Tick"]
        );
    }
}
