//! Capture runtime: drives a packet source through reassembly and dispatch.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tapwire_capture::{Assembler, AssemblerStats, PacketSource, SourceEvent, SourceStats};
use tapwire_config::AssemblyConfig;
use tokio::runtime::Handle;
use tokio::task::spawn_blocking;
use tracing::{debug, info, instrument};

use crate::context::EngineContext;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub source: SourceStats,
    pub assembly: AssemblerStats,
}

pub struct CaptureRuntime {
    context: Arc<EngineContext>,
    assembly: AssemblyConfig,
}

impl CaptureRuntime {
    pub fn new(context: Arc<EngineContext>, assembly: AssemblyConfig) -> Self {
        Self { context, assembly }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Runs until `terminate` is set or the source ends, then closes every
    /// connection and waits for all readers to exit.
    #[instrument(skip_all, fields(source = %source.name()))]
    pub async fn run(
        &self,
        mut source: PacketSource,
        terminate: Arc<AtomicBool>,
    ) -> Result<RunSummary, EngineError> {
        let mut dispatcher = Dispatcher::new(Arc::clone(&self.context), Handle::current());
        let tracker = dispatcher.tracker();
        let assembly = self.assembly.clone();
        let metrics = self.context.metrics.clone();

        let capture = spawn_blocking(move || {
            info!("Starting packet capture");
            let mut assembler = Assembler::new(&assembly);
            let mut eviction = IdleEviction::new(&assembly);

            let result = source.run(&terminate, |event| {
                let now = match event {
                    SourceEvent::Segment(segment) => {
                        metrics.packets.inc();
                        assembler.process(segment, &mut dispatcher);
                        assembler.clock()
                    }
                    SourceEvent::Idle => Some(Utc::now()),
                };
                if let Some(cutoff) = now.and_then(|now| eviction.due(now)) {
                    let evicted = assembler.flush_older_than(cutoff, &mut dispatcher);
                    if evicted > 0 {
                        debug!(evicted, "evicted idle connections");
                    }
                }
            });

            assembler.flush_all(&mut dispatcher);
            info!(stats = ?assembler.stats(), "Packet capture stopped");
            result.map(|source| RunSummary {
                source,
                assembly: assembler.stats(),
            })
        });

        let summary = capture.await??;
        let pending = tracker.active();
        if pending > 0 {
            info!(readers = pending, "waiting for readers to drain");
        }
        tracker.wait().await;
        info!("Capture runtime stopped");
        Ok(summary)
    }
}

/// Decides when idle connections are looked for, on the capture clock.
struct IdleEviction {
    timeout: Duration,
    interval: Duration,
    last: Option<DateTime<Utc>>,
}

impl IdleEviction {
    fn new(config: &AssemblyConfig) -> Self {
        Self {
            timeout: Duration::seconds(config.idle_timeout_secs as i64),
            interval: Duration::seconds(config.flush_interval_secs as i64),
            last: None,
        }
    }

    /// The idle cutoff, when a sweep is due at `now`.
    fn due(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.last {
            None => {
                self.last = Some(now);
                None
            }
            Some(last) if now - last >= self.interval => {
                self.last = Some(now);
                Some(now - self.timeout)
            }
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_runs_on_interval() {
        let config = AssemblyConfig {
            idle_timeout_secs: 60,
            flush_interval_secs: 10,
            ..Default::default()
        };
        let mut eviction = IdleEviction::new(&config);
        let start = Utc::now();

        assert_eq!(eviction.due(start), None);
        assert_eq!(eviction.due(start + Duration::seconds(5)), None);
        assert_eq!(
            eviction.due(start + Duration::seconds(10)),
            Some(start + Duration::seconds(10) - Duration::seconds(60))
        );
        assert_eq!(eviction.due(start + Duration::seconds(11)), None);
    }
}
