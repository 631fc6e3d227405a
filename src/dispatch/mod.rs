//! Outbound appliance commands.
//!
//! The inference stage hands each fired command to a `Dispatcher`, which forwards it to
//! a `CommandSink` on its own worker thread. A full queue drops the command. Failed
//! sends are logged and counted; they are never retried.

mod hub;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::gesture::ApplianceCommand;

pub use hub::{HubSink, LogSink};

/// Delivers one command. `Ok` means the hub accepted it.
pub trait CommandSink: Send {
    fn describe(&self) -> String;
    fn send(&mut self, command: &ApplianceCommand) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounters {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchCounters {
        DispatchCounters {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

pub struct Dispatcher {
    sender: Option<SyncSender<ApplianceCommand>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn spawn(
        mut sink: Box<dyn CommandSink>,
        capacity: usize,
        stats: Arc<DispatchStats>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("dispatch queue capacity must be greater than zero"));
        }
        let (sender, receiver) = mpsc::sync_channel::<ApplianceCommand>(capacity);
        let worker_stats = stats.clone();
        log::info!("dispatching commands to {}", sink.describe());
        let join = std::thread::Builder::new()
            .name("dispatch".to_string())
            .spawn(move || {
                for command in receiver {
                    match sink.send(&command) {
                        Ok(()) => {
                            worker_stats.succeeded.fetch_add(1, Ordering::Relaxed);
                            log::info!("hub accepted \"{}\"", command.instruction);
                        }
                        Err(err) => {
                            worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                            log::error!(
                                "command \"{}\" failed: {:#}; {} toggle state may no longer match the appliance",
                                command.instruction,
                                err,
                                command.target
                            );
                        }
                    }
                }
            })?;
        Ok(Self {
            sender: Some(sender),
            join: Some(join),
            stats,
        })
    }

    /// Queue `command` without blocking. Returns false if it was dropped.
    pub fn submit(&self, command: ApplianceCommand) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        match sender.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("dispatch queue full; dropped \"{}\"", command.instruction);
                false
            }
            Err(TrySendError::Disconnected(command)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                log::error!("dispatch worker gone; dropped \"{}\"", command.instruction);
                false
            }
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Stop accepting commands and wait for queued ones to be sent.
    pub fn shutdown(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        self.sender.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("dispatch worker panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::error!("{}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::Receiver;
    use std::sync::Mutex;
    use std::time::Duration;

    struct GatedSink {
        gate: Arc<Mutex<Receiver<()>>>,
        sent: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl CommandSink for GatedSink {
        fn describe(&self) -> String {
            "gated".to_string()
        }

        fn send(&mut self, command: &ApplianceCommand) -> Result<()> {
            let gate = self.gate.lock().map_err(|_| anyhow!("gate poisoned"))?;
            gate.recv_timeout(Duration::from_secs(5))?;
            self.sent
                .lock()
                .map_err(|_| anyhow!("sent poisoned"))?
                .push(command.instruction.clone());
            if self.fail {
                return Err(anyhow!("hub responded with status 500"));
            }
            Ok(())
        }
    }

    fn command(instruction: &str) -> ApplianceCommand {
        ApplianceCommand {
            target: "light".to_string(),
            turn_on: true,
            instruction: instruction.to_string(),
        }
    }

    fn gated(fail: bool) -> (Box<GatedSink>, mpsc::Sender<()>, Arc<Mutex<Vec<String>>>) {
        let (open, gate) = mpsc::channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Box::new(GatedSink {
            gate: Arc::new(Mutex::new(gate)),
            sent: sent.clone(),
            fail,
        });
        (sink, open, sent)
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() -> Result<()> {
        let (sink, open, sent) = gated(false);
        let stats = Arc::new(DispatchStats::default());
        let dispatcher = Dispatcher::spawn(sink, 1, stats.clone())?;

        // One command in flight inside the sink, one queued, the rest dropped.
        let mut accepted = 0;
        for i in 0..5 {
            if dispatcher.submit(command(&format!("cmd {}", i))) {
                accepted += 1;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert_eq!(accepted, 2);
        for _ in 0..accepted {
            open.send(()).ok();
        }
        dispatcher.shutdown()?;

        let counters = stats.snapshot();
        assert_eq!(counters.submitted, 5);
        assert_eq!(counters.dropped, 3);
        assert_eq!(counters.succeeded, 2);
        assert_eq!(sent.lock().unwrap().as_slice(), ["cmd 0", "cmd 1"]);
        Ok(())
    }

    #[test]
    fn failures_are_counted_not_retried() -> Result<()> {
        let (sink, open, sent) = gated(true);
        let stats = Arc::new(DispatchStats::default());
        let dispatcher = Dispatcher::spawn(sink, 4, stats.clone())?;
        open.send(())?;
        assert!(dispatcher.submit(command("turn on the light")));
        dispatcher.shutdown()?;

        assert_eq!(sent.lock().unwrap().len(), 1);
        let counters = stats.snapshot();
        assert_eq!((counters.succeeded, counters.failed), (0, 1));
        Ok(())
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let (sink, _open, _sent) = gated(false);
        assert!(Dispatcher::spawn(sink, 0, Arc::new(DispatchStats::default())).is_err());
    }
}
