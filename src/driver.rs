//! Schedules the cooperative update/draw cadence.
//!
//! The machine itself is synchronous; a [`Driver`] owns it behind a
//! lock and uses a [`Ticker`] to run a batch of instructions every
//! couple of milliseconds and to raise the draw flag at roughly
//! 60 Hz. Scripts observe the flags through the `__needs_update` and
//! `__needs_draw` builtins.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flume::{RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::vm::Vm;

pub const UPDATE_INTERVAL: Duration = Duration::from_millis(2);
pub const DRAW_INTERVAL: Duration = Duration::from_millis(16);

/// A recurring-callback capability. Implementations invoke the
/// callback every `interval` until the handle is cancelled or
/// dropped.
pub trait Ticker: Send + Sync {
    fn schedule(&self, interval: Duration, callback: Box<dyn FnMut() + Send>) -> TickHandle;

    fn cancel(&self, handle: TickHandle) {
        drop(handle);
    }
}

/// Cancels its tick when cancelled or dropped.
#[derive(Debug)]
pub struct TickHandle {
    stop: Sender<()>,
}

/// A [`Ticker`] backed by one thread per scheduled tick. The thread
/// sleeps on a channel so cancellation takes effect immediately.
#[derive(Debug, Default)]
pub struct ThreadTicker;

impl Ticker for ThreadTicker {
    fn schedule(&self, interval: Duration, mut callback: Box<dyn FnMut() + Send>) -> TickHandle {
        let (stop, stopped) = flume::bounded(1);
        thread::spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => callback(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        TickHandle { stop }
    }
}

/// Drives a shared [`Vm`] through its run/pause/stop lifecycle.
pub struct Driver {
    vm: Arc<Mutex<Vm>>,
    ticker: Arc<dyn Ticker>,
    update: Option<TickHandle>,
    draw: Option<TickHandle>,
}

impl Driver {
    #[must_use]
    pub fn new(vm: Arc<Mutex<Vm>>) -> Self {
        Self::with_ticker(vm, Arc::new(ThreadTicker))
    }

    #[must_use]
    pub fn with_ticker(vm: Arc<Mutex<Vm>>, ticker: Arc<dyn Ticker>) -> Self {
        Self {
            vm,
            ticker,
            update: None,
            draw: None,
        }
    }

    #[must_use]
    pub fn vm(&self) -> &Arc<Mutex<Vm>> {
        &self.vm
    }

    /// Begins scheduled execution. The update tick raises the update
    /// flag and executes one instruction batch; the draw tick only
    /// raises the draw flag.
    pub fn run(&mut self) {
        if self.update.is_some() {
            return;
        }
        self.vm.lock().run();

        let vm = self.vm.clone();
        self.update = Some(self.ticker.schedule(
            UPDATE_INTERVAL,
            Box::new(move || {
                let mut vm = vm.lock();
                vm.flags().set_needs_update();
                vm.multi_step();
            }),
        ));

        let vm = self.vm.clone();
        self.draw = Some(self.ticker.schedule(
            DRAW_INTERVAL,
            Box::new(move || {
                vm.lock().flags().set_needs_draw();
                trace!("draw tick");
            }),
        ));
        debug!("driver running");
    }

    /// Cancels the ticks, leaving the machine's state intact.
    pub fn pause(&mut self) {
        self.cancel_ticks();
        self.vm.lock().pause();
        debug!("driver paused");
    }

    /// Cancels the ticks and rewinds the machine.
    pub fn stop(&mut self) {
        self.cancel_ticks();
        self.vm.lock().stop();
        debug!("driver stopped");
    }

    fn cancel_ticks(&mut self) {
        if let Some(handle) = self.update.take() {
            self.ticker.cancel(handle);
        }
        if let Some(handle) = self.draw.take() {
            self.ticker.cancel(handle);
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.cancel_ticks();
    }
}

impl TickHandle {
    fn cancel(&self) {
        let _ = self.stop.try_send(());
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
