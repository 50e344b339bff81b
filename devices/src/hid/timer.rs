// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Readiness timer
//!
//! Periodic source of simulated "data ready" events. Each firing completes
//! at most one pending read with an input report built from the device
//! state at that moment.
//!
//! The timer only holds weak references to the device's state and queue.
//! Once the device is dropped, a firing is a no-op and the timer thread
//! exits on its own.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::{Mutex, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use vmm_sys_util::eventfd::EventFd;
use vmm_sys_util::timerfd::TimerFd;

use super::dispatcher::VirtualHidDevice;
use super::pending::PendingReadQueue;
use super::report::{InputReport, Report};
use super::state::DeviceState;
use super::{HidError, Result};

const TIMER_EVENT: u64 = 0;
const KILL_EVENT: u64 = 1;

/// Timer schedule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Delay before the first firing
    pub initial_delay_ms: u64,
    /// Interval between later firings
    pub period_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            period_ms: 5000,
        }
    }
}

impl TimerConfig {
    // A zero value would disarm the timerfd instead of firing immediately.
    fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms.max(1))
    }

    fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }
}

fn errno_to_io(e: vmm_sys_util::errno::Error) -> io::Error {
    io::Error::from_raw_os_error(e.errno())
}

#[derive(Clone)]
struct Ticker {
    state: Weak<Mutex<DeviceState>>,
    pending: Weak<Mutex<PendingReadQueue>>,
}

impl Ticker {
    fn tick(&self) -> bool {
        let (Some(state), Some(pending)) = (self.state.upgrade(), self.pending.upgrade()) else {
            return false;
        };

        let read = match pending.lock() {
            Ok(mut queue) => queue.try_dequeue_one(),
            Err(_) => {
                warn!("Pending read queue poisoned, skipping firing");
                return true;
            }
        };
        let Some(read) = read else {
            return true;
        };

        let completion = if read.capacity() < InputReport::SIZE {
            Err(HidError::buffer_too_small(InputReport::SIZE, read.capacity()))
        } else {
            match state.lock() {
                Ok(state) => Ok(state.input_report().encode()),
                Err(_) => Err(HidError::LockPoisoned("device state")),
            }
        };

        match &completion {
            Ok(report) => debug!("Completing {} with {report:02x?}", read.id()),
            Err(e) => warn!("Completing {} with error: {e}", read.id()),
        }
        read.complete(completion);
        true
    }

    fn run(&self, timer: &mut TimerFd, kill_evt: &EventFd, epoll_fd: &OwnedFd) -> io::Result<()> {
        let mut events = vec![epoll::Event::new(epoll::Events::empty(), 0); 2];

        loop {
            let num_events = match epoll::wait(epoll_fd.as_raw_fd(), -1, &mut events) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            for event in events.iter().take(num_events) {
                let token = event.data;
                match token {
                    TIMER_EVENT => {
                        let expirations = timer.wait().map_err(errno_to_io)?;
                        for _ in 0..expirations {
                            if !self.tick() {
                                debug!("Device gone, readiness timer exiting");
                                return Ok(());
                            }
                        }
                    }
                    KILL_EVENT => {
                        kill_evt.read()?;
                        return Ok(());
                    }
                    _ => warn!("Unexpected readiness timer event {token}"),
                }
            }
        }
    }
}

/// Drains the pending read queue of one device, one read per firing.
pub struct ReadinessTimer {
    ticker: Ticker,
    kill_evt: Option<EventFd>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ReadinessTimer {
    /// A timer with no thread behind it. Firings happen only through
    /// [`tick`](Self::tick).
    pub fn new(device: &VirtualHidDevice) -> Self {
        let (state, pending) = device.timer_refs();
        Self {
            ticker: Ticker { state, pending },
            kill_evt: None,
            thread: None,
        }
    }

    /// Arm a periodic timer and spawn the thread that services it.
    pub fn start(device: &VirtualHidDevice, config: TimerConfig) -> Result<Self> {
        let mut timer = Self::new(device);

        let mut timer_fd = TimerFd::new().map_err(errno_to_io)?;
        timer_fd
            .reset(config.initial_delay(), Some(config.period()))
            .map_err(errno_to_io)?;
        let kill_evt = EventFd::new(libc::EFD_NONBLOCK)?;

        let raw_fd = epoll::create(true)?;
        // SAFETY: raw_fd was just returned by epoll_create and nothing else owns it.
        let epoll_fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };
        epoll::ctl(
            epoll_fd.as_raw_fd(),
            epoll::ControlOptions::EPOLL_CTL_ADD,
            timer_fd.as_raw_fd(),
            epoll::Event::new(epoll::Events::EPOLLIN, TIMER_EVENT),
        )?;
        epoll::ctl(
            epoll_fd.as_raw_fd(),
            epoll::ControlOptions::EPOLL_CTL_ADD,
            kill_evt.as_raw_fd(),
            epoll::Event::new(epoll::Events::EPOLLIN, KILL_EVENT),
        )?;

        let ticker = timer.ticker.clone();
        let thread_kill_evt = kill_evt.try_clone()?;
        let handle = thread::Builder::new()
            .name("hid_timer".to_string())
            .spawn(move || {
                if let Err(e) = ticker.run(&mut timer_fd, &thread_kill_evt, &epoll_fd) {
                    error!("Readiness timer failed: {e}");
                }
            })?;

        info!(
            "Readiness timer started (delay {}ms, period {}ms)",
            config.initial_delay_ms, config.period_ms
        );
        timer.kill_evt = Some(kill_evt);
        timer.thread = Some(handle);
        Ok(timer)
    }

    /// Fire once: complete the oldest pending read, if any.
    ///
    /// Returns false once the device has been dropped.
    pub fn tick(&self) -> bool {
        self.ticker.tick()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the timer thread and wait for it. Idempotent.
    pub fn stop(&mut self) {
        if let Some(kill_evt) = self.kill_evt.take()
            && let Err(e) = kill_evt.write(1)
        {
            warn!("Failed to signal readiness timer: {e}");
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Readiness timer thread panicked");
            }
            info!("Readiness timer stopped");
        }
    }
}

impl Drop for ReadinessTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
