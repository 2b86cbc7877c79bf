//! Deadlines for connection I/O.
//!
//! Socket futures only wake on readiness, so a peer that goes quiet would
//! park its connection forever. [`Timer`] runs one thread that wakes the
//! registered task once a deadline passes. The I/O helpers below then see
//! the expired deadline and fail with [`io::ErrorKind::TimedOut`].

use std::future::poll_fn;
use std::io;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Poll, Waker};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use asupersync::io::{AsyncRead, AsyncWrite, ReadBuf};
use asupersync::net::TcpStream;
use parking_lot::{Condvar, Mutex, MutexGuard};

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    signal: Condvar,
}

#[derive(Default)]
struct State {
    pending: Vec<(Instant, Waker)>,
    stopped: bool,
}

/// Owns the wakeup thread. Dropping it stops the thread.
pub(crate) struct Timer {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    pub(crate) fn start() -> io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("japi-timer".to_owned())
            .spawn(move || run(&worker))?;
        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    pub(crate) fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.state.lock().stopped = true;
        self.shared.signal.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    while !state.stopped {
        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) = mem::take(&mut state.pending)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        state.pending = later;
        if !due.is_empty() {
            MutexGuard::unlocked(&mut state, || {
                for (_, waker) in due {
                    waker.wake();
                }
            });
            continue;
        }
        match state.pending.iter().map(|(at, _)| *at).min() {
            Some(next) => {
                let _ = shared.signal.wait_until(&mut state, next);
            }
            None => shared.signal.wait(&mut state),
        }
    }
}

/// Registers deadlines with a running [`Timer`].
#[derive(Clone)]
pub(crate) struct TimerHandle {
    shared: Arc<Shared>,
}

impl TimerHandle {
    /// Wakes `waker` once `deadline` has passed.
    pub(crate) fn wake_at(&self, deadline: Instant, waker: &Waker) {
        let mut state = self.shared.state.lock();
        let known = state
            .pending
            .iter()
            .any(|(at, w)| *at == deadline && w.will_wake(waker));
        if known {
            return;
        }
        let earliest = state.pending.iter().all(|(at, _)| deadline < *at);
        state.pending.push((deadline, waker.clone()));
        drop(state);
        if earliest {
            self.shared.signal.notify_one();
        }
    }
}

fn timed_out() -> io::Error {
    io::ErrorKind::TimedOut.into()
}

/// Reads once into `buf`. Returns the number of bytes read, zero at end of
/// stream.
pub(crate) async fn read_until(
    stream: &mut TcpStream,
    buf: &mut [u8],
    deadline: Instant,
    timer: &TimerHandle,
) -> io::Result<usize> {
    poll_fn(|task| {
        if Instant::now() >= deadline {
            return Poll::Ready(Err(timed_out()));
        }
        let mut read_buf = ReadBuf::new(&mut *buf);
        match Pin::new(&mut *stream).poll_read(task, &mut read_buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(read_buf.filled().len())),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => {
                timer.wake_at(deadline, task.waker());
                Poll::Pending
            }
        }
    })
    .await
}

/// Writes all of `buf` and flushes.
pub(crate) async fn write_all_until(
    stream: &mut TcpStream,
    mut buf: &[u8],
    deadline: Instant,
    timer: &TimerHandle,
) -> io::Result<()> {
    while !buf.is_empty() {
        let written = poll_fn(|task| {
            if Instant::now() >= deadline {
                return Poll::Ready(Err(timed_out()));
            }
            let polled = Pin::new(&mut *stream).poll_write(task, buf);
            if polled.is_pending() {
                timer.wake_at(deadline, task.waker());
            }
            polled
        })
        .await?;
        if written == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "write zero"));
        }
        buf = &buf[written..];
    }
    poll_fn(|task| {
        if Instant::now() >= deadline {
            return Poll::Ready(Err(timed_out()));
        }
        let polled = Pin::new(&mut *stream).poll_flush(task);
        if polled.is_pending() {
            timer.wake_at(deadline, task.waker());
        }
        polled
    })
    .await
}
