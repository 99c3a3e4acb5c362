//! Idle-timeout stream wrapper.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

/// Parked-task wakers for the two halves of a split stream.
///
/// The idle timer is always polled through this via [`Wake`], so expiry
/// wakes whichever halves are parked regardless of which half polled
/// the timer last. A half that departs (EOF, error) clears its slot so
/// stale wakers never swallow the expiry.
struct WakerSlots {
    read: Mutex<Option<Waker>>,
    write: Mutex<Option<Waker>>,
}

impl WakerSlots {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            read: Mutex::new(None),
            write: Mutex::new(None),
        })
    }

    fn lock(slot: &Mutex<Option<Waker>>) -> std::sync::MutexGuard<'_, Option<Waker>> {
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_read(&self, waker: &Waker) {
        *Self::lock(&self.read) = Some(waker.clone());
    }

    fn store_write(&self, waker: &Waker) {
        *Self::lock(&self.write) = Some(waker.clone());
    }

    fn clear_read(&self) {
        Self::lock(&self.read).take();
    }

    fn clear_write(&self) {
        Self::lock(&self.write).take();
    }

    fn wake_both(&self) {
        if let Some(waker) = Self::lock(&self.read).take() {
            waker.wake();
        }
        if let Some(waker) = Self::lock(&self.write).take() {
            waker.wake();
        }
    }
}

impl Wake for WakerSlots {
    fn wake(self: Arc<Self>) {
        self.wake_both();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wake_both();
    }
}

/// Wraps a bidirectional stream and enforces an idle timeout.
///
/// Every successful read or write of at least one byte pushes the
/// deadline out by the configured duration. Once the deadline elapses
/// with no activity, the inner stream is shut down and every in-flight
/// or subsequent operation fails with [`io::ErrorKind::TimedOut`], so
/// idleness surfaces as an ordinary I/O error to the relay.
///
/// Sessions split the wrapper into read/write halves that live in
/// different tasks, and the timer itself can only hold one waker. Every
/// operation therefore parks its task waker in [`WakerSlots`] and polls
/// the timer through a waker built from those slots: when the deadline
/// fires, both parked halves are woken, re-poll, observe expiry, and
/// fail — even if the half that last touched the timer is long gone.
pub struct IdleStream<S> {
    inner: S,
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
    expired: bool,
    slots: Arc<WakerSlots>,
}

impl<S> IdleStream<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            deadline: Box::pin(sleep(timeout)),
            expired: false,
            slots: WakerSlots::new(),
        }
    }

    fn touch(&mut self) {
        self.deadline.as_mut().reset(Instant::now() + self.timeout);
    }

    fn timed_out() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "stream idle timeout")
    }
}

impl<S> IdleStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Mark the stream dead: best-effort shutdown of the inner stream
    /// plus a wake for both parked halves.
    fn expire(&mut self, cx: &mut Context<'_>) {
        self.expired = true;
        // A FIN now beats waiting for the owner to drop the stream.
        let _ = Pin::new(&mut self.inner).poll_shutdown(cx);
        self.slots.wake_both();
    }

    /// Poll the deadline through the shared slots waker.
    fn poll_expiry(&mut self, cx: &mut Context<'_>) -> bool {
        if self.expired {
            return true;
        }
        let timer_waker = Waker::from(self.slots.clone());
        let mut timer_cx = Context::from_waker(&timer_waker);
        if self.deadline.as_mut().poll(&mut timer_cx).is_ready() {
            self.expire(cx);
            return true;
        }
        false
    }
}

impl<S> AsyncRead for IdleStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.slots.store_read(cx.waker());
        if this.poll_expiry(cx) {
            return Poll::Ready(Err(Self::timed_out()));
        }
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if buf.filled().len() > before {
                    this.touch();
                }
                this.slots.clear_read();
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.slots.clear_read();
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> AsyncWrite for IdleStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.slots.store_write(cx.waker());
        if this.poll_expiry(cx) {
            return Poll::Ready(Err(Self::timed_out()));
        }
        match Pin::new(&mut this.inner).poll_write(cx, data) {
            Poll::Ready(Ok(n)) => {
                if n > 0 {
                    this.touch();
                }
                this.slots.clear_write();
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => {
                this.slots.clear_write();
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.slots.store_write(cx.waker());
        if this.poll_expiry(cx) {
            return Poll::Ready(Err(Self::timed_out()));
        }
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.slots.clear_write();
                Poll::Ready(result)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Shutdown stays allowed after expiry; it is how the wrapper
        // releases the inner stream.
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
