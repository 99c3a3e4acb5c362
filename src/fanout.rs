//! Replicating write sink for multi-target relaying.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;
use tracing::debug;

/// One fan-out member.
struct Sink<W> {
    writer: W,
    label: String,
    /// Progress into the staged chunk.
    written: usize,
    shut: bool,
    /// A dead sink stopped accepting writes and is skipped from then on.
    dead: bool,
}

/// `AsyncWrite` that duplicates every write to all live sinks.
///
/// The first sink is the primary: its errors fail the write. A secondary
/// that errors is marked dead, logged, and dropped from replication while
/// the rest continue — one failing member never stalls the others.
///
/// Each incoming chunk is staged in an internal buffer and drained to
/// every live sink before the write completes, so sinks that accept
/// different amounts per poll still observe identical byte streams.
pub struct FanoutWriter<W> {
    sinks: Vec<Sink<W>>,
    staged: Vec<u8>,
}

impl<W> FanoutWriter<W> {
    /// Build a fan-out over `(label, writer)` pairs, primary first.
    pub fn new(writers: Vec<(String, W)>) -> Self {
        let sinks = writers
            .into_iter()
            .map(|(label, writer)| Sink {
                writer,
                label,
                written: 0,
                shut: false,
                dead: false,
            })
            .collect();
        Self {
            sinks,
            staged: Vec::new(),
        }
    }

    /// Sinks still accepting writes.
    pub fn live_sinks(&self) -> usize {
        self.sinks.iter().filter(|s| !s.dead).count()
    }
}

impl<W> FanoutWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Drive the staged chunk toward all live sinks. Ready once every
    /// live sink holds the full chunk.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let len = self.staged.len();
        let mut pending = false;
        for (idx, sink) in self.sinks.iter_mut().enumerate() {
            if sink.dead {
                continue;
            }
            while sink.written < len {
                match Pin::new(&mut sink.writer).poll_write(cx, &self.staged[sink.written..]) {
                    Poll::Ready(Ok(0)) => {
                        let err = io::Error::new(
                            io::ErrorKind::WriteZero,
                            "fan-out sink stopped accepting bytes",
                        );
                        if idx == 0 {
                            return Poll::Ready(Err(err));
                        }
                        debug!(target = %sink.label, error = %err, "dropping dead fan-out target");
                        sink.dead = true;
                        break;
                    }
                    Poll::Ready(Ok(n)) => sink.written += n,
                    Poll::Ready(Err(e)) => {
                        if idx == 0 {
                            return Poll::Ready(Err(e));
                        }
                        debug!(target = %sink.label, error = %e, "dropping dead fan-out target");
                        sink.dead = true;
                        break;
                    }
                    Poll::Pending => {
                        pending = true;
                        break;
                    }
                }
            }
        }
        if pending {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }
}

impl<W> AsyncWrite for FanoutWriter<W>
where
    W: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.staged.is_empty() {
            if data.is_empty() {
                return Poll::Ready(Ok(0));
            }
            this.staged.extend_from_slice(data);
            for sink in &mut this.sinks {
                sink.written = 0;
            }
        }
        match this.poll_drain(cx) {
            Poll::Ready(Ok(())) => {
                let n = this.staged.len();
                this.staged.clear();
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.staged.is_empty() {
            match this.poll_drain(cx) {
                Poll::Ready(Ok(())) => {}
                other => return other,
            }
        }
        let mut pending = false;
        for (idx, sink) in this.sinks.iter_mut().enumerate() {
            if sink.dead {
                continue;
            }
            match Pin::new(&mut sink.writer).poll_flush(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => {
                    if idx == 0 {
                        return Poll::Ready(Err(e));
                    }
                    debug!(target = %sink.label, error = %e, "dropping dead fan-out target");
                    sink.dead = true;
                }
                Poll::Pending => pending = true,
            }
        }
        if pending {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.staged.is_empty() {
            match this.poll_drain(cx) {
                Poll::Ready(Ok(())) => {}
                other => return other,
            }
        }
        let mut pending = false;
        for (idx, sink) in this.sinks.iter_mut().enumerate() {
            if sink.dead || sink.shut {
                continue;
            }
            match Pin::new(&mut sink.writer).poll_shutdown(cx) {
                Poll::Ready(Ok(())) => sink.shut = true,
                Poll::Ready(Err(e)) => {
                    sink.shut = true;
                    if idx == 0 {
                        return Poll::Ready(Err(e));
                    }
                    debug!(target = %sink.label, error = %e, "fan-out target shutdown failed");
                }
                Poll::Pending => pending = true,
            }
        }
        if pending {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn replicates_to_every_sink() {
        let (primary_in, mut primary_out) = duplex(256);
        let (s1_in, mut s1_out) = duplex(256);
        let (s2_in, mut s2_out) = duplex(256);

        let mut fan = FanoutWriter::new(vec![
            ("primary".into(), primary_in),
            ("s1".into(), s1_in),
            ("s2".into(), s2_in),
        ]);
        fan.write_all(b"hello fan-out").await.unwrap();
        fan.flush().await.unwrap();

        let mut buf = [0u8; 32];
        for out in [&mut primary_out, &mut s1_out, &mut s2_out] {
            let n = out.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"hello fan-out");
        }
    }

    #[tokio::test]
    async fn dead_secondary_does_not_stop_the_rest() {
        let (primary_in, mut primary_out) = duplex(256);
        let (secondary_in, secondary_out) = duplex(256);
        drop(secondary_out); // secondary hangs up

        let mut fan = FanoutWriter::new(vec![
            ("primary".into(), primary_in),
            ("secondary".into(), secondary_in),
        ]);
        fan.write_all(b"abc").await.unwrap();
        assert_eq!(fan.live_sinks(), 1);
        fan.write_all(b"def").await.unwrap();
        fan.flush().await.unwrap();

        let mut got = Vec::new();
        let mut buf = [0u8; 16];
        while got.len() < 6 {
            let n = primary_out.read(&mut buf).await.unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(&got, b"abcdef");
    }

    #[tokio::test]
    async fn primary_error_fails_the_write() {
        let (primary_in, primary_out) = duplex(256);
        drop(primary_out);
        let (secondary_in, _secondary_out) = duplex(256);

        let mut fan = FanoutWriter::new(vec![
            ("primary".into(), primary_in),
            ("secondary".into(), secondary_in),
        ]);
        assert!(fan.write_all(b"abc").await.is_err());
    }

    #[tokio::test]
    async fn slow_sink_sees_identical_stream() {
        // 8-byte duplex forces partial writes on one sink.
        let (slow_in, mut slow_out) = duplex(8);
        let (fast_in, mut fast_out) = duplex(1024);

        let mut fan =
            FanoutWriter::new(vec![("slow".into(), slow_in), ("fast".into(), fast_in)]);
        let payload: Vec<u8> = (0..64u8).collect();
        let to_send = payload.clone();
        let writer = tokio::spawn(async move {
            fan.write_all(&to_send).await.unwrap();
            fan.shutdown().await.unwrap();
        });

        let mut slow_got = Vec::new();
        slow_out.read_to_end(&mut slow_got).await.unwrap();
        let mut fast_got = Vec::new();
        fast_out.read_to_end(&mut fast_got).await.unwrap();
        writer.await.unwrap();

        assert_eq!(slow_got, payload);
        assert_eq!(fast_got, payload);
    }
}
