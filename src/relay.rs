//! One-directional relay copy.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Copy bytes from `reader` to `writer` until end-of-stream or error.
///
/// Clean EOF shuts the writer down so half-close propagates to the peer.
/// Returns the byte count on EOF; a terminating error (idle timeout,
/// reset, broken pipe) is returned for the caller to log — it ends the
/// direction the same way EOF does and is never retried.
pub async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    buffer_size: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        total += n as u64;
    }
    writer.shutdown().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn copies_until_eof_and_half_closes() {
        let (mut src, src_relay_end) = duplex(64);
        let (dst_relay_end, mut dst) = duplex(64);

        let copy = tokio::spawn(copy_direction(src_relay_end, dst_relay_end, 16));

        src.write_all(b"hello").await.unwrap();
        src.write_all(b" world").await.unwrap();
        src.shutdown().await.unwrap();

        // read_to_end returns only once the copy shuts the sink down.
        let mut got = Vec::new();
        dst.read_to_end(&mut got).await.unwrap();
        assert_eq!(&got, b"hello world");
        assert_eq!(copy.await.unwrap().unwrap(), 11);
    }

    #[tokio::test]
    async fn write_error_terminates_the_copy() {
        let (mut src, src_relay_end) = duplex(64);
        let (dst_relay_end, dst) = duplex(64);
        drop(dst);

        src.write_all(b"data").await.unwrap();
        let err = copy_direction(src_relay_end, dst_relay_end, 16)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
