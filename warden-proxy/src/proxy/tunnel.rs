//! Byte-counting bidirectional relay

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved so far in each direction
#[derive(Debug, Default)]
pub struct ByteCounters {
    up: AtomicU64,
    down: AtomicU64,
}

impl ByteCounters {
    pub fn add_up(&self, n: u64) {
        self.up.fetch_add(n, Ordering::Relaxed);
    }

    pub fn up(&self) -> u64 {
        self.up.load(Ordering::Relaxed)
    }

    pub fn down(&self) -> u64 {
        self.down.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.up() + self.down()
    }
}

/// Copy until EOF or error, counting bytes as they are read. The writer is
/// shut down afterwards so the peer sees the half-close.
async fn copy_counting<R, W>(mut reader: R, mut writer: W, counter: &AtomicU64)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Relay read error: {}", e);
                break;
            }
        };
        counter.fetch_add(n as u64, Ordering::Relaxed);
        if let Err(e) = writer.write_all(&buf[..n]).await {
            debug!("Relay write error: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Relay between `client` and `upstream` until both directions finish.
///
/// `on_first_close` runs exactly once, as soon as either direction ends,
/// with the counters as they stand at that moment. The other direction keeps
/// running afterwards. Relay errors end a direction and are otherwise ignored.
pub async fn relay<F, Fut>(
    client: TcpStream,
    upstream: TcpStream,
    counters: &ByteCounters,
    on_first_close: F,
) where
    F: FnOnce(u64, u64) -> Fut,
    Fut: Future<Output = ()>,
{
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let up = copy_counting(client_read, upstream_write, &counters.up);
    let down = copy_counting(upstream_read, client_write, &counters.down);
    tokio::pin!(up);
    tokio::pin!(down);

    tokio::select! {
        _ = &mut up => {
            on_first_close(counters.up(), counters.down()).await;
            down.await;
        }
        _ = &mut down => {
            on_first_close(counters.up(), counters.down()).await;
            up.await;
        }
    }
}
