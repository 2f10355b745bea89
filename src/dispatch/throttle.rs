//! Bandwidth-capped response delivery.
//!
//! The body is released in 1 KiB chunks, each delayed so that overall
//! elapsed time never undercuts `chunks / kbps` seconds. Pacing cooperates
//! with the runtime clock, so tests drive it with a paused clock.

use axum::body::Bytes;
use futures_util::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::time::Instant;

const CHUNK: usize = 1024;

/// Stream a body at `kbps` KiB per second.
pub fn throttled_stream(
    body: Vec<u8>,
    kbps: u64,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    let start = Instant::now();
    futures_util::stream::unfold(
        (body, 0usize, 0u64),
        move |(body, pos, chunks)| async move {
            if pos >= body.len() {
                return None;
            }
            let chunks = chunks + 1;
            let target = chunks as f64 / kbps.max(1) as f64;
            let elapsed = start.elapsed().as_secs_f64();
            if target > elapsed {
                tokio::time::sleep(Duration::from_secs_f64(target - elapsed)).await;
            }
            let end = (pos + CHUNK).min(body.len());
            let chunk = Bytes::copy_from_slice(&body[pos..end]);
            Some((Ok(chunk), (body, end, chunks)))
        },
    )
}
