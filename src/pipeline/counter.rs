use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::StreamExt;

use super::ByteStream;

/// Pass-through stage accumulating the number of bytes that flowed
/// through it. Counts the actual chunks on the wire at this point in the
/// chain, not an estimate.
pub fn count_bytes(stream: ByteStream, counter: Arc<AtomicU64>) -> ByteStream {
    stream
        .map(move |chunk| {
            chunk.map(|bytes| {
                counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                bytes
            })
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use bytes::Bytes;
    use futures::stream;

    use super::*;

    #[tokio::test]
    async fn test_counts_and_forwards_unchanged() {
        let counter = Arc::new(AtomicU64::new(0));
        let source: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"defgh")),
        ]));

        let chunks: Vec<Result<Bytes>> = count_bytes(source, counter.clone()).collect().await;
        let forwarded: Vec<u8> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().to_vec())
            .collect();
        assert_eq!(forwarded, b"abcdefgh");
        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }
}
