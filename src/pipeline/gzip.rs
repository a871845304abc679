use std::io::Write;

use bytes::Bytes;
use flate2::{write::GzDecoder, write::GzEncoder, Compression};
use futures::StreamExt;

use super::ByteStream;

/// Gzip-compresses the stream. Output produced so far is drained after
/// every input chunk; the trailer is flushed at end of stream, so even an
/// empty input yields a valid gzip member.
pub fn compress(stream: ByteStream) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let mut stream = stream;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            encoder.write_all(&chunk)?;
            if !encoder.get_ref().is_empty() {
                yield Bytes::from(std::mem::take(encoder.get_mut()));
            }
        }
        yield Bytes::from(encoder.finish()?);
    })
}

/// Inverse of [`compress`]. A truncated or corrupt gzip stream surfaces
/// as an error when the final chunk fails to complete the member.
pub fn decompress(stream: ByteStream) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let mut stream = stream;
        let mut decoder = GzDecoder::new(Vec::new());
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            decoder.write_all(&chunk)?;
            if !decoder.get_ref().is_empty() {
                yield Bytes::from(std::mem::take(decoder.get_mut()));
            }
        }
        yield Bytes::from(decoder.finish()?);
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use futures::stream;

    use super::*;

    async fn collect(mut stream: ByteStream) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn chunked(data: &[u8], chunk_size: usize) -> ByteStream {
        let chunks: Vec<Result<Bytes>> = data
            .chunks(chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::pin(stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_round_trip_empty() {
        let zipped = collect(compress(chunked(b"", 1))).await.unwrap();
        assert!(!zipped.is_empty());
        let raw = collect(decompress(chunked(&zipped, 3))).await.unwrap();
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_large_input_across_chunk_boundaries() {
        let payload: Vec<u8> = (0..3_000_000u32).map(|i| (i % 97) as u8).collect();
        let zipped = collect(compress(chunked(&payload, 128 * 1024))).await.unwrap();
        assert!(zipped.len() < payload.len());
        let raw = collect(decompress(chunked(&zipped, 4097))).await.unwrap();
        assert_eq!(raw, payload);
    }

    #[tokio::test]
    async fn test_truncated_stream_fails() {
        let zipped = collect(compress(chunked(b"hello world", 4))).await.unwrap();
        let truncated = &zipped[..zipped.len() - 5];
        assert!(collect(decompress(chunked(truncated, 3))).await.is_err());
    }
}
