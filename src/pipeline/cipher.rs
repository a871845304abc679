use anyhow::{anyhow, bail, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use futures::StreamExt;
use hkdf::Hkdf;
use sha2::Sha256;

use super::ByteStream;

const NONCE_LEN: usize = 12;
const LEN_PREFIX: usize = 4;
const TAG_LEN: usize = 16;
// Upper bound on a single sealed frame; anything larger on the decrypt
// side means the input is not our framing.
const MAX_FRAME: usize = 16 * 1024 * 1024;
// Largest plaintext sealed per frame; the tag keeps the resulting
// ciphertext within the frame bound.
const MAX_PLAINTEXT: usize = MAX_FRAME - TAG_LEN;

/// Per-object content key: HKDF-SHA256 keyed by the configured secret,
/// expanded with the version id and bucket name. Every stored object is
/// encrypted under a distinct key derivable only from all three inputs.
pub fn derive_key(secret: &str, asset_id: &str, bucket: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
    let info = format!("{}{}", asset_id, bucket);
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .expect("32 bytes is a valid hkdf-sha256 output length");
    okm
}

// The nonce is a frame counter. Safe because the key is unique per
// object, so (key, nonce) pairs never repeat.
fn frame_nonce(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[NONCE_LEN - 8..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Seals each input chunk as ChaCha20-Poly1305 frames: a big-endian
/// `u32` ciphertext length followed by the ciphertext. Chunks larger
/// than the frame bound are split before sealing so every emitted frame
/// can be opened again; empty chunks are skipped, so the framing never
/// emits zero-length frames.
pub fn encrypt(stream: ByteStream, key: [u8; 32]) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let mut stream = stream;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let mut counter: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for part in chunk.chunks(MAX_PLAINTEXT) {
                let nonce = frame_nonce(counter);
                let ciphertext = cipher
                    .encrypt(Nonce::from_slice(&nonce), part)
                    .map_err(|_| anyhow!("failed to seal frame {}", counter))?;
                counter += 1;
                let mut frame = BytesMut::with_capacity(LEN_PREFIX + ciphertext.len());
                frame.put_u32(ciphertext.len() as u32);
                frame.extend_from_slice(&ciphertext);
                yield frame.freeze();
            }
        }
    })
}

/// Inverse of [`encrypt`]. Frames are reassembled from arbitrary chunk
/// boundaries; authentication failure or a truncated trailing frame
/// surfaces as an error.
pub fn decrypt(stream: ByteStream, key: [u8; 32]) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let mut stream = stream;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let mut counter: u64 = 0;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
            while let Some(frame) = take_frame(&mut buf)? {
                let nonce = frame_nonce(counter);
                let plaintext = cipher
                    .decrypt(Nonce::from_slice(&nonce), frame.as_ref())
                    .map_err(|_| anyhow!("failed to open frame {}", counter))?;
                counter += 1;
                yield Bytes::from(plaintext);
            }
        }
        if !buf.is_empty() {
            Err(anyhow!(
                "truncated ciphertext: {} bytes left after frame {}",
                buf.len(),
                counter
            ))?;
        }
    })
}

fn take_frame(buf: &mut BytesMut) -> Result<Option<Bytes>> {
    if buf.len() < LEN_PREFIX {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME {
        bail!("frame length {} exceeds limit", len);
    }
    if buf.len() < LEN_PREFIX + len {
        return Ok(None);
    }
    buf.advance(LEN_PREFIX);
    Ok(Some(buf.split_to(len).freeze()))
}

#[cfg(test)]
mod tests {
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

    #[test]
    fn test_derived_keys_differ_per_object() {
        let a = derive_key("secret", "0000000000000001", "foo");
        let b = derive_key("secret", "0000000000000002", "foo");
        let c = derive_key("secret", "0000000000000001", "bar");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, derive_key("secret", "0000000000000001", "foo"));
    }

    #[tokio::test]
    async fn test_round_trip_with_rechunked_frames() {
        let key = derive_key("secret", "0000000000000001", "foo");
        let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i % 53) as u8).collect();

        let sealed = collect(encrypt(chunked(&payload, 64 * 1024), key))
            .await
            .unwrap();
        assert!(sealed.len() > payload.len());

        // frames arrive split across arbitrary chunk boundaries
        for read_size in [1usize, 13, 4096, 1 << 20] {
            let opened = collect(decrypt(chunked(&sealed, read_size), key))
                .await
                .unwrap();
            assert_eq!(opened, payload);
        }
    }

    #[tokio::test]
    async fn test_oversized_chunk_is_split_into_readable_frames() {
        let key = derive_key("secret", "0000000000000001", "foo");
        let payload = vec![7u8; MAX_FRAME + 3];

        // single input chunk above the frame bound
        let sealed = collect(encrypt(chunked(&payload, payload.len()), key))
            .await
            .unwrap();
        let opened = collect(decrypt(chunked(&sealed, 1 << 20), key))
            .await
            .unwrap();
        assert_eq!(opened, payload);
    }

    #[tokio::test]
    async fn test_empty_stream_round_trip() {
        let key = derive_key("secret", "0000000000000001", "foo");
        let sealed = collect(encrypt(chunked(b"", 1), key)).await.unwrap();
        assert!(sealed.is_empty());
        let opened = collect(decrypt(chunked(&sealed, 1), key)).await.unwrap();
        assert!(opened.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_key_fails_authentication() {
        let key = derive_key("secret", "0000000000000001", "foo");
        let sealed = collect(encrypt(chunked(b"payload", 3), key)).await.unwrap();
        let wrong = derive_key("other-secret", "0000000000000001", "foo");
        assert!(collect(decrypt(chunked(&sealed, 5), wrong)).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_trailing_frame_fails() {
        let key = derive_key("secret", "0000000000000001", "foo");
        let sealed = collect(encrypt(chunked(b"payload", 7), key)).await.unwrap();
        let truncated = &sealed[..sealed.len() - 1];
        assert!(collect(decrypt(chunked(truncated, 4), key)).await.is_err());
    }
}
