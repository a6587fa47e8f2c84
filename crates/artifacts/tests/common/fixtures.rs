//! Test fixtures for generating inbound bodies.

use bytes::Bytes;
use depot_artifacts::InboundStream;

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// An inbound body delivering `data` in chunks of at most `chunk_size` bytes.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn body_in_chunks(data: &Bytes, chunk_size: usize) -> InboundStream {
    let chunks: Vec<std::io::Result<Bytes>> = data
        .chunks(chunk_size.max(1))
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(futures::stream::iter(chunks))
}

#[allow(dead_code)]
pub fn body(data: impl Into<Bytes>) -> InboundStream {
    body_in_chunks(&data.into(), 4096)
}

/// A body that yields `prefix` and then fails, like a dropped connection.
#[allow(dead_code)]
pub fn failing_body(prefix: &'static [u8]) -> InboundStream {
    let items: Vec<std::io::Result<Bytes>> = vec![
        Ok(Bytes::from_static(prefix)),
        Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )),
    ];
    Box::pin(futures::stream::iter(items))
}
