//! Payload masking: the XOR stream cipher keyed by a 4-byte key, cycling
//! every 4 bytes. Applying the same key twice restores the original data.

/// Mask/unmask a payload in place.
///
/// Works on whole 32-bit words where possible and falls back to byte-wise
/// XOR for the tail. The word loads and stores use the same native byte
/// order, so the per-byte key alignment is preserved.
#[inline]
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    let key32 = u32::from_ne_bytes(key);

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let mut word = [0u8; 4];
        word.copy_from_slice(chunk);
        let masked = u32::from_ne_bytes(word) ^ key32;
        chunk.copy_from_slice(&masked.to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}
