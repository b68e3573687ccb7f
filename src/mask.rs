//! The rolling XOR key used by `RGSSAD` archives.
//!
//! Every field of the header table and every entry body is masked with a 32-bit
//! key that advances as `key * 7 + 3` after each consumed word. [`MagicKey`] is a
//! plain value, so two readers never share state: an entry stores the key that was
//! current at the start of its body and can be decrypted in isolation.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MagicKey(u32);

impl MagicKey {
    /// Starting key of XP and VX archives.
    pub const XP_VX: MagicKey = MagicKey(0xDEADCAFE);

    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Derives the header key of a VX Ace archive from the seed stored after its signature.
    pub const fn from_vxace_seed(seed: u32) -> Self {
        Self(seed.wrapping_mul(9).wrapping_add(3))
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn advance(self) -> Self {
        Self(self.0.wrapping_mul(7).wrapping_add(3))
    }

    pub const fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// XORs `data` with the key stream in place and returns the key that follows it.
    ///
    /// The key advances after every complete 4-byte word. A trailing partial word
    /// only consumes the low bytes of the current key and leaves it unadvanced.
    /// Applying the same key twice restores the input.
    #[must_use]
    pub fn apply(self, data: &mut [u8]) -> Self {
        let mut key: MagicKey = self;

        for chunk in data.chunks_mut(4) {
            let key_bytes: [u8; 4] = key.to_le_bytes();

            for (byte, mask) in chunk.iter_mut().zip(key_bytes) {
                *byte ^= mask;
            }

            if chunk.len() == 4 {
                key = key.advance();
            }
        }

        key
    }

    /// Returns the first `len` mask bytes and the key that follows them.
    pub fn keystream(self, len: usize) -> (Vec<u8>, Self) {
        let mut stream: Vec<u8> = vec![0; len];
        let next: MagicKey = self.apply(&mut stream);
        (stream, next)
    }

    /// Unmasks a header integer. XP/VX archives advance the key after each field, VX Ace ones don't.
    pub(crate) fn decrypt_u32(&mut self, value: u32, advance: bool) -> u32 {
        let result: u32 = value ^ self.0;

        if advance {
            *self = self.advance();
        }

        result
    }

    /// XP/VX filenames: every byte is masked with the low byte of the key, which advances per byte.
    pub(crate) fn decrypt_name_rolling(&mut self, name: &[u8]) -> Vec<u8> {
        name.iter()
            .map(|byte: &u8| {
                let decrypted: u8 = byte ^ (self.0 & 0xFF) as u8;
                *self = self.advance();
                decrypted
            })
            .collect()
    }

    /// VX Ace filenames: the four key bytes repeat without advancing.
    pub(crate) fn decrypt_name_cyclic(self, name: &[u8]) -> Vec<u8> {
        let key_bytes: [u8; 4] = self.to_le_bytes();

        name.iter()
            .zip(key_bytes.iter().cycle())
            .map(|(byte, mask)| byte ^ mask)
            .collect()
    }
}

impl From<u32> for MagicKey {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_matches_rgss_rule() {
        let key = MagicKey::new(0xDEADCAFE).advance();
        assert_eq!(key.value(), 0xDEADCAFEu32.wrapping_mul(7).wrapping_add(3));
    }

    #[test]
    fn vxace_seed_uses_its_own_multiplier() {
        assert_eq!(MagicKey::from_vxace_seed(1).value(), 12);
        assert_eq!(MagicKey::from_vxace_seed(0).value(), 3);
    }

    #[test]
    fn apply_masks_words_little_endian() {
        let key = MagicKey::new(0x0403_0201);
        let mut data = [0u8; 6];
        let next = key.apply(&mut data);

        let second = key.advance().to_le_bytes();
        assert_eq!(&data[..4], &[1, 2, 3, 4]);
        assert_eq!(&data[4..], &second[..2]);
        assert_eq!(next, key.advance());
    }

    #[test]
    fn full_word_advances_partial_does_not() {
        let key = MagicKey::XP_VX;
        assert_eq!(key.apply(&mut [0u8; 4]), key.advance());
        assert_eq!(key.apply(&mut [0u8; 3]), key);
        assert_eq!(key.apply(&mut []), key);
    }

    #[test]
    fn keystream_matches_apply() {
        let key = MagicKey::new(0xDEADBEEF);
        let (stream, next) = key.keystream(9);

        let mut data = [0u8; 9];
        assert_eq!(key.apply(&mut data), next);
        assert_eq!(stream, data);
    }

    #[test]
    fn partial_lengths_decode() {
        for len in [1usize, 3, 5, 4097] {
            let plain: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let mut data = plain.clone();

            let _ = MagicKey::new(0x1234_5678).apply(&mut data);
            assert_ne!(data, plain, "length {len}");

            let _ = MagicKey::new(0x1234_5678).apply(&mut data);
            assert_eq!(data, plain, "length {len}");
        }
    }

    #[test]
    fn rolling_name_advances_per_byte() {
        let mut key = MagicKey::XP_VX;
        let masked: Vec<u8> = {
            let mut k = MagicKey::XP_VX;
            b"ab".iter()
                .map(|b| {
                    let m = b ^ (k.value() & 0xFF) as u8;
                    k = k.advance();
                    m
                })
                .collect()
        };

        assert_eq!(key.decrypt_name_rolling(&masked), b"ab");
        assert_eq!(key, MagicKey::XP_VX.advance().advance());
    }

    #[test]
    fn cyclic_name_repeats_key_bytes() {
        let key = MagicKey::new(0x0403_0201);
        assert_eq!(key.decrypt_name_cyclic(&[0; 6]), vec![1, 2, 3, 4, 1, 2]);
    }
}
