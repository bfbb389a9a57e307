//! The binary message format.
//!
//! Every message is an 8-byte header followed by signature-defined
//! argument words; each argument occupies a whole number of 32-bit
//! words regardless of its natural size, so a message can be parsed
//! from the header plus signature knowledge alone.

use std::io::Cursor;

pub mod fixed;
pub mod serde;

pub use fixed::Fixed;

/// The largest message either side may send, header included.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Pads the given position to the next multiple of 4 bytes (32 bits).
#[must_use]
pub const fn pad_to_32_bits(pos: usize) -> usize {
    (pos + 3) & !3
}

/// A reader over an encoded message body that advances to the next
/// 32-bit word boundary after every value.
pub struct MessageDecoder<'a> {
    data: Cursor<&'a [u8]>,
}
impl<'a> MessageDecoder<'a> {
    /// Creates a new `MessageDecoder` over the given byte slice.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self {
            data: Cursor::new(data),
        }
    }

    /// Reads a value of type `T` from the current position.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails. See [`Decode::decode`](serde::Decode::decode).
    pub fn read<T: serde::Decode>(&mut self) -> Result<T, serde::SerdeError> {
        let pos = self.data.position() as usize;
        let data = &self.data.get_ref()[pos..];

        let result = T::decode(data)?;
        self.data
            .set_position(pad_to_32_bits(pos + result.size()) as u64);
        Ok(result)
    }

    /// Returns the current position in the byte buffer.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.data.position()
    }

}

/// A writer producing an encoded message that advances to the next
/// 32-bit word boundary after every value.
pub struct MessageEncoder<'a> {
    data: Cursor<&'a mut [u8]>,
}
impl<'a> MessageEncoder<'a> {
    /// Creates a new `MessageEncoder` over the given mutable byte slice.
    pub const fn new(data: &'a mut [u8]) -> Self {
        Self {
            data: Cursor::new(data),
        }
    }

    /// Writes a value of type `T` at the current position.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails. See [`Encode::encode`](serde::Encode::encode).
    pub fn write<T: serde::Encode>(&mut self, value: &T) -> Result<(), serde::SerdeError> {
        let pos = self.data.position() as usize;
        let data = &mut self.data.get_mut()[pos..];

        value.encode(data)?;
        self.data
            .set_position(pad_to_32_bits(pos + value.size()) as u64);
        Ok(())
    }

    /// Returns the number of bytes written so far, including padding.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.data.position()
    }
}
