//! Encoding and decoding of the primitive wire types.
//!
//! All multi-byte fields use the connection's fixed byte order, which is
//! the host's native order (both ends of the socket run on the same
//! machine).

use std::{
    borrow::Cow,
    io::{Cursor, Write},
};

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use paste::paste;
use thiserror::Error;

use crate::wire::fixed::Fixed;

/// Byte order used on the wire.
type Order = NativeEndian;

/// A unique object id. Id 0 is reserved as the wire representation of a
/// null object reference and is never assigned to a live object.
pub type ObjectId = u32;

/// The size of a wire type that is known at compile time.
///
/// Types whose encoded size depends on their value implement only
/// [`MessageSize`].
pub trait CompileTimeMessageSize: MessageSize {
    /// Encoded size of this type in bytes, before word padding.
    const SIZE: usize = size_of::<Self>();
}

/// The size of a wire type as determined from a value at runtime.
pub trait MessageSize: Sized {
    /// Returns the encoded size of this value in bytes, before word
    /// padding.
    fn size(&self) -> usize {
        size_of::<Self>()
    }
}

/// Ensures that the provided data slice is at least as large as the
/// compile-time size of the type `$t`.
#[macro_export]
macro_rules! ensure_size {
    ($data:expr, $t:ident) => {
        if $data.len() < $t::SIZE {
            return Err(SerdeError::Truncated);
        }
    };
}
pub use crate::ensure_size;

/// A type that can be decoded from the wire.
pub trait Decode: MessageSize {
    /// Decodes an instance of this type from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is too short for the encoded value or
    /// the payload is malformed (bad UTF-8, missing NUL terminator).
    fn decode(data: &[u8]) -> Result<Self, SerdeError>;
}

/// A type that can be encoded to the wire.
pub trait Encode: MessageSize {
    /// Encodes this value into the start of `data`, returning the
    /// number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is too short for the encoded value.
    fn encode(&self, data: &mut [u8]) -> Result<usize, SerdeError>;
}

macro_rules! impl_serde {
    ($($type:ty),*) => {
        $(
            impl CompileTimeMessageSize for $type {}
            impl MessageSize for $type {}
            impl Decode for $type {
                fn decode(data: &[u8]) -> Result<Self, SerdeError> {
                    ensure_size!(data, Self);
                    let mut data = Cursor::new(data);
                    paste! {
                        Ok(data.[<read_ $type>]::<Order>()?)
                    }
                }
            }
            impl Encode for $type {
                fn encode(&self, data: &mut [u8]) -> Result<usize, SerdeError> {
                    ensure_size!(data, Self);
                    let mut data = Cursor::new(data);
                    paste! {
                        data.[<write_ $type>]::<Order>(*self)?;
                    }
                    Ok(Self::SIZE)
                }
            }
        )*
    };
}

impl_serde!(u32, i32);

/// The fixed 8-byte header that starts every message.
///
/// On the wire this is the target object id word followed by a word
/// packing the opcode in the low 16 bits and the total message size
/// (header included) in the high 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// The id of the object the message targets.
    pub object_id: ObjectId,
    /// The request/event opcode, scoped to the target's interface.
    pub opcode: u16,
    /// Total message size in bytes, including this header.
    pub size: u16,
}
impl MessageSize for MessageHeader {}
impl CompileTimeMessageSize for MessageHeader {
    const SIZE: usize = 8;
}
impl Decode for MessageHeader {
    fn decode(data: &[u8]) -> Result<Self, SerdeError> {
        ensure_size!(data, Self);
        let mut data = Cursor::new(data);
        let object_id = data.read_u32::<Order>()?;
        let word = data.read_u32::<Order>()?;
        Ok(Self {
            object_id,
            opcode: (word & 0xffff) as u16,
            size: (word >> 16) as u16,
        })
    }
}
impl Encode for MessageHeader {
    fn encode(&self, data: &mut [u8]) -> Result<usize, SerdeError> {
        ensure_size!(data, Self);
        let mut data = Cursor::new(data);
        data.write_u32::<Order>(self.object_id)?;
        data.write_u32::<Order>((u32::from(self.size) << 16) | u32::from(self.opcode))?;
        Ok(Self::SIZE)
    }
}

impl MessageSize for Fixed {}
impl CompileTimeMessageSize for Fixed {
    const SIZE: usize = 4;
}
impl Decode for Fixed {
    fn decode(data: &[u8]) -> Result<Self, SerdeError> {
        ensure_size!(data, Fixed);
        let mut cursor = Cursor::new(data);
        Ok(Fixed(cursor.read_i32::<Order>()?))
    }
}
impl Encode for Fixed {
    fn encode(&self, data: &mut [u8]) -> Result<usize, SerdeError> {
        ensure_size!(data, Fixed);
        let mut cursor = Cursor::new(data);
        cursor.write_i32::<Order>(self.0)?;
        Ok(Fixed::SIZE)
    }
}

/// A length-prefixed, NUL-terminated UTF-8 string.
///
/// The length prefix counts the terminator; a prefix of zero encodes a
/// null string.
pub struct WlString<'a> {
    /// The string payload, or `None` for a null string.
    pub data: Option<Cow<'a, str>>,
}
impl<'a> WlString<'a> {
    /// Creates a non-null `WlString` from the provided data.
    pub fn new(data: impl Into<Cow<'a, str>>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    /// Creates a null `WlString`.
    #[must_use]
    pub const fn null() -> Self {
        Self { data: None }
    }
}
impl<'a> From<&'a str> for WlString<'a> {
    fn from(value: &'a str) -> Self {
        Self::new(value)
    }
}
impl From<String> for WlString<'_> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl MessageSize for WlString<'_> {
    fn size(&self) -> usize {
        // Length word, then the bytes and their NUL terminator.
        match &self.data {
            Some(data) => 4 + data.len() + 1,
            None => 4,
        }
    }
}
impl Decode for WlString<'_> {
    fn decode(data: &[u8]) -> Result<Self, SerdeError> {
        ensure_size!(data, u32);

        let mut cursor = Cursor::new(data);
        let len = cursor.read_u32::<Order>()? as usize;
        if len == 0 {
            return Ok(Self::null());
        }
        if data.len() < 4 + len {
            return Err(SerdeError::Truncated);
        }

        let payload = &data[4..4 + len];
        if payload.last() != Some(&0) {
            return Err(SerdeError::MissingNulTerminator);
        }
        let text = std::str::from_utf8(&payload[..len - 1])?;

        Ok(Self {
            data: Some(text.to_owned().into()),
        })
    }
}
impl Encode for WlString<'_> {
    fn encode(&self, data: &mut [u8]) -> Result<usize, SerdeError> {
        let size = self.size();
        if data.len() < size {
            return Err(SerdeError::Truncated);
        }

        let mut cursor = Cursor::new(data);
        match &self.data {
            Some(text) => {
                cursor.write_u32::<Order>(text.len() as u32 + 1)?;
                cursor.write_all(text.as_bytes())?;
                cursor.write_u8(0)?;
            }
            None => cursor.write_u32::<Order>(0)?,
        }
        Ok(size)
    }
}

/// A length-prefixed array of raw bytes.
pub struct WlArray<'a> {
    /// The raw byte payload.
    pub data: Cow<'a, [u8]>,
}
impl From<Vec<u8>> for WlArray<'_> {
    fn from(value: Vec<u8>) -> Self {
        Self { data: value.into() }
    }
}
impl<'a> From<&'a [u8]> for WlArray<'a> {
    fn from(value: &'a [u8]) -> Self {
        Self { data: value.into() }
    }
}

impl MessageSize for WlArray<'_> {
    fn size(&self) -> usize {
        4 + self.data.len()
    }
}
impl Decode for WlArray<'_> {
    fn decode(data: &[u8]) -> Result<Self, SerdeError> {
        ensure_size!(data, u32);

        let mut cursor = Cursor::new(data);
        let len = cursor.read_u32::<Order>()? as usize;
        if data.len() < 4 + len {
            return Err(SerdeError::Truncated);
        }

        Ok(Self {
            data: data[4..4 + len].to_owned().into(),
        })
    }
}
impl Encode for WlArray<'_> {
    fn encode(&self, data: &mut [u8]) -> Result<usize, SerdeError> {
        let size = self.size();
        if data.len() < size {
            return Err(SerdeError::Truncated);
        }

        let mut cursor = Cursor::new(data);
        cursor.write_u32::<Order>(self.data.len() as u32)?;
        cursor.write_all(&self.data)?;
        Ok(size)
    }
}

/// Errors that can occur while encoding or decoding wire values.
#[derive(Debug, Error)]
pub enum SerdeError {
    /// The buffer is too short for the expected value.
    #[error("buffer is too short for the expected value")]
    Truncated,
    /// An IO error occurred while reading or writing a cursor.
    #[error("io error while encoding/decoding: {0}")]
    Io(#[from] std::io::Error),
    /// A string payload was not valid UTF-8.
    #[error("string payload is not valid utf-8: {0}")]
    BadUtf8(#[from] std::str::Utf8Error),
    /// A string payload was not NUL-terminated.
    #[error("string payload is missing its nul terminator")]
    MissingNulTerminator,
}
