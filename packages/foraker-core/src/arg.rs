//! The runtime-tagged argument model.
//!
//! Requests and events carry an ordered list of [`Argument`]s validated
//! against a [signature](crate::interface::MessageDesc). File
//! descriptor arguments never appear in the byte payload; they travel
//! over the transport's ancillary side channel and are matched back to
//! their in-band position by argument order.

use std::{
    collections::VecDeque,
    os::fd::{AsRawFd, OwnedFd},
};

use thiserror::Error;

use crate::wire::{
    Fixed, MessageDecoder, MessageEncoder,
    serde::{ObjectId, SerdeError, WlArray, WlString},
};

/// The kind of a single argument, as declared by a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// 32-bit signed integer.
    Int,
    /// 32-bit unsigned integer.
    Uint,
    /// 24.8 fixed point number.
    Fixed,
    /// UTF-8 string, possibly null.
    Str,
    /// Reference to an existing object; 0 encodes a null reference.
    Object,
    /// Id of an object this message creates.
    NewId,
    /// Opaque byte array.
    Array,
    /// File descriptor, transferred out-of-band.
    Fd,
}

/// One decoded or to-be-encoded argument value.
#[derive(Debug)]
pub enum Argument {
    /// 32-bit signed integer.
    Int(i32),
    /// 32-bit unsigned integer.
    Uint(u32),
    /// 24.8 fixed point number.
    Fixed(Fixed),
    /// UTF-8 string, `None` for null.
    Str(Option<String>),
    /// Reference to an existing object; 0 is null.
    Object(ObjectId),
    /// Id of an object this message creates. Pass 0 when marshaling a
    /// constructor; the runtime fills in the allocated id.
    NewId(ObjectId),
    /// Opaque byte array.
    Array(Vec<u8>),
    /// File descriptor. Ownership moves into the message on marshal;
    /// listeners receive it borrowed and may duplicate it to keep it.
    Fd(OwnedFd),
}

impl Argument {
    /// The kind this value belongs to.
    #[must_use]
    pub const fn kind(&self) -> ArgKind {
        match self {
            Self::Int(_) => ArgKind::Int,
            Self::Uint(_) => ArgKind::Uint,
            Self::Fixed(_) => ArgKind::Fixed,
            Self::Str(_) => ArgKind::Str,
            Self::Object(_) => ArgKind::Object,
            Self::NewId(_) => ArgKind::NewId,
            Self::Array(_) => ArgKind::Array,
            Self::Fd(_) => ArgKind::Fd,
        }
    }

    /// The number of bytes this argument occupies in the message body,
    /// padding included. Fd arguments occupy no in-band bytes.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        match self {
            Self::Int(_) | Self::Uint(_) | Self::Fixed(_) | Self::Object(_) | Self::NewId(_) => 4,
            Self::Str(None) => 4,
            Self::Str(Some(s)) => crate::wire::pad_to_32_bits(4 + s.len() + 1),
            Self::Array(a) => crate::wire::pad_to_32_bits(4 + a.len()),
            Self::Fd(_) => 0,
        }
    }
}

impl PartialEq for Argument {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Fixed(a), Self::Fixed(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) | (Self::NewId(a), Self::NewId(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Fd(a), Self::Fd(b)) => a.as_raw_fd() == b.as_raw_fd(),
            _ => false,
        }
    }
}

/// The in-band byte size of a whole argument list.
#[must_use]
pub fn body_size(args: &[Argument]) -> usize {
    args.iter().map(Argument::wire_size).sum()
}

/// Encodes `args` against `signature`, appending in-band words through
/// `encoder` and moving fd arguments into `fds` in argument order.
///
/// # Errors
///
/// Returns [`ArgError::Arity`] or [`ArgError::Signature`] when the list
/// does not match the signature exactly (a programming-error-class
/// failure), or a codec error when the target buffer is too small.
pub fn encode_args(
    args: Vec<Argument>,
    signature: &[ArgKind],
    encoder: &mut MessageEncoder<'_>,
    fds: &mut Vec<OwnedFd>,
) -> Result<(), ArgError> {
    check_signature(&args, signature)?;

    for arg in args {
        match arg {
            Argument::Int(v) => encoder.write(&v)?,
            Argument::Uint(v) | Argument::Object(v) | Argument::NewId(v) => encoder.write(&v)?,
            Argument::Fixed(v) => encoder.write(&v)?,
            Argument::Str(Some(s)) => encoder.write(&WlString::from(s))?,
            Argument::Str(None) => encoder.write(&WlString::null())?,
            Argument::Array(a) => encoder.write(&WlArray::from(a))?,
            Argument::Fd(fd) => fds.push(fd),
        }
    }
    Ok(())
}

/// Decodes an argument list described by `signature`, pulling fd
/// arguments from the side-channel queue in argument order.
///
/// # Errors
///
/// Returns a codec error for a malformed body, or
/// [`ArgError::MissingFd`] when the side channel holds fewer
/// descriptors than the signature requires.
pub fn decode_args(
    signature: &[ArgKind],
    decoder: &mut MessageDecoder<'_>,
    fds: &mut VecDeque<OwnedFd>,
) -> Result<Vec<Argument>, ArgError> {
    let mut args = Vec::with_capacity(signature.len());
    for kind in signature {
        let arg = match kind {
            ArgKind::Int => Argument::Int(decoder.read()?),
            ArgKind::Uint => Argument::Uint(decoder.read()?),
            ArgKind::Fixed => Argument::Fixed(decoder.read()?),
            ArgKind::Str => {
                Argument::Str(decoder.read::<WlString<'_>>()?.data.map(Into::into))
            }
            ArgKind::Object => Argument::Object(decoder.read()?),
            ArgKind::NewId => Argument::NewId(decoder.read()?),
            ArgKind::Array => Argument::Array(decoder.read::<WlArray<'_>>()?.data.into_owned()),
            ArgKind::Fd => Argument::Fd(fds.pop_front().ok_or(ArgError::MissingFd)?),
        };
        args.push(arg);
    }
    Ok(args)
}

fn check_signature(args: &[Argument], signature: &[ArgKind]) -> Result<(), ArgError> {
    if args.len() != signature.len() {
        return Err(ArgError::Arity {
            expected: signature.len(),
            found: args.len(),
        });
    }
    for (index, (arg, kind)) in args.iter().zip(signature).enumerate() {
        if arg.kind() != *kind {
            return Err(ArgError::Signature {
                index,
                expected: *kind,
                found: arg.kind(),
            });
        }
    }
    Ok(())
}

/// Errors raised by the argument codec.
#[derive(Debug, Error)]
pub enum ArgError {
    /// The argument list is shorter or longer than the signature.
    #[error("signature declares {expected} arguments, {found} were supplied")]
    Arity {
        /// Number of arguments the signature declares.
        expected: usize,
        /// Number of arguments supplied.
        found: usize,
    },
    /// An argument's kind does not match the signature.
    #[error("argument {index} should be {expected:?}, got {found:?}")]
    Signature {
        /// Position of the offending argument.
        index: usize,
        /// Kind the signature declares at this position.
        expected: ArgKind,
        /// Kind actually supplied.
        found: ArgKind,
    },
    /// The fd side channel holds fewer descriptors than the signature
    /// requires.
    #[error("message requires a file descriptor the side channel did not deliver")]
    MissingFd,
    /// The message body itself is malformed or the target buffer is too
    /// small.
    #[error(transparent)]
    Serde(#[from] SerdeError),
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, fs::File, os::fd::OwnedFd};

    use super::{ArgError, ArgKind, Argument, body_size, decode_args, encode_args};
    use crate::wire::{Fixed, MessageDecoder, MessageEncoder};

    const SIG: &[ArgKind] = &[
        ArgKind::Int,
        ArgKind::Uint,
        ArgKind::Fixed,
        ArgKind::Str,
        ArgKind::Object,
        ArgKind::Array,
    ];

    fn sample_args() -> Vec<Argument> {
        vec![
            Argument::Int(-42),
            Argument::Uint(7),
            Argument::Fixed(Fixed::from(1.5)),
            Argument::Str(Some("hello".into())),
            Argument::Object(3),
            Argument::Array(vec![9, 8, 7]),
        ]
    }

    #[test]
    fn round_trip() {
        let args = sample_args();
        let size = body_size(&args);

        let mut buf = vec![0u8; size];
        let mut encoder = MessageEncoder::new(&mut buf);
        let mut fds = Vec::new();
        encode_args(sample_args(), SIG, &mut encoder, &mut fds).unwrap();
        assert_eq!(encoder.position() as usize, size);
        assert!(fds.is_empty());

        let mut decoder = MessageDecoder::new(&buf);
        let mut in_fds = VecDeque::new();
        let decoded = decode_args(SIG, &mut decoder, &mut in_fds).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn null_string_round_trip() {
        let sig = &[ArgKind::Str];
        let mut buf = [0u8; 4];
        let mut encoder = MessageEncoder::new(&mut buf);
        encode_args(vec![Argument::Str(None)], sig, &mut encoder, &mut Vec::new()).unwrap();

        let mut decoder = MessageDecoder::new(&buf);
        let decoded = decode_args(sig, &mut decoder, &mut VecDeque::new()).unwrap();
        assert_eq!(decoded, vec![Argument::Str(None)]);
    }

    #[test]
    fn arity_mismatch() {
        let mut buf = [0u8; 16];
        let mut encoder = MessageEncoder::new(&mut buf);
        let err = encode_args(
            vec![Argument::Int(1)],
            &[ArgKind::Int, ArgKind::Uint],
            &mut encoder,
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ArgError::Arity { expected: 2, found: 1 }));
    }

    #[test]
    fn kind_mismatch() {
        let mut buf = [0u8; 16];
        let mut encoder = MessageEncoder::new(&mut buf);
        let err = encode_args(
            vec![Argument::Uint(1)],
            &[ArgKind::Int],
            &mut encoder,
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ArgError::Signature {
                index: 0,
                expected: ArgKind::Int,
                found: ArgKind::Uint,
            }
        ));
    }

    #[test]
    fn fds_ride_the_side_channel() {
        let fd = OwnedFd::from(File::open("/dev/null").unwrap());
        let sig = &[ArgKind::Uint, ArgKind::Fd];

        let mut buf = [0u8; 4];
        let mut encoder = MessageEncoder::new(&mut buf);
        let mut out_fds = Vec::new();
        encode_args(
            vec![Argument::Uint(5), Argument::Fd(fd)],
            sig,
            &mut encoder,
            &mut out_fds,
        )
        .unwrap();

        // The fd occupies no in-band bytes.
        assert_eq!(encoder.position(), 4);
        assert_eq!(out_fds.len(), 1);

        let mut decoder = MessageDecoder::new(&buf);
        let mut in_fds: VecDeque<OwnedFd> = out_fds.into_iter().collect();
        let decoded = decode_args(sig, &mut decoder, &mut in_fds).unwrap();
        assert_eq!(decoded[0], Argument::Uint(5));
        assert!(matches!(decoded[1], Argument::Fd(_)));
    }

    #[test]
    fn missing_fd() {
        let mut decoder = MessageDecoder::new(&[]);
        let err = decode_args(&[ArgKind::Fd], &mut decoder, &mut VecDeque::new()).unwrap_err();
        assert!(matches!(err, ArgError::MissingFd));
    }
}
