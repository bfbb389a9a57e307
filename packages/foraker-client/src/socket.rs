//! Non-blocking unix socket I/O with file descriptor passing.
//!
//! File-descriptor-typed arguments never appear in the byte payload;
//! they travel as `SCM_RIGHTS` ancillary data alongside the bytes of
//! the message that carries them.

use std::{
    collections::VecDeque,
    io::{self, IoSlice, IoSliceMut},
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
};

use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, poll},
    sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg},
};

/// The most fds one message may carry, matching the ancillary buffer
/// the peer reserves.
const MAX_FDS_IN: usize = 28;

/// The connection's end of the compositor socket.
///
/// All operations are non-blocking; readiness waiting is a separate,
/// explicit step ([`Socket::wait_readable`]).
pub(crate) struct Socket {
    fd: OwnedFd,
}

impl Socket {
    pub(crate) const fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    pub(crate) fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Attempts to send `bytes`, attaching `fds` as ancillary data.
    /// Returns the number of bytes accepted by the kernel; the fds are
    /// delivered iff any bytes were.
    pub(crate) fn send(&self, bytes: &[u8], fds: &[OwnedFd]) -> io::Result<usize> {
        let iov = [IoSlice::new(bytes)];
        let raw_fds: Vec<RawFd> = fds.iter().map(AsRawFd::as_raw_fd).collect();
        let cmsg = [ControlMessage::ScmRights(&raw_fds)];
        let cmsgs = if raw_fds.is_empty() { &[][..] } else { &cmsg[..] };

        sendmsg::<()>(
            self.fd.as_raw_fd(),
            &iov,
            cmsgs,
            MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL,
            None,
        )
        .map_err(into_io)
    }

    /// Attempts to receive into `buf`, appending any fds from the
    /// ancillary channel to `fds` in arrival order. Returns the number
    /// of bytes read; 0 means the peer closed the connection.
    pub(crate) fn recv(&self, buf: &mut [u8], fds: &mut VecDeque<OwnedFd>) -> io::Result<usize> {
        let mut iov = [IoSliceMut::new(buf)];
        let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_FDS_IN]);

        let msg = recvmsg::<()>(
            self.fd.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_CMSG_CLOEXEC,
        )
        .map_err(into_io)?;

        let bytes = msg.bytes;
        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                for fd in received {
                    fds.push_back(unsafe { OwnedFd::from_raw_fd(fd) });
                }
            }
        }
        Ok(bytes)
    }

    /// Blocks until the socket is readable. This is the only place the
    /// crate itself waits on the descriptor, and it is reached only
    /// from the composite dispatch/roundtrip entry points.
    pub(crate) fn wait_readable(&self) -> io::Result<()> {
        loop {
            let mut fds = [PollFd::new(&self.fd, PollFlags::POLLIN)];
            match poll(&mut fds, -1) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => {}
                Err(e) => return Err(into_io(e)),
            }
        }
    }
}

fn into_io(err: Errno) -> io::Error {
    io::Error::from_raw_os_error(err as i32)
}
