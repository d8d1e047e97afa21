//! Acquisition of the single shared listening socket.
//!
//! The engine opens exactly one listening socket and hands the same file
//! descriptor to every reactor. The socket is created with the raw
//! `socket(2)` / `setsockopt(2)` / `bind(2)` / `listen(2)` sequence so that
//! each step can fail with its own error variant, and so `SO_REUSEADDR` is
//! applied before the bind. Any failure here aborts startup; the engine
//! never runs partially configured.

use std::io;
use std::mem;
use std::net::TcpListener;
use std::os::unix::io::FromRawFd;

use thiserror::Error;

/// Accept backlog for the shared listening socket.
pub const LISTEN_BACKLOG: libc::c_int = 1024;

/// Errors from [`acquire_listener`], one variant per failing OS call.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("could not create socket: {0}")]
    Socket(io::Error),
    #[error("could not configure socket: {0}")]
    Config(io::Error),
    #[error("could not bind socket: {0}")]
    Bind(io::Error),
    #[error("could not listen on socket: {0}")]
    Listen(io::Error),
}

/// Create, configure, bind, and start listening on `0.0.0.0:port`.
///
/// The returned listener is nonblocking and address-reusable. Port `0`
/// requests a kernel-assigned port; read it back with
/// `TcpListener::local_addr`.
pub fn acquire_listener(port: u16) -> Result<TcpListener, ListenerError> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(ListenerError::Socket(io::Error::last_os_error()));
    }

    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(close_on(fd, ListenerError::Config));
    }

    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_addr.s_addr = libc::INADDR_ANY;
    addr.sin_port = port.to_be();

    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(close_on(fd, ListenerError::Bind));
    }

    let rc = unsafe { libc::listen(fd, LISTEN_BACKLOG) };
    if rc != 0 {
        return Err(close_on(fd, ListenerError::Listen));
    }

    // From here the fd is owned by the TcpListener and released with it.
    let listener = unsafe { TcpListener::from_raw_fd(fd) };
    listener
        .set_nonblocking(true)
        .map_err(ListenerError::Config)?;
    Ok(listener)
}

fn close_on(fd: libc::c_int, variant: fn(io::Error) -> ListenerError) -> ListenerError {
    let err = io::Error::last_os_error();
    unsafe {
        libc::close(fd);
    }
    variant(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_port_binds_and_reports_address() {
        let listener = acquire_listener(0).expect("acquire");
        let addr = listener.local_addr().expect("local_addr");
        assert_ne!(addr.port(), 0);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn rebinding_a_live_port_fails_with_bind_error() {
        let first = acquire_listener(0).expect("acquire");
        let port = first.local_addr().expect("local_addr").port();
        match acquire_listener(port) {
            Err(ListenerError::Bind(_)) => {}
            other => panic!("expected Bind error, got {other:?}"),
        }
    }

    #[test]
    fn listener_is_nonblocking() {
        let listener = acquire_listener(0).expect("acquire");
        match listener.accept() {
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            other => panic!("expected WouldBlock, got {other:?}"),
        }
    }
}
