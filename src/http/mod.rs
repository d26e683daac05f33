//! The HTTP client session: connect, PUT begin, streamed write, PUT
//! finalize, quit (spec §4.2). This crate hand-rolls the wire protocol
//! rather than reaching for a high-level HTTP client, because spec §1
//! scopes "the HTTP wire library itself" out as an external capability and
//! the pipeline needs exact control over framing, content-length, and
//! keep-alive reuse across a burst — the same reason the teacher wraps
//! `ssh2::Session` directly instead of a higher-level SFTP crate.

mod session;

pub use session::TcpHttpSession;

use crate::error::AfdError;
use crate::job::TlsMode;
use std::time::Duration;

/// Everything the pipeline needs from an HTTP session, abstracted so tests
/// can substitute an in-memory fake the way the teacher's `MockSftp`
/// substitutes for `ssh2::Sftp` (see `crate::transfer::sftp_like`).
pub trait HttpTransport {
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        proxy: Option<&str>,
        tls_mode: TlsMode,
        strict_verify: bool,
        connect_timeout: Duration,
        keepalive: bool,
    ) -> Result<(), AfdError>;

    fn put_begin(
        &mut self,
        target_dir: &str,
        filename: &str,
        content_length: u64,
        first_in_burst: bool,
        user: &str,
        password: Option<&str>,
    ) -> Result<(), AfdError>;

    fn write(&mut self, buf: &[u8]) -> Result<(), AfdError>;

    fn put_finalize(&mut self) -> Result<(), AfdError>;

    /// Best-effort teardown; never returns an error to the caller.
    fn quit(&mut self);
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// An in-memory stand-in for [`HttpTransport`], recording every call so
    /// pipeline tests can assert on framing and sequencing without a real
    /// socket.
    #[derive(Default)]
    pub struct MockHttpTransport {
        pub connected: bool,
        pub bytes_written: Vec<u8>,
        pub finalize_results: VecDeque<Result<(), AfdError>>,
        pub connect_result: Option<Result<(), AfdError>>,
        pub put_begin_calls: Vec<(String, String, u64, bool)>,
        pub quit_calls: u32,
    }

    impl HttpTransport for MockHttpTransport {
        fn connect(
            &mut self,
            _host: &str,
            _port: u16,
            _proxy: Option<&str>,
            _tls_mode: TlsMode,
            _strict_verify: bool,
            _connect_timeout: Duration,
            _keepalive: bool,
        ) -> Result<(), AfdError> {
            match self.connect_result.take() {
                Some(r) => r,
                None => {
                    self.connected = true;
                    Ok(())
                }
            }
        }

        fn put_begin(
            &mut self,
            target_dir: &str,
            filename: &str,
            content_length: u64,
            first_in_burst: bool,
            _user: &str,
            _password: Option<&str>,
        ) -> Result<(), AfdError> {
            self.put_begin_calls.push((
                target_dir.to_string(),
                filename.to_string(),
                content_length,
                first_in_burst,
            ));
            Ok(())
        }

        fn write(&mut self, buf: &[u8]) -> Result<(), AfdError> {
            self.bytes_written.extend_from_slice(buf);
            Ok(())
        }

        fn put_finalize(&mut self) -> Result<(), AfdError> {
            self.finalize_results.pop_front().unwrap_or(Ok(()))
        }

        fn quit(&mut self) {
            self.quit_calls += 1;
            self.connected = false;
        }
    }
}
