use super::HttpTransport;
use crate::error::AfdError;
use crate::job::TlsMode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use native_tls::TlsConnector;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

enum Stream {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.read(buf),
            Stream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Plain(s) => s.write(buf),
            Stream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Plain(s) => s.flush(),
            Stream::Tls(s) => s.flush(),
        }
    }
}

/// A real HTTP/1.1 session over `TcpStream`, optionally upgraded to TLS.
/// One instance lives for the duration of a connection, across burst
/// batches (spec §4.7).
#[derive(Default)]
pub struct TcpHttpSession {
    stream: Option<Stream>,
    host_header: String,
    keep_reading_current_response: bool,
}

impl TcpHttpSession {
    pub fn new() -> Self {
        TcpHttpSession::default()
    }

    fn stream_mut(&mut self) -> Result<&mut Stream, AfdError> {
        self.stream.as_mut().ok_or_else(|| AfdError::WriteRemote("not connected".into()))
    }

    fn read_line(&mut self) -> Result<String, AfdError> {
        let stream = self.stream_mut()?;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = stream
                .read(&mut byte)
                .map_err(|e| AfdError::OpenRemote(format!("response read failed: {e}")))?;
            if n == 0 {
                break;
            }
            if byte[0] == b'\n' {
                break;
            }
            if byte[0] != b'\r' {
                line.push(byte[0]);
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

impl HttpTransport for TcpHttpSession {
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        proxy: Option<&str>,
        tls_mode: TlsMode,
        strict_verify: bool,
        connect_timeout: Duration,
        keepalive: bool,
    ) -> Result<(), AfdError> {
        let dial_target = proxy.map(str::to_string).unwrap_or_else(|| format!("{host}:{port}"));
        let mut addrs = dial_target
            .to_socket_addrs()
            .map_err(|e| AfdError::Connect(format!("cannot resolve {dial_target}: {e}")))?;
        let addr = addrs
            .next()
            .ok_or_else(|| AfdError::Connect(format!("no address for {dial_target}")))?;
        let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| AfdError::Connect(format!("connect to {dial_target} failed: {e}")))?;
        let _ = tcp.set_nodelay(true);
        if keepalive {
            set_tcp_keepalive(&tcp);
        }

        let mut stream = Stream::Plain(tcp);

        if proxy.is_some() {
            if let Stream::Plain(ref mut tcp) = stream {
                write!(tcp, "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n")
                    .map_err(|e| AfdError::Connect(format!("proxy CONNECT failed: {e}")))?;
            }
            self.stream = Some(stream);
            let status_line = self.read_line()?;
            loop {
                let l = self.read_line()?;
                if l.is_empty() {
                    break;
                }
            }
            if !status_line.contains("200") {
                return Err(AfdError::Connect(format!("proxy CONNECT rejected: {status_line}")));
            }
            stream = self.stream.take().expect("stream set above");
        }

        if tls_mode != TlsMode::Off {
            let connector = TlsConnector::builder()
                .danger_accept_invalid_certs(!strict_verify)
                .danger_accept_invalid_hostnames(!strict_verify)
                .build()
                .map_err(|e| AfdError::Connect(format!("TLS connector build failed: {e}")))?;
            let Stream::Plain(tcp) = stream else {
                return Err(AfdError::Connect("cannot re-wrap an already-TLS stream".into()));
            };
            match connector.connect(host, tcp) {
                Ok(tls) => stream = Stream::Tls(Box::new(tls)),
                Err(e) => {
                    if tls_mode == TlsMode::Required {
                        return Err(AfdError::Connect(format!("TLS handshake failed: {e}")));
                    }
                    return Err(AfdError::Connect(format!(
                        "opportunistic TLS handshake failed: {e}"
                    )));
                }
            }
        }

        self.host_header = format!("{host}:{port}");
        self.stream = Some(stream);
        Ok(())
    }

    fn put_begin(
        &mut self,
        target_dir: &str,
        filename: &str,
        content_length: u64,
        _first_in_burst: bool,
        user: &str,
        password: Option<&str>,
    ) -> Result<(), AfdError> {
        use std::io::Write as _;
        // Every PUT gets its own request line and headers regardless of
        // burst position; `_first_in_burst` exists on the trait because
        // the caller (and a future proxy/auth-caching optimization) needs
        // to know, but the current wire behavior doesn't vary on it.
        let path = format!("{}/{}", target_dir.trim_end_matches('/'), filename);
        let auth_header = password
            .map(|p| {
                let creds = BASE64.encode(format!("{user}:{p}"));
                format!("Authorization: Basic {creds}\r\n")
            })
            .unwrap_or_default();
        let request = format!(
            "PUT {path} HTTP/1.1\r\nHost: {}\r\nConnection: keep-alive\r\n{auth_header}Content-Length: {content_length}\r\nContent-Type: application/octet-stream\r\n\r\n",
            self.host_header,
        );
        let stream = self.stream_mut()?;
        stream
            .write_all(request.as_bytes())
            .map_err(|e| AfdError::OpenRemote(format!("PUT request failed: {e}")))?;
        self.keep_reading_current_response = true;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), AfdError> {
        let stream = self.stream_mut()?;
        stream.write_all(buf).map_err(|e| AfdError::WriteRemote(e.to_string()))
    }

    fn put_finalize(&mut self) -> Result<(), AfdError> {
        if !self.keep_reading_current_response {
            return Ok(());
        }
        self.keep_reading_current_response = false;
        let status_line = self.read_line()?;
        loop {
            let l = self.read_line()?;
            if l.is_empty() {
                break;
            }
        }
        let code = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| AfdError::OpenRemote(format!("malformed status line: {status_line}")))?;
        if !(200..300).contains(&code) {
            return Err(AfdError::OpenRemote(format!("remote returned {code}: {status_line}")));
        }
        Ok(())
    }

    fn quit(&mut self) {
        if let Some(mut s) = self.stream.take() {
            let _ = s.flush();
        }
    }
}

/// Enables `SO_KEEPALIVE` on the just-connected socket when the host
/// entry's `ProtocolOptions::TCP_KEEPALIVE` bit is set. `std::net` has no
/// portable setter for this, so it goes through the raw fd, the same way
/// `region_lock.rs` reaches past `std` for `fcntl`.
fn set_tcp_keepalive(tcp: &TcpStream) {
    let enable: libc::c_int = 1;
    unsafe {
        libc::setsockopt(
            tcp.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &enable as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}
