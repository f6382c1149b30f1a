//! Minimal POP3 client for the admin UI's connection test.
//!
//! USER / PASS / STAT / QUIT over a blocking socket, optionally wrapped in
//! rustls. Run it from `spawn_blocking`.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::NetworkError;

/// Connect, read and write timeout for the probe.
pub const POP3_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest reply line accepted before giving up.
const MAX_LINE: usize = 8 * 1024;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct Pop3Probe {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub tls: bool,
    pub timeout: Duration,
}

impl Pop3Probe {
    pub fn new(host: &str, port: u16, user: &str, password: SecretString, tls: bool) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password,
            tls,
            timeout: POP3_TIMEOUT,
        }
    }

    /// Log in and return the number of messages in the mailbox.
    pub fn run(&self) -> Result<u32, NetworkError> {
        let tcp = self.connect()?;
        let result = if self.tls {
            let conn = tls_connection(&self.host)?;
            let mut stream = rustls::StreamOwned::new(conn, tcp);
            self.session(&mut stream)
        } else {
            let mut stream = tcp;
            self.session(&mut stream)
        };
        let count = result.map_err(|e| self.scrub(e))?;
        info!(
            host = %self.host,
            port = self.port,
            messages = count,
            "POP3 connection test succeeded"
        );
        Ok(count)
    }

    fn connect(&self) -> Result<TcpStream, NetworkError> {
        let addrs: Vec<_> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| self.resolve_error())?
            .collect();
        if addrs.is_empty() {
            return Err(self.resolve_error());
        }

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(tcp) => {
                    tcp.set_read_timeout(Some(self.timeout))?;
                    tcp.set_write_timeout(Some(self.timeout))?;
                    return Ok(tcp);
                }
                Err(e) => last_err = Some(e),
            }
        }
        let reason = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(NetworkError::Connect {
            host: self.host.clone(),
            port: self.port,
            reason,
        })
    }

    fn resolve_error(&self) -> NetworkError {
        NetworkError::Resolve {
            host: self.host.clone(),
            port: self.port,
        }
    }

    fn session<S: Read + Write>(&self, stream: &mut S) -> Result<u32, NetworkError> {
        let timeout = self.timeout;
        let greeting = read_line(stream, timeout)?;
        expect_ok("greeting", &greeting)?;
        debug!(host = %self.host, "POP3 greeting received");

        command(stream, "USER", &format!("USER {}", self.user), timeout)?;
        command(
            stream,
            "PASS",
            &format!("PASS {}", self.password.expose_secret()),
            timeout,
        )?;
        let stat = command(stream, "STAT", "STAT", timeout)?;
        let count = parse_stat(&stat)?;

        // Best effort; the count is already known.
        let _ = command(stream, "QUIT", "QUIT", timeout);
        Ok(count)
    }

    /// Remove the password from anything headed for a log or the UI.
    fn scrub(&self, err: NetworkError) -> NetworkError {
        let secret = self.password.expose_secret();
        if secret.is_empty() {
            return err;
        }
        let clean = |s: String| s.replace(secret, "***");
        match err {
            NetworkError::Pop3Rejected { command, reply } => NetworkError::Pop3Rejected {
                command,
                reply: clean(reply),
            },
            NetworkError::Pop3Protocol(m) => NetworkError::Pop3Protocol(clean(m)),
            NetworkError::Tls(m) => NetworkError::Tls(clean(m)),
            other => other,
        }
    }
}

fn tls_connection(host: &str) -> Result<rustls::ClientConnection, NetworkError> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| NetworkError::Tls(e.to_string()))?;
    rustls::ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| NetworkError::Tls(e.to_string()))
}

fn command<S: Read + Write>(
    stream: &mut S,
    name: &str,
    line: &str,
    timeout: Duration,
) -> Result<String, NetworkError> {
    stream
        .write_all(format!("{line}\r\n").as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| io_error(e, timeout))?;
    let reply = read_line(stream, timeout)?;
    expect_ok(name, &reply)?;
    Ok(reply)
}

fn expect_ok(command: &str, reply: &str) -> Result<(), NetworkError> {
    if reply.starts_with("+OK") {
        Ok(())
    } else {
        Err(NetworkError::Pop3Rejected {
            command: command.to_string(),
            reply: reply.to_string(),
        })
    }
}

/// `+OK <count> <octets>`
fn parse_stat(reply: &str) -> Result<u32, NetworkError> {
    reply
        .split_whitespace()
        .nth(1)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| NetworkError::Pop3Protocol(format!("unexpected STAT reply: {reply}")))
}

/// Read one CRLF-terminated line, without the terminator.
fn read_line<S: Read>(stream: &mut S, timeout: Duration) -> Result<String, NetworkError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => {
                return Err(NetworkError::Pop3Protocol(
                    "connection closed by server".into(),
                ));
            }
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    buf.truncate(buf.len() - 2);
                    return Ok(String::from_utf8_lossy(&buf).into_owned());
                }
                if buf.len() > MAX_LINE {
                    return Err(NetworkError::Pop3Protocol("reply line too long".into()));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_error(e, timeout)),
        }
    }
}

fn io_error(e: std::io::Error, timeout: Duration) -> NetworkError {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
            NetworkError::Timeout(timeout)
        }
        _ => NetworkError::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Scripted POP3 server: answers each received command from `replies`.
    fn fake_server(
        greeting: &'static str,
        replies: Vec<&'static str>,
    ) -> (u16, thread::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(format!("{greeting}\r\n").as_bytes()).unwrap();
            let mut reader = BufReader::new(socket.try_clone().unwrap());
            let mut seen = Vec::new();
            for reply in replies {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 {
                    break;
                }
                seen.push(line.trim_end().to_string());
                socket.write_all(format!("{reply}\r\n").as_bytes()).unwrap();
            }
            seen
        });
        (port, handle)
    }

    fn probe(port: u16, password: &str) -> Pop3Probe {
        Pop3Probe::new("127.0.0.1", port, "alice", SecretString::from(password), false)
    }

    #[test]
    fn successful_login_reports_message_count() {
        let (port, server) = fake_server(
            "+OK ready",
            vec!["+OK", "+OK logged in", "+OK 7 12345", "+OK bye"],
        );
        assert_eq!(probe(port, "hunter2").run().unwrap(), 7);
        let seen = server.join().unwrap();
        assert_eq!(seen, vec!["USER alice", "PASS hunter2", "STAT", "QUIT"]);
    }

    #[test]
    fn rejected_password_is_reported_without_the_secret() {
        let (port, server) = fake_server("+OK ready", vec!["+OK", "-ERR invalid password hunter2"]);
        let err = probe(port, "hunter2").run().unwrap_err();
        let text = err.to_string();
        assert!(matches!(err, NetworkError::Pop3Rejected { ref command, .. } if command == "PASS"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("***"));
        server.join().unwrap();
    }

    #[test]
    fn bad_greeting_is_rejected() {
        let (port, server) = fake_server("-ERR go away", vec![]);
        let err = probe(port, "pw").run().unwrap_err();
        assert!(matches!(
            err,
            NetworkError::Pop3Rejected { ref command, .. } if command == "greeting"
        ));
        server.join().unwrap();
    }

    #[test]
    fn garbled_stat_is_protocol_error() {
        let (port, server) = fake_server("+OK", vec!["+OK", "+OK", "+OK lots"]);
        let err = probe(port, "pw").run().unwrap_err();
        assert!(matches!(err, NetworkError::Pop3Protocol(_)));
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_is_connect_error() {
        // Bind then drop to get a port with nothing listening.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = probe(port, "pw").run().unwrap_err();
        assert!(matches!(err, NetworkError::Connect { .. }));
    }

    #[test]
    fn parse_stat_reads_count() {
        assert_eq!(parse_stat("+OK 0 0").unwrap(), 0);
        assert_eq!(parse_stat("+OK 42 1000").unwrap(), 42);
        assert!(parse_stat("+OK").is_err());
    }
}
