//! Child-process plumbing: spawn retry, bounded stderr capture, and the
//! terminate-then-kill protocol.

use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::debug;

/// Default cap on retained stderr bytes.
pub const STDERR_BUFFER_SIZE: usize = 64 * 1024;

/// Grace between the terminate and kill signals.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Keeps the last `cap` bytes of a stream; older bytes are dropped from the
/// head as new ones arrive.
#[derive(Debug)]
pub struct TailBuffer {
    cap: usize,
    buf: VecDeque<u8>,
}

impl TailBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            buf: VecDeque::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.cap == 0 {
            return;
        }
        if chunk.len() >= self.cap {
            self.buf.clear();
            self.buf.extend(&chunk[chunk.len() - self.cap..]);
            return;
        }
        let overflow = (self.buf.len() + chunk.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend(chunk);
    }

    /// The retained tail, decoded lossily.
    pub fn into_string(self) -> String {
        let bytes: Vec<u8> = self.buf.into_iter().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Strips ANSI escape sequences (CSI and single-char escapes).
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // CSI: parameter and intermediate bytes, then a final byte
                // in @..~ terminates the sequence.
                for c in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        break;
                    }
                }
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }
    out
}

/// Drains a child's stderr into a tail buffer, optionally mirroring each
/// line to the wrapper's stderr with a `[BACKEND] ` prefix.
///
/// Mirrored lines are stripped of ANSI sequences when stderr is not a TTY,
/// so captured logs stay readable.
pub async fn drain_stderr<R>(mut reader: R, cap: usize, mirror: bool) -> TailBuffer
where
    R: AsyncRead + Unpin,
{
    let mut tail = TailBuffer::new(cap);
    let mut line_buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    let is_tty = stderr_is_tty();

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        tail.push(&chunk[..n]);

        if !mirror {
            continue;
        }
        for &byte in &chunk[..n] {
            if byte == b'\n' {
                mirror_line(&line_buf, is_tty);
                line_buf.clear();
            } else {
                line_buf.push(byte);
            }
        }
    }

    if mirror && !line_buf.is_empty() {
        mirror_line(&line_buf, is_tty);
    }
    tail
}

fn stderr_is_tty() -> bool {
    use std::io::IsTerminal;
    std::io::stderr().is_terminal()
}

fn mirror_line(line: &[u8], is_tty: bool) {
    let text = String::from_utf8_lossy(line);
    let text = if is_tty {
        text.into_owned()
    } else {
        strip_ansi(&text)
    };
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "[BACKEND] {text}");
}

/// Total spawn attempts for a busy backend binary.
const SPAWN_ATTEMPTS: u32 = 3;
/// Base delay between attempts; grows linearly per attempt.
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(25);

/// Spawns a command, retrying when the executable is being rewritten
/// underneath us.
///
/// The backend CLIs are typically npm- or bun-managed and their binaries get
/// replaced in place during upgrades; a spawn racing such an upgrade fails
/// with ETXTBSY even though the command is installed and will work a moment
/// later. Anything other than that race is returned as-is.
pub fn spawn_with_retry(command: &mut Command) -> std::io::Result<Child> {
    let mut last_busy = None;
    for attempt in 1..=SPAWN_ATTEMPTS {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) if is_text_file_busy(&source) && attempt < SPAWN_ATTEMPTS => {
                debug!(attempt, "backend binary busy, retrying spawn");
                std::thread::sleep(SPAWN_RETRY_DELAY * attempt);
                last_busy = Some(source);
            }
            Err(source) => return Err(source),
        }
    }
    Err(last_busy
        .unwrap_or_else(|| std::io::Error::other("backend binary stayed busy")))
}

fn is_text_file_busy(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ETXTBSY)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

/// Sends the platform's graceful-terminate signal to the child. Failure is
/// swallowed; the child may already be gone.
pub fn request_terminate(child: &Child) {
    let Some(pid) = child.id() else { return };
    debug!(pid, "requesting child termination");
    #[cfg(unix)]
    {
        // SAFETY: kill(2) is safe to call with any pid and a valid signal.
        let _ = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

/// Forwards an OS signal to the child by number. Unix only; elsewhere this
/// degrades to the kill escalation handled by the caller.
pub fn forward_signal(child: &Child, signo: i32) {
    let Some(pid) = child.id() else { return };
    #[cfg(unix)]
    {
        // SAFETY: kill(2) is safe to call with any pid and a valid signal.
        let _ = unsafe { libc::kill(pid as libc::pid_t, signo) };
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, signo);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_buffer_keeps_only_the_tail() {
        let mut tail = TailBuffer::new(8);
        tail.push(b"0123456789");
        assert_eq!(tail.len(), 8);
        assert_eq!(tail.into_string(), "23456789");

        let mut tail = TailBuffer::new(8);
        tail.push(b"abc");
        tail.push(b"defgh");
        tail.push(b"ij");
        assert_eq!(tail.into_string(), "cdefghij");
    }

    #[test]
    fn tail_buffer_handles_oversized_single_chunk() {
        let mut tail = TailBuffer::new(4);
        tail.push(&vec![b'x'; 100]);
        tail.push(b"end!");
        assert_eq!(tail.into_string(), "end!");
    }

    #[test]
    fn ansi_sequences_are_stripped() {
        assert_eq!(strip_ansi("\u{1b}[31mred\u{1b}[0m text"), "red text");
        assert_eq!(strip_ansi("plain"), "plain");
        assert_eq!(strip_ansi("\u{1b}M partial"), " partial");
    }

    #[tokio::test]
    async fn drain_stderr_caps_capture() {
        let data = vec![b'e'; 200];
        let tail = drain_stderr(std::io::Cursor::new(data), 64, false).await;
        assert_eq!(tail.len(), 64);
    }
}
