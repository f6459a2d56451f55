//! Incremental CRLF/LF line framing.
//!
//! The reader task pushes whatever the socket yields and pops complete
//! lines. Lines keep no terminator; a lone `\r` before the `\n` is
//! stripped too. Overlong lines are reported once and discarded up to the
//! next newline so a hostile peer cannot grow the buffer without bound.

use bytes::{Bytes, BytesMut};
use memchr::memchr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Line,
    /// The line exceeded the limit; its bytes were dropped.
    Overlong,
}

#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_line_len: usize,
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(4 * 1024)
    }
}

impl LineFramer {
    pub fn new(max_line_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            max_line_len: max_line_len.max(1),
            discarding: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line, if any.
    pub fn pop(&mut self) -> Option<(Frame, Bytes)> {
        loop {
            match memchr(b'\n', &self.buf) {
                Some(i) => {
                    let raw = self.buf.split_to(i + 1).freeze();
                    if self.discarding {
                        // Tail of an overlong line; swallow it silently.
                        self.discarding = false;
                        continue;
                    }
                    return Some((Frame::Line, trim_crlf(raw)));
                }
                None => {
                    if self.discarding {
                        // Still mid-flood; drop what we have and keep waiting
                        // for the newline.
                        self.buf.clear();
                        return None;
                    }
                    if self.buf.len() > self.max_line_len {
                        self.buf.clear();
                        self.discarding = true;
                        return Some((Frame::Overlong, Bytes::new()));
                    }
                    return None;
                }
            }
        }
    }
}

fn trim_crlf(mut b: Bytes) -> Bytes {
    let mut end = b.len();
    if end > 0 && b[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && b[end - 1] == b'\r' {
        end -= 1;
    }
    b.truncate(end);
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_crlf_and_lf() {
        let mut fr = LineFramer::default();
        fr.push(b"hello\r\nworld\n");
        let (k, l) = fr.pop().unwrap();
        assert_eq!(k, Frame::Line);
        assert_eq!(&l[..], b"hello");
        let (_, l) = fr.pop().unwrap();
        assert_eq!(&l[..], b"world");
        assert!(fr.pop().is_none());
    }

    #[test]
    fn holds_partial_lines_across_pushes() {
        let mut fr = LineFramer::default();
        fr.push(b"hel");
        assert!(fr.pop().is_none());
        fr.push(b"lo\r\n");
        let (_, l) = fr.pop().unwrap();
        assert_eq!(&l[..], b"hello");
    }

    #[test]
    fn empty_line_is_a_line() {
        let mut fr = LineFramer::default();
        fr.push(b"\r\n");
        let (k, l) = fr.pop().unwrap();
        assert_eq!(k, Frame::Line);
        assert!(l.is_empty());
    }

    #[test]
    fn overlong_line_is_reported_then_discarded() {
        let mut fr = LineFramer::new(8);
        fr.push(b"aaaaaaaaaaaaaaaa");
        let (k, _) = fr.pop().unwrap();
        assert_eq!(k, Frame::Overlong);
        assert!(fr.pop().is_none());

        // The tail up to the newline disappears; the next line survives.
        fr.push(b"aaaa\nok\n");
        let (k, l) = fr.pop().unwrap();
        assert_eq!(k, Frame::Line);
        assert_eq!(&l[..], b"ok");
    }
}
