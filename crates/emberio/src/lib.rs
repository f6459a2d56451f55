//! `emberio`: tiny byte-level transport helpers.
//!
//! This crate intentionally avoids tokio-util's codecs and implements just
//! what the server needs:
//! - telnet IAC stripping with "refuse everything" negotiation replies,
//! - CRLF/LF line framing as an incremental push/pop state machine.
//!
//! Both pieces are synchronous and allocation-light so the per-connection
//! reader task can run them over whatever chunks the socket yields.

pub mod line;
pub mod telnet;
