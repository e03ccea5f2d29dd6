// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RESP2 wire codec for the cache engine.
//!
//! Requests are arrays of bulk strings (`*N\r\n$L\r\n<bytes>\r\n...`);
//! replies use simple strings, errors, integers, bulk strings and arrays.

use super::exec::Reply;

#[derive(Debug, PartialEq, Eq)]
pub enum RespError {
    /// Not a RESP array or a malformed length.
    Malformed,
    /// Declared sizes exceed the accumulator cap.
    Oversized,
}

/// Incremental parse of one command array from `buf`.
///
/// Returns `None` while incomplete, otherwise the tokens and bytes
/// consumed. `max_len` bounds declared element counts and sizes.
pub fn parse_command(
    buf: &[u8],
    max_len: usize,
) -> Option<Result<(Vec<String>, usize), RespError>> {
    let mut pos = 0;
    if buf.is_empty() {
        return None;
    }
    if buf[0] != b'*' {
        return Some(Err(RespError::Malformed));
    }
    let (count, next) = match read_int_line(buf, pos + 1)? {
        Ok(parsed) => parsed,
        Err(error) => return Some(Err(error)),
    };
    pos = next;
    if count < 0 || count as usize > 1024 {
        return Some(Err(RespError::Malformed));
    }

    let mut tokens = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if pos >= buf.len() {
            return None;
        }
        if buf[pos] != b'$' {
            return Some(Err(RespError::Malformed));
        }
        let (len, next) = match read_int_line(buf, pos + 1)? {
            Ok(parsed) => parsed,
            Err(error) => return Some(Err(error)),
        };
        pos = next;
        if len < 0 {
            return Some(Err(RespError::Malformed));
        }
        let len = len as usize;
        if len > max_len {
            return Some(Err(RespError::Oversized));
        }
        if buf.len() < pos + len + 2 {
            return None;
        }
        if &buf[pos + len..pos + len + 2] != b"\r\n" {
            return Some(Err(RespError::Malformed));
        }
        tokens.push(String::from_utf8_lossy(&buf[pos..pos + len]).into_owned());
        pos += len + 2;
    }
    Some(Ok((tokens, pos)))
}

/// Read a decimal integer terminated by CRLF starting at `from`.
/// Outer `None` = incomplete.
#[allow(clippy::type_complexity)]
fn read_int_line(buf: &[u8], from: usize) -> Option<Result<(i64, usize), RespError>> {
    let rest = buf.get(from..)?;
    let end = rest.windows(2).position(|w| w == b"\r\n")?;
    let digits = &rest[..end];
    if digits.is_empty() || digits.len() > 16 {
        return Some(Err(RespError::Malformed));
    }
    let text = match std::str::from_utf8(digits) {
        Ok(text) => text,
        Err(_) => return Some(Err(RespError::Malformed)),
    };
    match text.parse::<i64>() {
        Ok(value) => Some(Ok((value, from + end + 2))),
        Err(_) => Some(Err(RespError::Malformed)),
    }
}

/// Encode a reply in RESP2.
pub fn encode_reply(reply: &Reply) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(reply, &mut out);
    out
}

fn encode_into(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Simple(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Error(e) => {
            out.extend_from_slice(b"-ERR ");
            out.extend_from_slice(e.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Int(n) => {
            out.push(b':');
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
        Reply::Bulk(Some(s)) => {
            out.push(b'$');
            out.extend_from_slice(s.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode_into(item, out);
            }
        }
    }
}

/// The pub/sub delivery record in RESP form.
pub fn message_record(channel: &str, message: &str) -> Vec<u8> {
    encode_reply(&Reply::Array(vec![
        Reply::bulk("message"),
        Reply::bulk(channel),
        Reply::bulk(message),
    ]))
}

#[cfg(test)]
#[path = "resp_tests.rs"]
mod tests;
