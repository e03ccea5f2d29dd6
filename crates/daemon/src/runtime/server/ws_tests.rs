// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const CAP: usize = 1024 * 1024;

/// RFC 6455 §1.3 worked example.
#[test]
fn accept_key_matches_rfc_sample() {
    assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
}

#[test]
fn handshake_response_carries_accept_header() {
    let response = String::from_utf8(handshake_response("dGhlIHNhbXBsZSBub25jZQ==")).unwrap();
    assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    assert!(response.ends_with("\r\n\r\n"));
}

fn masked(opcode: u8, fin: bool, payload: &[u8]) -> Vec<u8> {
    let key = [0x12u8, 0x34, 0x56, 0x78];
    let mut out = vec![if fin { 0x80 | opcode } else { opcode }];
    match payload.len() {
        len if len < 126 => out.push(0x80 | len as u8),
        len if len <= u16::MAX as usize => {
            out.push(0x80 | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(0x80 | 127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    out.extend_from_slice(&key);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    out
}

#[test]
fn parse_unmasks_client_frames() {
    let wire = masked(OP_TEXT, true, b"ping");
    let (frame, consumed) = parse_frame(&wire, CAP).unwrap().unwrap();
    assert_eq!(consumed, wire.len());
    assert!(frame.fin);
    assert_eq!(frame.opcode, OP_TEXT);
    assert_eq!(frame.payload, b"ping");
}

#[test]
fn parse_handles_16_bit_lengths() {
    let payload = vec![b'x'; 300];
    let wire = masked(OP_BINARY, true, &payload);
    let (frame, _) = parse_frame(&wire, CAP).unwrap().unwrap();
    assert_eq!(frame.payload.len(), 300);
}

#[test]
fn parse_handles_64_bit_lengths() {
    let payload = vec![b'y'; 70_000];
    let wire = masked(OP_BINARY, true, &payload);
    let (frame, _) = parse_frame(&wire, CAP).unwrap().unwrap();
    assert_eq!(frame.payload.len(), 70_000);
}

#[test]
fn incomplete_frames_wait_for_more_bytes() {
    let wire = masked(OP_TEXT, true, b"hello world");
    for cut in [0, 1, 3, wire.len() - 1] {
        assert!(parse_frame(&wire[..cut], CAP).is_none(), "cut at {}", cut);
    }
}

#[test]
fn oversized_frame_is_rejected() {
    let payload = vec![0u8; 200];
    let wire = masked(OP_BINARY, true, &payload);
    assert_eq!(parse_frame(&wire, 100), Some(Err(WsError::Oversized)));
}

#[test]
fn reserved_bits_and_bad_opcodes_are_rejected() {
    let mut wire = masked(OP_TEXT, true, b"x");
    wire[0] |= 0x40;
    assert_eq!(parse_frame(&wire, CAP), Some(Err(WsError::BadFrame)));

    let wire = masked(0x3, true, b"x");
    assert_eq!(parse_frame(&wire, CAP), Some(Err(WsError::BadFrame)));
}

#[test]
fn build_parse_roundtrip_unmasked() {
    let wire = text_frame("round trip");
    let (frame, consumed) = parse_frame(&wire, CAP).unwrap().unwrap();
    assert_eq!(consumed, wire.len());
    assert_eq!(frame.payload, b"round trip");
}

#[test]
fn assembler_concatenates_fragments() {
    let mut assembler = Assembler::default();
    let first = RawFrame { fin: false, opcode: OP_TEXT, payload: b"hel".to_vec() };
    let last = RawFrame { fin: true, opcode: OP_CONTINUATION, payload: b"lo".to_vec() };

    assert_eq!(assembler.push(first, CAP).unwrap(), None);
    assert_eq!(assembler.push(last, CAP).unwrap(), Some(WsEvent::Message("hello".into())));
}

#[test]
fn assembler_passes_control_frames_through_mid_fragment() {
    let mut assembler = Assembler::default();
    let first = RawFrame { fin: false, opcode: OP_TEXT, payload: b"par".to_vec() };
    assert_eq!(assembler.push(first, CAP).unwrap(), None);

    let ping = RawFrame { fin: true, opcode: OP_PING, payload: b"hb".to_vec() };
    assert_eq!(assembler.push(ping, CAP).unwrap(), Some(WsEvent::Ping(b"hb".to_vec())));

    let last = RawFrame { fin: true, opcode: OP_CONTINUATION, payload: b"tial".to_vec() };
    assert_eq!(assembler.push(last, CAP).unwrap(), Some(WsEvent::Message("partial".into())));
}

#[test]
fn continuation_without_start_is_bad() {
    let mut assembler = Assembler::default();
    let frame = RawFrame { fin: true, opcode: OP_CONTINUATION, payload: b"x".to_vec() };
    assert_eq!(assembler.push(frame, CAP), Err(WsError::BadFrame));
}

#[test]
fn close_and_pong_map_to_events() {
    let mut assembler = Assembler::default();
    let close = RawFrame { fin: true, opcode: OP_CLOSE, payload: Vec::new() };
    assert_eq!(assembler.push(close, CAP).unwrap(), Some(WsEvent::Close));
    let pong = RawFrame { fin: true, opcode: OP_PONG, payload: Vec::new() };
    assert_eq!(assembler.push(pong, CAP).unwrap(), Some(WsEvent::Pong));
}
