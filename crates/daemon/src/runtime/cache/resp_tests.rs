// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const CAP: usize = 1024 * 1024;

#[test]
fn parses_the_canonical_set_command() {
    let wire = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nhello\r\n";
    let (tokens, consumed) = parse_command(wire, CAP).unwrap().unwrap();
    assert_eq!(tokens, vec!["SET", "k", "hello"]);
    assert_eq!(consumed, wire.len());
}

#[test]
fn incomplete_input_returns_none() {
    let wire = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\nhello\r\n";
    for cut in [0, 1, 4, 10, wire.len() - 2] {
        assert!(parse_command(&wire[..cut], CAP).is_none(), "cut {}", cut);
    }
}

#[test]
fn values_keep_embedded_spaces() {
    let wire = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$11\r\nhello world\r\n";
    let (tokens, _) = parse_command(wire, CAP).unwrap().unwrap();
    assert_eq!(tokens[2], "hello world");
}

#[test]
fn two_pipelined_commands_consume_separately() {
    let wire = b"*1\r\n$4\r\nSIZE\r\n*1\r\n$6\r\nMEMORY\r\n".to_vec();
    let (tokens, consumed) = parse_command(&wire, CAP).unwrap().unwrap();
    assert_eq!(tokens, vec!["SIZE"]);
    let (tokens, _) = parse_command(&wire[consumed..], CAP).unwrap().unwrap();
    assert_eq!(tokens, vec!["MEMORY"]);
}

#[test]
fn malformed_input_is_an_error() {
    assert_eq!(parse_command(b"SET k v\r\n", CAP), Some(Err(RespError::Malformed)));
    assert_eq!(parse_command(b"*x\r\n", CAP), Some(Err(RespError::Malformed)));
    assert_eq!(parse_command(b"*1\r\n+notbulk\r\n", CAP), Some(Err(RespError::Malformed)));
}

#[test]
fn oversized_bulk_is_rejected() {
    let wire = b"*1\r\n$99999\r\n";
    assert_eq!(parse_command(wire, 1000), Some(Err(RespError::Oversized)));
}

#[test]
fn reply_encodings() {
    use super::super::exec::Reply;
    assert_eq!(encode_reply(&Reply::ok()), b"+OK\r\n");
    assert_eq!(encode_reply(&Reply::Int(42)), b":42\r\n");
    assert_eq!(encode_reply(&Reply::nil()), b"$-1\r\n");
    assert_eq!(encode_reply(&Reply::bulk("hi")), b"$2\r\nhi\r\n");
    assert_eq!(
        encode_reply(&Reply::Error("type conflict".into())),
        b"-ERR type conflict\r\n"
    );
    assert_eq!(
        encode_reply(&Reply::Array(vec![Reply::bulk("a"), Reply::Int(1)])),
        b"*2\r\n$1\r\na\r\n:1\r\n"
    );
}

#[test]
fn pubsub_record_is_a_three_element_array() {
    assert_eq!(
        message_record("news", "hello"),
        b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$5\r\nhello\r\n"
    );
}
