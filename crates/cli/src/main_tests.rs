// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn cli_parses_and_encodes_control_lines() {
    let cli = Cli::parse_from(["socketley", "create", "server", "web", "port=17000"]);
    let Cmd::Create { kind, name, options } = cli.command else {
        panic!("wrong subcommand");
    };
    let command = Command::Create { kind, name, options: parse_pairs(&options).unwrap() };
    assert_eq!(command.encode(), "create server web port=17000");
}

#[test]
fn send_joins_trailing_words() {
    let cli = Cli::parse_from(["socketley", "send", "web", "hello", "world"]);
    let Cmd::Send { name, text } = cli.command else {
        panic!("wrong subcommand");
    };
    assert_eq!(Command::Send { name, text: text.join(" ") }.encode(), "send web hello world");
}

#[test]
fn start_interactive_flag() {
    let cli = Cli::parse_from(["socketley", "start", "web", "-i"]);
    let Cmd::Start { name, interactive } = cli.command else {
        panic!("wrong subcommand");
    };
    assert!(interactive);
    assert_eq!(
        Command::Start { pattern: name, interactive }.encode(),
        "start web -i"
    );
}

#[test]
fn bad_pairs_are_rejected() {
    assert!(parse_pairs(&["noequals".to_string()]).is_err());
    assert!(parse_pairs(&["=value".to_string()]).is_err());
    assert!(parse_pairs(&["k=v".to_string()]).is_ok());
}

#[test]
fn owner_policy_is_validated_by_clap() {
    assert!(Cli::try_parse_from(["socketley", "owner", "child", "parent", "explode"]).is_err());
    let cli = Cli::parse_from(["socketley", "owner", "child", "parent", "remove"]);
    let Cmd::Owner { child, owner, policy } = cli.command else {
        panic!("wrong subcommand");
    };
    assert_eq!(
        Command::Owner { child, owner, policy }.encode(),
        "owner child parent remove"
    );
}
