// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control command lines: parse on the daemon side, encode on the CLI side.
//!
//! Name arguments marked "pattern" accept `*?[]` globs.

use thiserror::Error;

/// One parsed control-channel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `create <type> <name> [key=value ...]`
    Create { kind: String, name: String, options: Vec<(String, String)> },
    /// `start <pattern> [-i]`
    Start { pattern: String, interactive: bool },
    /// `stop <pattern>`
    Stop { pattern: String },
    /// `remove <pattern>`
    Remove { pattern: String },
    /// `ls`
    Ls,
    /// `ps`
    Ps,
    /// `send <name> <text>`; text is the raw remainder of the line.
    Send { name: String, text: String },
    /// `edit <pattern> <key=value ...>`
    Edit { pattern: String, options: Vec<(String, String)> },
    /// `show <name>`
    Show { name: String },
    /// `dump [pattern]`
    Dump { pattern: Option<String> },
    /// `import <path>`
    Import { path: String },
    /// `action <name> <verb> [args]`; args is the raw remainder.
    Action { name: String, verb: String, args: String },
    /// `stats [pattern]`
    Stats { pattern: Option<String> },
    /// `reload`
    Reload,
    /// `reload-lua`
    ReloadLua,
    /// `owner <child> <owner|-> [stop|remove]`
    Owner { child: String, owner: String, policy: Option<String> },
    /// `attach <name> <port> <pid>`; register an external runtime.
    Attach { name: String, port: u16, pid: u32 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("bad option (expected key=value): {0}")]
    BadOption(String),
}

impl Command {
    /// Parse one line (no trailing newline).
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches('\r');
        let mut tokens = line.split_whitespace();
        let head = tokens.next().ok_or(ParseError::Empty)?;

        match head {
            "create" => {
                let kind = tokens.next().ok_or(ParseError::Usage(USAGE_CREATE))?.to_string();
                let name = tokens.next().ok_or(ParseError::Usage(USAGE_CREATE))?.to_string();
                let options = parse_options(tokens)?;
                Ok(Command::Create { kind, name, options })
            }
            "start" => {
                let pattern = tokens.next().ok_or(ParseError::Usage("start <name> [-i]"))?;
                let interactive = match tokens.next() {
                    None => false,
                    Some("-i") => true,
                    Some(other) => return Err(ParseError::BadOption(other.to_string())),
                };
                Ok(Command::Start { pattern: pattern.to_string(), interactive })
            }
            "stop" => one_name(tokens, "stop <name>").map(|pattern| Command::Stop { pattern }),
            "remove" => {
                one_name(tokens, "remove <name>").map(|pattern| Command::Remove { pattern })
            }
            "ls" => Ok(Command::Ls),
            "ps" => Ok(Command::Ps),
            "send" => {
                let name = tokens.next().ok_or(ParseError::Usage("send <name> <text>"))?;
                let text = rest_after(line, &["send", name]);
                if text.is_empty() {
                    return Err(ParseError::Usage("send <name> <text>"));
                }
                Ok(Command::Send { name: name.to_string(), text })
            }
            "edit" => {
                let pattern =
                    tokens.next().ok_or(ParseError::Usage("edit <name> <key=value ...>"))?;
                let options = parse_options(tokens)?;
                if options.is_empty() {
                    return Err(ParseError::Usage("edit <name> <key=value ...>"));
                }
                Ok(Command::Edit { pattern: pattern.to_string(), options })
            }
            "show" => one_name(tokens, "show <name>").map(|name| Command::Show { name }),
            "dump" => Ok(Command::Dump { pattern: tokens.next().map(String::from) }),
            "import" => one_name(tokens, "import <path>").map(|path| Command::Import { path }),
            "action" => {
                let name = tokens.next().ok_or(ParseError::Usage(USAGE_ACTION))?;
                let verb = tokens.next().ok_or(ParseError::Usage(USAGE_ACTION))?;
                let args = rest_after(line, &["action", name, verb]);
                Ok(Command::Action { name: name.to_string(), verb: verb.to_string(), args })
            }
            "stats" => Ok(Command::Stats { pattern: tokens.next().map(String::from) }),
            "reload" => Ok(Command::Reload),
            "reload-lua" => Ok(Command::ReloadLua),
            "owner" => {
                let child = tokens.next().ok_or(ParseError::Usage(USAGE_OWNER))?.to_string();
                let owner = tokens.next().ok_or(ParseError::Usage(USAGE_OWNER))?.to_string();
                let policy = tokens.next().map(String::from);
                Ok(Command::Owner { child, owner, policy })
            }
            "attach" => {
                let name = tokens.next().ok_or(ParseError::Usage(USAGE_ATTACH))?.to_string();
                let port = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ParseError::Usage(USAGE_ATTACH))?;
                let pid = tokens
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or(ParseError::Usage(USAGE_ATTACH))?;
                Ok(Command::Attach { name, port, pid })
            }
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }

    /// Render the command back into its line form (no trailing newline).
    pub fn encode(&self) -> String {
        match self {
            Command::Create { kind, name, options } => {
                let mut line = format!("create {} {}", kind, name);
                for (key, value) in options {
                    line.push_str(&format!(" {}={}", key, value));
                }
                line
            }
            Command::Start { pattern, interactive: false } => format!("start {}", pattern),
            Command::Start { pattern, interactive: true } => format!("start {} -i", pattern),
            Command::Stop { pattern } => format!("stop {}", pattern),
            Command::Remove { pattern } => format!("remove {}", pattern),
            Command::Ls => "ls".to_string(),
            Command::Ps => "ps".to_string(),
            Command::Send { name, text } => format!("send {} {}", name, text),
            Command::Edit { pattern, options } => {
                let mut line = format!("edit {}", pattern);
                for (key, value) in options {
                    line.push_str(&format!(" {}={}", key, value));
                }
                line
            }
            Command::Show { name } => format!("show {}", name),
            Command::Dump { pattern: None } => "dump".to_string(),
            Command::Dump { pattern: Some(p) } => format!("dump {}", p),
            Command::Import { path } => format!("import {}", path),
            Command::Action { name, verb, args } if args.is_empty() => {
                format!("action {} {}", name, verb)
            }
            Command::Action { name, verb, args } => format!("action {} {} {}", name, verb, args),
            Command::Stats { pattern: None } => "stats".to_string(),
            Command::Stats { pattern: Some(p) } => format!("stats {}", p),
            Command::Reload => "reload".to_string(),
            Command::ReloadLua => "reload-lua".to_string(),
            Command::Owner { child, owner, policy: None } => format!("owner {} {}", child, owner),
            Command::Owner { child, owner, policy: Some(p) } => {
                format!("owner {} {} {}", child, owner, p)
            }
            Command::Attach { name, port, pid } => format!("attach {} {} {}", name, port, pid),
        }
    }
}

const USAGE_CREATE: &str = "create <type> <name> [key=value ...]";
const USAGE_ACTION: &str = "action <name> <verb> [args]";
const USAGE_OWNER: &str = "owner <child> <owner|-> [stop|remove]";
const USAGE_ATTACH: &str = "attach <name> <port> <pid>";

fn one_name<'a>(
    mut tokens: impl Iterator<Item = &'a str>,
    usage: &'static str,
) -> Result<String, ParseError> {
    tokens.next().map(String::from).ok_or(ParseError::Usage(usage))
}

fn parse_options<'a>(
    tokens: impl Iterator<Item = &'a str>,
) -> Result<Vec<(String, String)>, ParseError> {
    tokens
        .map(|token| match token.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(ParseError::BadOption(token.to_string())),
        })
        .collect()
}

/// The raw remainder of `line` after the given leading tokens.
fn rest_after(line: &str, heads: &[&str]) -> String {
    let mut offset = 0;
    for head in heads {
        if let Some(pos) = line[offset..].find(head) {
            offset += pos + head.len();
        }
    }
    line[offset..].trim_start().to_string()
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
