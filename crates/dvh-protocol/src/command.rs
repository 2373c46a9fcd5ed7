//! Remote control command grammar
//!
//! One command per line, words separated by whitespace:
//!
//! ```text
//! mode <idle|lockout|protocol> [pin]
//! enable <protocol> <0|1>
//! disable <protocol>
//! status
//! ```
//!
//! Keywords are case-insensitive.

use crate::error::CommandError;
use crate::Protocol;

/// Target of a `mode` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTarget {
    Idle,
    Lockout,
    Protocol(Protocol),
}

/// A parsed remote control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Force the channel into a mode; `pin` also replaces the fixed mode
    Mode { target: ModeTarget, pin: bool },
    /// Enable or disable one protocol
    Enable { protocol: Protocol, enabled: bool },
    /// Report the current channel state
    Status,
}

impl RemoteCommand {
    /// Parse one command line
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?.to_ascii_lowercase();
        let args: Vec<&str> = words.collect();

        match verb.as_str() {
            "mode" => parse_mode(&args),
            "enable" => {
                let [protocol, flag] = args.as_slice() else {
                    return Err(CommandError::Malformed(
                        "usage: enable <protocol> <0|1>".into(),
                    ));
                };
                let protocol: Protocol = protocol.parse()?;
                let enabled = match *flag {
                    "1" => true,
                    "0" => false,
                    other => {
                        return Err(CommandError::Malformed(format!(
                            "expected 0 or 1, got {}",
                            other
                        )))
                    }
                };
                Ok(Self::Enable { protocol, enabled })
            }
            "disable" => {
                let [protocol] = args.as_slice() else {
                    return Err(CommandError::Malformed("usage: disable <protocol>".into()));
                };
                Ok(Self::Enable {
                    protocol: protocol.parse()?,
                    enabled: false,
                })
            }
            "status" if args.is_empty() => Ok(Self::Status),
            "status" => Err(CommandError::Malformed("status takes no arguments".into())),
            _ => Err(CommandError::UnknownCommand(verb)),
        }
    }
}

fn parse_mode(args: &[&str]) -> Result<RemoteCommand, CommandError> {
    let (target, pin) = match args {
        [target] => (*target, false),
        [target, flag] if flag.eq_ignore_ascii_case("pin") => (*target, true),
        [_, flag] => {
            return Err(CommandError::Malformed(format!(
                "unexpected argument: {}",
                flag
            )))
        }
        _ => {
            return Err(CommandError::Malformed(
                "usage: mode <idle|lockout|protocol> [pin]".into(),
            ))
        }
    };

    let target = match target.to_ascii_lowercase().as_str() {
        "idle" => ModeTarget::Idle,
        "lockout" => ModeTarget::Lockout,
        "error" => return Err(CommandError::InvalidMode(target.to_string())),
        _ => ModeTarget::Protocol(target.parse()?),
    };

    Ok(RemoteCommand::Mode { target, pin })
}
