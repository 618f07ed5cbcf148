//! Classification of error replies.
//!
//! Cluster nodes signal routing conditions through plain error lines:
//!
//! - `MOVED <slot> <host>:<port>`: the slot has a new permanent owner
//! - `ASK <slot> <host>:<port>`: the slot is migrating, so retry this key
//!   once on the named node, prefixed with `ASKING`
//! - `TRYAGAIN ...` / `CLUSTERDOWN ...`: the cluster is mid-change or degraded
//!
//! Everything else is an application error (`WRONGTYPE`, `ERR`, ...)
//! identified by its first word.

/// A decoded error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorReply {
    /// Permanent redirect to the slot's new owner.
    Moved { slot: u16, addr: String },

    /// One-shot redirect during slot migration.
    Ask { slot: u16, addr: String },

    /// `TRYAGAIN` or `CLUSTERDOWN`: the cluster can't serve the slot right now.
    TryAgain(String),

    /// Application error, e.g. `WRONGTYPE Operation against a key ...`.
    Application { kind: String, message: String },
}

impl ErrorReply {
    /// Classifies the text of an error frame.
    pub fn parse(line: &str) -> Self {
        let (kind, rest) = match line.split_once(' ') {
            Some((kind, rest)) => (kind, rest),
            None => (line, ""),
        };

        match kind {
            "MOVED" | "ASK" => {
                if let Some((slot, addr)) = parse_redirect(rest) {
                    return if kind == "MOVED" {
                        ErrorReply::Moved { slot, addr }
                    } else {
                        ErrorReply::Ask { slot, addr }
                    };
                }
            }
            "TRYAGAIN" | "CLUSTERDOWN" => return ErrorReply::TryAgain(line.to_string()),
            _ => {}
        }

        ErrorReply::Application {
            kind: kind.to_string(),
            message: line.to_string(),
        }
    }
}

/// Parses `<slot> <host>:<port>`.
fn parse_redirect(rest: &str) -> Option<(u16, String)> {
    let mut parts = rest.split_whitespace();
    let slot = parts.next()?.parse().ok()?;
    let addr = parts.next()?;
    // host may be an IPv6 literal, so split on the last colon
    let (host, port) = addr.rsplit_once(':')?;
    port.parse::<u16>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((slot, format!("{host}:{port}")))
}
