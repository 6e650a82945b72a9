//! IRC wire codec.
//!
//! Parses a single server line into a [`Message`]. The grammar is the
//! traditional one: optional IRCv3 tags, optional `:nick!user@host` prefix,
//! a command, space-delimited middle parameters, and an optional trailing
//! parameter after a colon. Lines that don't yield a command parse to
//! `None` and are dropped by the caller.

use std::collections::HashMap;

use chrono::NaiveDateTime;

/// A parsed inbound IRC message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// IRCv3 tags. A tag without a value maps to `None`.
    pub tags: HashMap<String, Option<String>>,
    /// Sender nick or server name, when the line carried a prefix.
    pub src: Option<String>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub cmd: String,
    /// Middle parameters, with the trailing parameter appended. Numeric
    /// replies have their leading target parameter stripped.
    pub args: Vec<String>,
    pub trailing: Option<String>,
    /// Epoch seconds from the server `time` tag, or receipt time.
    pub time: i64,
}

/// Decode a raw line as UTF-8, falling back to Latin-1, which maps every
/// byte to a character. Trailing CR/LF is stripped.
pub fn decode_line(bytes: &[u8]) -> String {
    let s = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    };
    s.trim_end_matches(['\r', '\n']).to_string()
}

fn unescape_tag_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // Lone trailing backslash stays as-is.
            None => out.push('\\'),
        }
    }
    out
}

fn parse_tags(rawtags: &str) -> HashMap<String, Option<String>> {
    let mut tags = HashMap::new();
    if rawtags.is_empty() {
        return tags;
    }
    for pairstr in rawtags.split(';') {
        let parts: Vec<&str> = pairstr.split('=').collect();
        if parts.len() == 2 {
            tags.insert(parts[0].to_string(), Some(unescape_tag_value(parts[1])));
        } else {
            tags.insert(parts[0].to_string(), None);
        }
    }
    tags
}

fn parse_time_tag(value: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Parse one IRC line. `now` is used as the message time when there is no
/// usable `time` tag.
pub fn parse_message(line: &str, now: i64) -> Option<Message> {
    let mut rest = line;

    // Tags are only present when a space-terminated @-block leads the line.
    let mut tags = HashMap::new();
    if let Some(after) = rest.strip_prefix('@') {
        if let Some(sp) = after.find(' ') {
            tags = parse_tags(&after[..sp]);
            rest = &after[sp + 1..];
        }
    }

    // Prefix: ":src[!user[@host]]" followed by whitespace.
    let (mut src, mut user, mut host) = (None, None, None);
    if let Some(after) = rest.strip_prefix(':') {
        if let Some(ws) = after.find(' ') {
            let token = &after[..ws];
            rest = after[ws..].trim_start_matches(' ');
            match token.split_once('!') {
                Some((s, uh)) => {
                    src = Some(s.to_string());
                    match uh.split_once('@') {
                        Some((u, h)) => {
                            user = Some(u.to_string());
                            host = Some(h.to_string());
                        }
                        None => user = Some(uh.to_string()),
                    }
                }
                None => src = Some(token.to_string()),
            }
        }
    }

    let cmd_end = rest.find(' ').unwrap_or(rest.len());
    let cmd = &rest[..cmd_end];
    if cmd.is_empty() {
        return None;
    }
    rest = rest[cmd_end..].trim_start_matches(' ');

    let mut args: Vec<String> = Vec::new();
    let mut trailing: Option<String> = None;
    while !rest.is_empty() {
        if let Some(t) = rest.strip_prefix(':') {
            trailing = Some(t.to_string());
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        args.push(rest[..end].to_string());
        rest = rest[end..].trim_start_matches(' ');
    }
    if let Some(t) = &trailing {
        args.push(t.clone());
    }

    // Numeric replies name a target first; nobody downstream wants it.
    if cmd.chars().all(|c| c.is_ascii_digit()) && !args.is_empty() {
        args.remove(0);
    }

    let time = tags
        .get("time")
        .and_then(|v| v.as_deref())
        .and_then(parse_time_tag)
        .unwrap_or(now);

    Some(Message {
        tags,
        src,
        user,
        host,
        cmd: cmd.to_string(),
        args,
        trailing,
        time,
    })
}
