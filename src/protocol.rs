//! Line protocol commands.
//!
//! One command per `\n`-terminated line. The command word runs up to the
//! first space; for `enq` everything after `"enq "` is the payload.

/// Reply to `version`.
pub const PROTOCOL_VERSION: &str = "2.0";
/// Reply to `deq` on an empty queue.
pub const NIL: &[u8] = b"NIL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enq(Vec<u8>),
    Deq,
    Stats,
    Version,
    Quit,
    Unknown,
}

impl Command {
    /// Parses one raw line, with or without its line terminator.
    pub fn parse(line: &[u8]) -> Self {
        let line = strip_terminator(line);
        let (word, rest) = match line.iter().position(|&b| b == b' ') {
            Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
            None => (line, None),
        };
        match word {
            b"enq" => Command::Enq(rest.map(<[u8]>::to_vec).unwrap_or_default()),
            b"deq" => Command::Deq,
            b"stats" => Command::Stats,
            b"version" => Command::Version,
            b"quit" => Command::Quit,
            _ => Command::Unknown,
        }
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
