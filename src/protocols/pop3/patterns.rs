//! POP3 client command recognition
//!
//! A prebuilt anchored multi-pattern matcher over the fixed set of client
//! command prefixes. A command counts only when its pattern sits at the
//! very start of the current window; a window that matches nothing means
//! the flow speaks some other protocol.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, Anchored, Input, MatchKind, StartKind};

/// Recognized client commands. Spelling variants that carry their own line
/// terminator are separate entries so the matcher consumes them whole.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    User,
    Pass,
    Apop,
    /// `AUTH ` with an argument following
    Auth,
    /// Bare `AUTH` capability probe, CRLF / LF / trailing-space spellings
    AuthCrlf,
    AuthLf,
    AuthSpCrlf,
    AuthSpLf,
    StlsCrlf,
    StlsLf,
    Dele,
    ListArg,
    ListCrlf,
    ListLf,
    NoopCrlf,
    NoopLf,
    QuitCrlf,
    QuitLf,
    Retr,
    StatCrlf,
    StatLf,
    RsetCrlf,
    RsetLf,
    Top,
    UidlArg,
    UidlCrlf,
    UidlLf,
    CapaCrlf,
    CapaLf,
}

impl Command {
    /// Whether this command belongs to the transaction phase. Seeing one
    /// while the flow is in that phase is the positive POP3 confirmation.
    pub fn is_transaction(self) -> bool {
        !matches!(
            self,
            Command::User
                | Command::Pass
                | Command::Apop
                | Command::Auth
                | Command::AuthCrlf
                | Command::AuthLf
                | Command::AuthSpCrlf
                | Command::AuthSpLf
                | Command::StlsCrlf
                | Command::StlsLf
        )
    }
}

struct PatternEntry {
    cmd: Command,
    bytes: &'static [u8],
    /// The pattern already includes its line terminator.
    ends_line: bool,
}

/// Order matters: on a tie at offset 0 the matcher prefers the earliest
/// entry, which keeps `AUTH ` ahead of its bare trailing-space spellings.
const PATTERNS: &[PatternEntry] = &[
    PatternEntry { cmd: Command::User, bytes: b"USER ", ends_line: false },
    PatternEntry { cmd: Command::Pass, bytes: b"PASS ", ends_line: false },
    PatternEntry { cmd: Command::Apop, bytes: b"APOP ", ends_line: false },
    PatternEntry { cmd: Command::Auth, bytes: b"AUTH ", ends_line: false },
    PatternEntry { cmd: Command::AuthCrlf, bytes: b"AUTH\r\n", ends_line: true },
    PatternEntry { cmd: Command::AuthLf, bytes: b"AUTH\n", ends_line: true },
    PatternEntry { cmd: Command::AuthSpCrlf, bytes: b"AUTH \r\n", ends_line: true },
    PatternEntry { cmd: Command::AuthSpLf, bytes: b"AUTH \n", ends_line: true },
    PatternEntry { cmd: Command::StlsCrlf, bytes: b"STLS\r\n", ends_line: true },
    PatternEntry { cmd: Command::StlsLf, bytes: b"STLS\n", ends_line: true },
    PatternEntry { cmd: Command::Dele, bytes: b"DELE ", ends_line: false },
    PatternEntry { cmd: Command::ListArg, bytes: b"LIST ", ends_line: false },
    PatternEntry { cmd: Command::ListCrlf, bytes: b"LIST\r\n", ends_line: true },
    PatternEntry { cmd: Command::ListLf, bytes: b"LIST\n", ends_line: true },
    PatternEntry { cmd: Command::NoopCrlf, bytes: b"NOOP\r\n", ends_line: true },
    PatternEntry { cmd: Command::NoopLf, bytes: b"NOOP\n", ends_line: true },
    PatternEntry { cmd: Command::QuitCrlf, bytes: b"QUIT\r\n", ends_line: true },
    PatternEntry { cmd: Command::QuitLf, bytes: b"QUIT\n", ends_line: true },
    PatternEntry { cmd: Command::Retr, bytes: b"RETR ", ends_line: false },
    PatternEntry { cmd: Command::StatCrlf, bytes: b"STAT\r\n", ends_line: true },
    PatternEntry { cmd: Command::StatLf, bytes: b"STAT\n", ends_line: true },
    PatternEntry { cmd: Command::RsetCrlf, bytes: b"RSET\r\n", ends_line: true },
    PatternEntry { cmd: Command::RsetLf, bytes: b"RSET\n", ends_line: true },
    PatternEntry { cmd: Command::Top, bytes: b"TOP ", ends_line: false },
    PatternEntry { cmd: Command::UidlArg, bytes: b"UIDL ", ends_line: false },
    PatternEntry { cmd: Command::UidlCrlf, bytes: b"UIDL\r\n", ends_line: true },
    PatternEntry { cmd: Command::UidlLf, bytes: b"UIDL\n", ends_line: true },
    PatternEntry { cmd: Command::CapaCrlf, bytes: b"CAPA\r\n", ends_line: true },
    PatternEntry { cmd: Command::CapaLf, bytes: b"CAPA\n", ends_line: true },
];

/// A recognized command and how many bytes its pattern consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandMatch {
    pub cmd: Command,
    pub len: usize,
    pub ends_line: bool,
}

/// Anchored matcher over the client command patterns. Built once per
/// detector and shared read-only afterwards.
pub struct CommandMatcher {
    automaton: AhoCorasick,
}

impl CommandMatcher {
    pub fn new() -> Self {
        let automaton = AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostFirst)
            .start_kind(StartKind::Anchored)
            .build(PATTERNS.iter().map(|entry| entry.bytes))
            .expect("failed to build POP3 command automaton");
        Self { automaton }
    }

    /// Match a command pattern anchored at the start of `window`.
    pub fn find(&self, window: &[u8]) -> Option<CommandMatch> {
        let input = Input::new(window).anchored(Anchored::Yes);
        self.automaton.find(input).map(|m| {
            let entry = &PATTERNS[m.pattern().as_usize()];
            CommandMatch {
                cmd: entry.cmd,
                len: entry.bytes.len(),
                ends_line: entry.ends_line,
            }
        })
    }
}

impl Default for CommandMatcher {
    fn default() -> Self {
        Self::new()
    }
}
