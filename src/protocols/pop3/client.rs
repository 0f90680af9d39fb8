//! Client-direction POP3 state machine
//!
//! Consumes client-to-server bytes, tracks the authorization/transaction
//! phases, captures usernames, and raises the POP3 confirmation once a
//! transaction-phase command is seen while the flow is in that phase.

use std::sync::atomic::Ordering;

use tracing::{debug, trace};

use crate::core::{AppId, Session, SessionFlags};
use crate::protocols::traits::DetectorStatus;

use super::patterns::{Command, CommandMatcher};
use super::state::{ClientPhase, Pop3FlowState, MAX_USERNAME_LEN};
use super::Pop3Stats;

fn is_username_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'@' | b'-' | b'_')
}

/// Capture a username starting at `pos`.
///
/// Characters after a backtick are dropped until a separator arrives. The
/// capture is bounded to `MAX_USERNAME_LEN` and stored (replacing any
/// previous name) only when a CR, LF, or space separator is reached; the
/// space form is how APOP splits the name from its digest. Any other byte
/// ends the scan without storing. `pos` is left on the byte that ended the
/// scan.
fn capture_username(state: &mut Pop3FlowState, data: &[u8], pos: &mut usize) {
    let mut name = String::new();
    let mut tick_seen = false;

    while *pos < data.len() {
        let byte = data[*pos];
        if is_username_byte(byte) {
            if !tick_seen && name.len() < MAX_USERNAME_LEN {
                name.push(byte as char);
            }
        } else if byte == b'`' {
            tick_seen = true;
        } else if matches!(byte, b'\r' | b'\n' | b' ') {
            if !name.is_empty() {
                trace!(username = %name, "pop3 username captured");
                state.username = Some(name);
            }
            return;
        } else {
            return;
        }
        *pos += 1;
    }
}

/// Advance past the remainder of the current line.
fn skip_to_eol(data: &[u8], pos: &mut usize) {
    while *pos < data.len() && data[*pos] != b'\r' && data[*pos] != b'\n' {
        *pos += 1;
    }
}

/// Advance past a run of CR/LF bytes.
fn skip_crlf_run(data: &[u8], pos: &mut usize) {
    while *pos < data.len() && (data[*pos] == b'\r' || data[*pos] == b'\n') {
        *pos += 1;
    }
}

/// Feed one client-to-server payload through the command loop.
///
/// Returns `Success` when the flow is conclusively classified as not
/// speaking POP3; `InProcess` otherwise. The positive POP3 confirmation is
/// reported through the session, not the return value.
pub(super) fn feed(
    matcher: &CommandMatcher, state: &mut Pop3FlowState, session: &mut Session, payload: &[u8],
    stats: &Pop3Stats,
) -> DetectorStatus {
    let mut pos = 0usize;

    while pos < payload.len() {
        let Some(m) = matcher.find(&payload[pos..]) else {
            debug!("unrecognized client command, flow is not pop3");
            state.need_continue = false;
            session.set_flag(SessionFlags::CLIENT_DETECTED);
            return DetectorStatus::Success;
        };
        pos += m.len;

        match state.client {
            ClientPhase::StlsPending | ClientPhase::Authorization => {
                if state.client == ClientPhase::StlsPending {
                    // Any client command before the server's verdict
                    // abandons the pending upgrade.
                    state.client = ClientPhase::Authorization;
                }
                match m.cmd {
                    Command::StlsCrlf | Command::StlsLf => {
                        debug!("stls sent, awaiting server verdict");
                        state.client = ClientPhase::StlsPending;
                        skip_crlf_run(payload, &mut pos);
                    }
                    Command::User | Command::Apop => {
                        capture_username(state, payload, &mut pos);
                        if m.cmd == Command::Apop {
                            // APOP carries the credential digest in the
                            // same line; authentication is atomic.
                            state.client = ClientPhase::Transaction;
                        }
                        skip_to_eol(payload, &mut pos);
                        skip_crlf_run(payload, &mut pos);
                    }
                    Command::Auth => {
                        // AUTH with an argument implies non-TLS SASL; expect
                        // transaction commands next.
                        state.client = ClientPhase::Transaction;
                        skip_to_eol(payload, &mut pos);
                        skip_crlf_run(payload, &mut pos);
                    }
                    Command::AuthCrlf
                    | Command::AuthLf
                    | Command::AuthSpCrlf
                    | Command::AuthSpLf => {
                        // Capability probe; no state change.
                        skip_crlf_run(payload, &mut pos);
                    }
                    Command::Pass => {
                        if state.got_user {
                            state.client = ClientPhase::Transaction;
                        }
                        skip_to_eol(payload, &mut pos);
                        skip_crlf_run(payload, &mut pos);
                    }
                    _ => {
                        if !m.ends_line {
                            skip_to_eol(payload, &mut pos);
                        }
                        skip_crlf_run(payload, &mut pos);
                    }
                }
            }
            ClientPhase::Transaction => {
                if m.cmd.is_transaction() {
                    // Still plaintext and inside the transaction phase:
                    // this flow is POP3.
                    session.add_app(AppId::Pop3, AppId::Pop3, None);
                    state.detected = true;
                    stats.pop3_clients.fetch_add(1, Ordering::Relaxed);
                }
                if !m.ends_line {
                    skip_to_eol(payload, &mut pos);
                }
                skip_crlf_run(payload, &mut pos);
            }
        }
    }

    DetectorStatus::InProcess
}
