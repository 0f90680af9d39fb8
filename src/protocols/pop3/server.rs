//! Server-direction POP3 state machine
//!
//! Consumes server-to-client bytes: the greeting, `+OK`/`-ERR` status
//! lines, SASL challenge continuations, and multi-line bodies. Status
//! lines are correlated with the client side (a pending STLS or a held
//! username), and the greeting is scanned for known vendor banners.

use std::sync::atomic::Ordering;

use thiserror::Error;
use tracing::{debug, trace};

use crate::core::{AppId, ServiceSubtype, Session, SessionFlags};

use super::line::{scan_line, LineEnd, MalformedLine};
use super::state::{ClientPhase, Pop3FlowState, ServerPhase, MAX_VERSION_LEN};
use super::Pop3Stats;

const STATUS_OK: &[u8] = b"+OK";
const STATUS_ERR: &[u8] = b"-ERR";
const BODY_TERMINATOR: &[u8] = b".\r\n";
/// Shortest payload that can carry a status prefix and its terminator.
const MIN_STATUS_LEN: usize = 5;

const VENDOR_CPPOP: &str = "cppop";
const VENDOR_CUBIC_CIRCLE: &str = "Cubic Circle";
const VENDOR_INTERMAIL: &str = "InterMail";
const VENDOR_POST_OFFICE: &str = "Post.Office";

/// Why a server payload failed to parse as POP3.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("payload too short for a status line")]
    Truncated,
    #[error("missing +OK/-ERR status prefix")]
    BadStatus,
    #[error("SASL continuation is not a single full line")]
    BadContinuation,
    #[error(transparent)]
    Malformed(#[from] MalformedLine),
}

/// Run the server state machine over one payload.
///
/// `from_service` is true when the service detector is the caller; only
/// then is the greeting scanned for vendor signatures.
pub(super) fn feed(
    state: &mut Pop3FlowState, session: &mut Session, payload: &[u8], from_service: bool,
    stats: &Pop3Stats,
) -> Result<(), ResponseError> {
    let mut pos = 0usize;
    let mut greeting = false;

    if state.server == ServerPhase::Greeting {
        state.server = ServerPhase::Status;
        greeting = true;
    }

    if state.server == ServerPhase::Status {
        if !greeting && payload.starts_with(b"+ ") {
            // SASL challenge continuation: exactly one full line, nothing
            // after it.
            pos = 2;
            return match scan_line(payload, &mut pos)? {
                LineEnd::Complete if pos == payload.len() => Ok(()),
                _ => Err(ResponseError::BadContinuation),
            };
        }

        if payload.len() < MIN_STATUS_LEN {
            return Err(ResponseError::Truncated);
        }
        if payload.starts_with(STATUS_OK) {
            pos = STATUS_OK.len();
            state.last_error = false;
        } else if payload.starts_with(STATUS_ERR) {
            pos = STATUS_ERR.len();
            state.last_error = true;
            // An error greeting carries no vendor banner.
            greeting = false;
        } else {
            return Err(ResponseError::BadStatus);
        }

        // A status line cut short by the end of the payload still counts.
        scan_line(payload, &mut pos)?;

        correlate(state, session, stats);

        if from_service && greeting {
            let line = status_line(&payload[..pos]);
            scan_greeting(state, line);
        }

        if pos >= payload.len() {
            state.responses += 1;
            return Ok(());
        }
        state.server = ServerPhase::Body;
    }

    while pos < payload.len() {
        if &payload[pos..] == BODY_TERMINATOR {
            state.responses += 1;
            state.server = ServerPhase::Status;
            trace!(responses = state.responses, "pop3 multi-line body complete");
            return Ok(());
        }
        if scan_line(payload, &mut pos)? == LineEnd::Truncated {
            break;
        }
    }
    Ok(())
}

/// Correlate a freshly parsed status line with the client side.
fn correlate(state: &mut Pop3FlowState, session: &mut Session, stats: &Pop3Stats) {
    if state.client == ClientPhase::StlsPending {
        if state.last_error {
            // Refusal is not an error; back to plaintext authorization.
            state.client = ClientPhase::Authorization;
        } else {
            debug!("stls accepted, flow continues under tls");
            session.set_flag(SessionFlags::ENCRYPTED);
            session.clear_flag(SessionFlags::CLIENT_GETS_SERVER_PACKETS);
            session.add_app(AppId::Pop3s, AppId::Pop3s, None);
            stats.pop3s_clients.fetch_add(1, Ordering::Relaxed);
        }
    } else if let Some(username) = state.username.take() {
        // Only reachable through non-TLS authentication, hence POP3.
        if state.last_error {
            session.add_user(username, AppId::Pop3, false);
        } else {
            session.add_user(username, AppId::Pop3, true);
            state.need_continue = false;
            session.clear_flag(SessionFlags::CLIENT_GETS_SERVER_PACKETS);
            state.got_user = true;
            if state.detected {
                session.set_flag(SessionFlags::CLIENT_DETECTED);
            }
        }
    }
}

/// Strip the trailing CRLF (or a bare trailing CR on a truncated line)
/// from a status-line slice.
fn status_line(mut line: &[u8]) -> &[u8] {
    if line.ends_with(b"\n") {
        line = &line[..line.len() - 1];
    }
    if line.ends_with(b"\r") {
        line = &line[..line.len() - 1];
    }
    line
}

fn find_sub(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// End of the space-delimited token starting at `from`.
fn token_end(line: &[u8], from: usize) -> usize {
    let mut i = from;
    while i < line.len() && line[i] != b' ' {
        i += 1;
    }
    i
}

fn ascii_owned(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn set_version(state: &mut Pop3FlowState, bytes: &[u8]) {
    state.version.clear();
    for &byte in bytes.iter().take(MAX_VERSION_LEN) {
        state.version.push(byte as char);
    }
}

/// Look for a known vendor signature in the greeting line and capture
/// vendor, version, and any advertised add-on service.
fn scan_greeting(state: &mut Pop3FlowState, line: &[u8]) {
    if let Some(at) = find_sub(line, VENDOR_CPPOP.as_bytes()) {
        state.vendor = Some(VENDOR_CPPOP);
        let mut p = at + VENDOR_CPPOP.len();
        if line.get(p) == Some(&b' ') {
            p += 1;
            let start = p;
            while p < line.len() && line[p] != b']' {
                p += 1;
            }
            if p < line.len() {
                set_version(state, &line[start..p]);
            } else {
                state.version.clear();
            }
        }
    } else if let Some(at) = find_sub(line, VENDOR_CUBIC_CIRCLE.as_bytes()) {
        state.vendor = Some(VENDOR_CUBIC_CIRCLE);
        let p = at + VENDOR_CUBIC_CIRCLE.len();
        if line[p..].starts_with(b"'s v") {
            let start = p + 4;
            let end = token_end(line, start);
            if end < line.len() {
                set_version(state, &line[start..end]);
            } else {
                state.version.clear();
            }
        }
    } else if find_sub(line, VENDOR_INTERMAIL.as_bytes()).is_some() {
        state.vendor = Some(VENDOR_INTERMAIL);
    } else if let Some(at) = find_sub(line, VENDOR_POST_OFFICE.as_bytes()) {
        state.vendor = Some(VENDOR_POST_OFFICE);
        scan_post_office(state, line, at + VENDOR_POST_OFFICE.len());
    }
    if let Some(vendor) = state.vendor {
        trace!(vendor, version = %state.version, "pop3 vendor banner");
    }
}

/// Post.Office banners: `Post.Office v<ver>[ release <rel>][ with <svc>
/// [ version <ver>]]`. Version and release are folded into one version
/// string; the add-on service becomes a subtype entry.
fn scan_post_office(state: &mut Pop3FlowState, line: &[u8], p: usize) {
    if !line[p..].starts_with(b" v") {
        return;
    }
    let ver_start = p + 2;
    let ver_end = token_end(line, ver_start);
    if ver_end == ver_start {
        return;
    }

    if !line[ver_end..].starts_with(b" release ") {
        set_version(state, &line[ver_start..ver_end]);
        return;
    }
    let rel_start = ver_end + " release ".len();
    let rel_end = token_end(line, rel_start);
    if rel_end == rel_start {
        set_version(state, &line[ver_start..ver_end]);
        return;
    }
    set_version(state, &line[ver_start..rel_end]);

    if !line[rel_end..].starts_with(b" with ") {
        return;
    }
    let svc_start = rel_end + " with ".len();
    let svc_end = token_end(line, svc_start);
    if svc_end == svc_start {
        return;
    }
    let mut subtype = ServiceSubtype {
        service: ascii_owned(&line[svc_start..svc_end]),
        version: None,
    };
    if line[svc_end..].starts_with(b" version ") {
        let sub_ver_start = svc_end + " version ".len();
        let sub_ver_end = token_end(line, sub_ver_start);
        if sub_ver_end > sub_ver_start {
            subtype.version = Some(ascii_owned(&line[sub_ver_start..sub_ver_end]));
        }
    }
    state.subtypes.push(subtype);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(
        state: &mut Pop3FlowState, session: &mut Session, payload: &[u8], from_service: bool,
    ) -> Result<(), ResponseError> {
        let stats = Pop3Stats::default();
        feed(state, session, payload, from_service, &stats)
    }

    fn greet(state: &mut Pop3FlowState, session: &mut Session, payload: &[u8]) {
        run(state, session, payload, true).expect("greeting should parse");
    }

    #[test]
    fn test_single_line_response_counts() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        greet(&mut state, &mut session, b"+OK POP3 server ready\r\n");
        assert_eq!(state.responses, 1);
        assert_eq!(state.server, ServerPhase::Status);
        assert!(!state.last_error);
    }

    #[test]
    fn test_err_response_sets_error() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        run(&mut state, &mut session, b"-ERR no such user\r\n", true).unwrap();
        assert!(state.last_error);
        assert_eq!(state.responses, 1);
    }

    #[test]
    fn test_garbage_status_fails() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        assert_eq!(
            run(&mut state, &mut session, b"220 smtp.example.com\r\n", true),
            Err(ResponseError::BadStatus)
        );
    }

    #[test]
    fn test_short_payload_fails() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        assert_eq!(
            run(&mut state, &mut session, b"+OK", true),
            Err(ResponseError::Truncated)
        );
    }

    #[test]
    fn test_truncated_status_line_still_counts() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        run(&mut state, &mut session, b"+OK ready with no line end", true).unwrap();
        assert_eq!(state.responses, 1);
        assert_eq!(state.server, ServerPhase::Status);
    }

    #[test]
    fn test_multi_line_body_counts_once() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        greet(&mut state, &mut session, b"+OK ready\r\n");
        run(
            &mut state,
            &mut session,
            b"+OK 2 messages\r\n1 120\r\n2 340\r\n.\r\n",
            true,
        )
        .unwrap();

        assert_eq!(state.responses, 2);
        assert_eq!(state.server, ServerPhase::Status);
    }

    #[test]
    fn test_body_split_across_payloads() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        greet(&mut state, &mut session, b"+OK ready\r\n");
        run(&mut state, &mut session, b"+OK 2 messages\r\n1 120\r\n", true).unwrap();
        assert_eq!(state.server, ServerPhase::Body);
        assert_eq!(state.responses, 1);

        run(&mut state, &mut session, b"2 340\r\n", true).unwrap();
        assert_eq!(state.server, ServerPhase::Body);

        run(&mut state, &mut session, b".\r\n", true).unwrap();
        assert_eq!(state.responses, 2);
        assert_eq!(state.server, ServerPhase::Status);
    }

    #[test]
    fn test_malformed_body_line_fails() {
        let mut state = Pop3FlowState {
            server: ServerPhase::Body,
            ..Default::default()
        };
        let mut session = Session::new();

        assert!(run(&mut state, &mut session, b"\x00\x01binary\r\n", true).is_err());
    }

    #[test]
    fn test_sasl_continuation_single_line() {
        let mut state = Pop3FlowState {
            server: ServerPhase::Status,
            ..Default::default()
        };
        let mut session = Session::new();

        run(&mut state, &mut session, b"+ PDc0MjY4Pg==\r\n", true).unwrap();
        // Challenges do not complete a response.
        assert_eq!(state.responses, 0);
    }

    #[test]
    fn test_sasl_continuation_with_trailing_bytes_fails() {
        let mut state = Pop3FlowState {
            server: ServerPhase::Status,
            ..Default::default()
        };
        let mut session = Session::new();

        assert_eq!(
            run(&mut state, &mut session, b"+ abc\r\n+OK done\r\n", true),
            Err(ResponseError::BadContinuation)
        );
    }

    #[test]
    fn test_stls_accept_reports_pop3s() {
        let mut state = Pop3FlowState {
            server: ServerPhase::Status,
            client: ClientPhase::StlsPending,
            ..Default::default()
        };
        let mut session = Session::new();
        session.set_flag(SessionFlags::CLIENT_GETS_SERVER_PACKETS);

        run(&mut state, &mut session, b"+OK begin TLS\r\n", true).unwrap();

        assert!(session.has_flag(SessionFlags::ENCRYPTED));
        assert!(!session.has_flag(SessionFlags::CLIENT_GETS_SERVER_PACKETS));
        assert_eq!(session.client_apps().len(), 1);
        assert_eq!(session.client_apps()[0].client, AppId::Pop3s);
        assert_eq!(state.client, ClientPhase::StlsPending);
    }

    #[test]
    fn test_stls_refusal_reverts_to_authorization() {
        let mut state = Pop3FlowState {
            server: ServerPhase::Status,
            client: ClientPhase::StlsPending,
            ..Default::default()
        };
        let mut session = Session::new();

        run(&mut state, &mut session, b"-ERR not supported\r\n", true).unwrap();

        assert_eq!(state.client, ClientPhase::Authorization);
        assert!(!session.has_flag(SessionFlags::ENCRYPTED));
        assert!(session.client_apps().is_empty());
    }

    #[test]
    fn test_login_success_surrenders_username() {
        let mut state = Pop3FlowState {
            server: ServerPhase::Status,
            username: Some("alice".to_string()),
            ..Default::default()
        };
        let mut session = Session::new();
        session.set_flag(SessionFlags::CLIENT_GETS_SERVER_PACKETS);

        run(&mut state, &mut session, b"+OK logged in\r\n", true).unwrap();

        assert!(state.username.is_none());
        assert!(state.got_user);
        assert!(!state.need_continue);
        assert!(!session.has_flag(SessionFlags::CLIENT_GETS_SERVER_PACKETS));
        assert_eq!(session.users().len(), 1);
        assert_eq!(session.users()[0].username, "alice");
        assert_eq!(session.users()[0].app, AppId::Pop3);
        assert!(session.users()[0].success);
    }

    #[test]
    fn test_login_failure_surrenders_username_as_failed() {
        let mut state = Pop3FlowState {
            server: ServerPhase::Status,
            username: Some("alice".to_string()),
            ..Default::default()
        };
        let mut session = Session::new();

        run(&mut state, &mut session, b"-ERR auth failed\r\n", true).unwrap();

        assert!(state.username.is_none());
        assert!(!state.got_user);
        assert_eq!(session.users().len(), 1);
        assert!(!session.users()[0].success);
    }

    #[test]
    fn test_greeting_vendor_cppop() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        greet(&mut state, &mut session, b"+OK [cppop 23.4] ready\r\n");
        assert_eq!(state.vendor, Some("cppop"));
        assert_eq!(state.version, "23.4");
    }

    #[test]
    fn test_greeting_vendor_cppop_unterminated_version() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        greet(&mut state, &mut session, b"+OK cppop 23.4\r\n");
        assert_eq!(state.vendor, Some("cppop"));
        assert!(state.version.is_empty());
    }

    #[test]
    fn test_greeting_vendor_cubic_circle() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        greet(
            &mut state,
            &mut session,
            b"+OK Cubic Circle's v1.22 POP3 ready\r\n",
        );
        assert_eq!(state.vendor, Some("Cubic Circle"));
        assert_eq!(state.version, "1.22");
    }

    #[test]
    fn test_greeting_vendor_intermail() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        greet(
            &mut state,
            &mut session,
            b"+OK InterMail POP3 server ready\r\n",
        );
        assert_eq!(state.vendor, Some("InterMail"));
        assert!(state.version.is_empty());
    }

    #[test]
    fn test_greeting_vendor_post_office_full() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        greet(
            &mut state,
            &mut session,
            b"+OK Post.Office v3.5.3 release 223 with Rutger version 1.0\r\n",
        );

        assert_eq!(state.vendor, Some("Post.Office"));
        assert_eq!(state.version, "3.5.3 release 223");
        assert_eq!(state.subtypes.len(), 1);
        assert_eq!(state.subtypes[0].service, "Rutger");
        assert_eq!(state.subtypes[0].version.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_greeting_vendor_post_office_version_only() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        greet(&mut state, &mut session, b"+OK Post.Office v3.1\r\n");
        assert_eq!(state.vendor, Some("Post.Office"));
        assert_eq!(state.version, "3.1");
        assert!(state.subtypes.is_empty());
    }

    #[test]
    fn test_greeting_vendor_skipped_for_client_caller() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        run(&mut state, &mut session, b"+OK [cppop 23.4] ready\r\n", false).unwrap();
        assert!(state.vendor.is_none());
    }

    #[test]
    fn test_err_greeting_skips_vendor_scan() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        run(&mut state, &mut session, b"-ERR cppop 23.4 busy\r\n", true).unwrap();
        assert!(state.vendor.is_none());
    }

    #[test]
    fn test_version_capped() {
        let mut state = Pop3FlowState::default();
        let mut session = Session::new();

        let mut greeting = b"+OK [cppop ".to_vec();
        greeting.extend(std::iter::repeat(b'9').take(MAX_VERSION_LEN + 20));
        greeting.extend_from_slice(b"] ready\r\n");

        greet(&mut state, &mut session, &greeting);
        assert_eq!(state.version.len(), MAX_VERSION_LEN);
    }
}
