//! Mapping between location paths and session identifiers.

use agent_chat_core::SessionId;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Path of the "no session" view.
pub const ROOT_PATH: &str = "/";

const SESSIONS_PREFIX: &str = "/sessions/";

/// Everything except unreserved characters is escaped in the id segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Derive the session identifier from a path of the form `/sessions/<id>`.
///
/// `<id>` must be a single non-empty segment; it is percent-decoded.
#[must_use]
pub fn derive_session_id(path: &str) -> Option<SessionId> {
    let segment = path.strip_prefix(SESSIONS_PREFIX)?;
    if segment.is_empty() || segment.contains('/') {
        return None;
    }
    let decoded = percent_decode_str(segment).decode_utf8().ok()?;
    SessionId::parse(&decoded)
}

/// Build the location path for a session.
#[must_use]
pub fn session_path(id: &SessionId) -> String {
    format!("{SESSIONS_PREFIX}{}", utf8_percent_encode(id.as_str(), SEGMENT))
}

/// Build the location path for an optional session.
#[must_use]
pub fn path_for(session: Option<&SessionId>) -> String {
    session.map_or_else(|| ROOT_PATH.to_owned(), session_path)
}
