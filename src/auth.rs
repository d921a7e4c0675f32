//! Authentication heuristics.
//!
//! Both classifiers prefer the structured gRPC status code and fall back to
//! substring matching on the server's error text. The text match is
//! best-effort: it depends on wording the server chooses.

use tonic::Code;

use crate::error::AuthFailureKind;
use crate::transport::TransportError;

/// What a failed anonymous `list_actions` probe revealed about the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeOutcome {
    /// The server rejected the anonymous call; authenticate.
    AuthRequired,
    /// The server has no authentication layer at all.
    NoAuthLayer,
}

/// Classifies a failed probe. `None` means the failure says nothing about
/// authentication and must be propagated.
pub(crate) fn classify_probe_failure(err: &TransportError) -> Option<ProbeOutcome> {
    match err.code() {
        Some(Code::Unauthenticated) | Some(Code::PermissionDenied) => {
            return Some(ProbeOutcome::AuthRequired)
        }
        Some(Code::Unimplemented) if mentions(err, &["authentication"]) => {
            return Some(ProbeOutcome::NoAuthLayer)
        }
        _ => {}
    }

    if mentions(err, &["unauthenticated", "unauthorized"]) {
        Some(ProbeOutcome::AuthRequired)
    } else if mentions(err, &["unimplemented"]) && mentions(err, &["authentication"]) {
        Some(ProbeOutcome::NoAuthLayer)
    } else {
        None
    }
}

/// Maps a failed handshake onto an [`AuthFailureKind`].
///
/// Specific server messages win over the generic status code so that an
/// `Unauthenticated` status saying "IP not whitelisted" is reported as such.
pub fn classify_auth_failure(err: &TransportError) -> AuthFailureKind {
    if mentions(err, &["invalid api key"]) {
        AuthFailureKind::InvalidCredential
    } else if mentions(err, &["ip not whitelisted", "access denied"]) {
        AuthFailureKind::IpNotWhitelisted
    } else if mentions(err, &["client disabled"]) {
        AuthFailureKind::ClientDisabled
    } else if err.code() == Some(Code::Unauthenticated) || mentions(err, &["unauthenticated"]) {
        AuthFailureKind::Unauthenticated
    } else {
        AuthFailureKind::Unclassified
    }
}

fn mentions(err: &TransportError, needles: &[&str]) -> bool {
    let text = err.to_string().to_lowercase();
    needles.iter().any(|needle| text.contains(needle))
}
