//! The reconcile decision table.
//!
//! Pure function of three checksums so every branch can be tested without a
//! server, an editor or a socket.

use crate::checksum::Checksum;
use serde::Serialize;

/// What a reconcile should do after fetching the server copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconcileAction {
    /// Neither side changed.
    Noop,
    /// Only the local text changed: push it.
    PushLocal,
    /// Only the server copy changed: take it.
    AdoptRemote,
    /// Both changed: remote wins, local text goes to the clipboard.
    Conflict,
    /// Both changed to the same text: adopt the remote checksum.
    AlreadyConverged,
}

/// Decide how to reconcile.
///
/// | remote == last_known | local == last_known | action        |
/// |----------------------|---------------------|---------------|
/// | yes                  | yes                 | `Noop`        |
/// | yes                  | no                  | `PushLocal`   |
/// | no                   | yes                 | `AdoptRemote` |
/// | no                   | no                  | `Conflict`    |
///
/// Identical local and remote text short-circuits to `Noop` or
/// `AlreadyConverged`. A session that never fetched (`last_known` is None)
/// has nothing worth keeping and adopts the remote copy.
pub fn decide(last_known: Option<Checksum>, remote: Checksum, local: Checksum) -> ReconcileAction {
    if local == remote {
        return if last_known == Some(remote) {
            ReconcileAction::Noop
        } else {
            ReconcileAction::AlreadyConverged
        };
    }

    let Some(known) = last_known else {
        return ReconcileAction::AdoptRemote;
    };

    match (remote == known, local == known) {
        (true, true) => ReconcileAction::Noop,
        (true, false) => ReconcileAction::PushLocal,
        (false, true) => ReconcileAction::AdoptRemote,
        (false, false) => ReconcileAction::Conflict,
    }
}
