//! Event filtering for the rule source watcher.

use std::ffi::OsStr;

use notify::{Event, EventKind};

/// Whether `event` touches the watched file.
pub(super) fn is_relevant(event: &Event, file_name: &OsStr) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    );
    kind_matches
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name))
}
