#![forbid(unsafe_code)]

use roomsync_domain::{EventId, ResourceKind};

use crate::server::http::parse_updates_query;

#[test]
fn missing_query_means_fresh_cursor_and_no_extras() {
	let (since, extras) = parse_updates_query(None);
	assert_eq!(since, EventId::ZERO);
	assert!(extras.is_empty());
}

#[test]
fn since_and_extras_parse_together() {
	let (since, extras) = parse_updates_query(Some("since=42&extras=knocks,friends"));
	assert_eq!(since, EventId(42));
	assert_eq!(extras, vec![ResourceKind::Knocks, ResourceKind::Friends]);
}

#[test]
fn unparsable_since_falls_back_to_resend_everything() {
	let (since, _) = parse_updates_query(Some("since=banana"));
	assert_eq!(since, EventId::ZERO);
}

#[test]
fn unknown_extras_entries_are_skipped() {
	let (_, extras) = parse_updates_query(Some("extras=knocks,unheard_of,whispers_summary"));
	assert_eq!(extras, vec![ResourceKind::Knocks, ResourceKind::WhispersSummary]);
}

#[test]
fn unrelated_query_keys_are_ignored() {
	let (since, extras) = parse_updates_query(Some("foo=bar&since=7"));
	assert_eq!(since, EventId(7));
	assert!(extras.is_empty());
}
