#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown event kind: {0}")]
	UnknownEventKind(String),
	#[error("unknown resource kind: {0}")]
	UnknownResourceKind(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
	/// Create a non-empty `RoomId`. The literal `broadcast` is reserved
	/// for the broadcast scope and rejected as a room id.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		if id == RoomScope::BROADCAST {
			return Err(ParseIdError::InvalidFormat("\"broadcast\" is a reserved scope".into()));
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for RoomId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for RoomId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		RoomId::new(s.to_string())
	}
}

/// User identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
	/// Create a non-empty `UserId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for UserId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		UserId::new(s.to_string())
	}
}

/// Monotonic event-log position. `EventId(0)` means "from the beginning".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl EventId {
	pub const ZERO: EventId = EventId(0);

	pub fn as_i64(self) -> i64 {
		self.0
	}
}

impl fmt::Display for EventId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Scope of an event: one room, or every room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomScope {
	Room(RoomId),
	Broadcast,
}

impl RoomScope {
	/// Stable column value for the broadcast scope.
	pub const BROADCAST: &'static str = "broadcast";

	pub fn as_str(&self) -> &str {
		match self {
			RoomScope::Room(id) => id.as_str(),
			RoomScope::Broadcast => Self::BROADCAST,
		}
	}

	/// Parse a stored scope column value.
	pub fn parse(s: &str) -> Result<Self, ParseIdError> {
		if s == Self::BROADCAST {
			return Ok(RoomScope::Broadcast);
		}
		Ok(RoomScope::Room(RoomId::new(s.to_string())?))
	}
}

impl fmt::Display for RoomScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl From<RoomId> for RoomScope {
	fn from(id: RoomId) -> Self {
		RoomScope::Room(id)
	}
}

/// Typed kinds appended to the event log. Closed set; collaborators that
/// need a new kind add a variant here rather than inventing strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
	Message,
	Whisper,
	Mention,
	Knock,
	UserJoin,
	UserLeave,
	AfkEntered,
	AfkCleared,
	HostTransferred,
	RoomUpdate,
}

impl EventKind {
	/// Stable string identifier, used as the `events.kind` column value.
	pub const fn as_str(self) -> &'static str {
		match self {
			EventKind::Message => "message",
			EventKind::Whisper => "whisper",
			EventKind::Mention => "mention",
			EventKind::Knock => "knock",
			EventKind::UserJoin => "user_join",
			EventKind::UserLeave => "user_leave",
			EventKind::AfkEntered => "afk_entered",
			EventKind::AfkCleared => "afk_cleared",
			EventKind::HostTransferred => "host_transferred",
			EventKind::RoomUpdate => "room_update",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s {
			"message" => Ok(EventKind::Message),
			"whisper" => Ok(EventKind::Whisper),
			"mention" => Ok(EventKind::Mention),
			"knock" => Ok(EventKind::Knock),
			"user_join" => Ok(EventKind::UserJoin),
			"user_leave" => Ok(EventKind::UserLeave),
			"afk_entered" => Ok(EventKind::AfkEntered),
			"afk_cleared" => Ok(EventKind::AfkCleared),
			"host_transferred" => Ok(EventKind::HostTransferred),
			"room_update" => Ok(EventKind::RoomUpdate),
			other => Err(ParseIdError::UnknownEventKind(other.to_string())),
		}
	}
}

/// Named resource blocks a delta fetch can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
	Messages,
	Mentions,
	UserList,
	RoomSettings,
	Knocks,
	WhispersSummary,
	Friends,
	MyPresence,
}

impl ResourceKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			ResourceKind::Messages => "messages",
			ResourceKind::Mentions => "mentions",
			ResourceKind::UserList => "user_list",
			ResourceKind::RoomSettings => "room_settings",
			ResourceKind::Knocks => "knocks",
			ResourceKind::WhispersSummary => "whispers_summary",
			ResourceKind::Friends => "friends",
			ResourceKind::MyPresence => "my_presence",
		}
	}

	/// Whether this resource is emitted purely because its driving event
	/// kind appeared in the batch. Everything else is hash-gated.
	pub const fn is_event_exact(self) -> bool {
		matches!(self, ResourceKind::Messages | ResourceKind::Mentions)
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ResourceKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s {
			"messages" => Ok(ResourceKind::Messages),
			"mentions" => Ok(ResourceKind::Mentions),
			"user_list" => Ok(ResourceKind::UserList),
			"room_settings" => Ok(ResourceKind::RoomSettings),
			"knocks" => Ok(ResourceKind::Knocks),
			"whispers_summary" => Ok(ResourceKind::WhispersSummary),
			"friends" => Ok(ResourceKind::Friends),
			"my_presence" => Ok(ResourceKind::MyPresence),
			other => Err(ParseIdError::UnknownResourceKind(other.to_string())),
		}
	}
}

/// Server-assigned message identifier, carried inside message payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
	/// Create a new random message id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// One row of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
	pub id: EventId,
	pub scope: RoomScope,
	pub kind: EventKind,
	/// Opaque to the sync core; write-path collaborators own the encoding.
	pub payload: Vec<u8>,
	pub created_at: i64,
}

/// One (room, user) presence row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
	pub room_id: RoomId,
	pub user_id: UserId,
	pub is_host: bool,
	pub is_afk: bool,
	pub manual_afk: bool,
	pub afk_since: Option<i64>,
	pub joined_at: i64,
	pub last_activity: i64,
}

/// A room row. `host_user_id` is the host pointer; `permanent` rooms
/// survive host loss, ephemeral rooms are torn down when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
	pub id: RoomId,
	pub name: String,
	pub host_user_id: Option<UserId>,
	pub permanent: bool,
	pub created_at: i64,
}
