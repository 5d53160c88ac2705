#![forbid(unsafe_code)]

use roomsync_domain::{RoomId, UserId};
use thiserror::Error;

/// Typed failures at the engine API seam. Store-level detail stays inside
/// the transparent variant and is logged, never shown to clients.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("room not found: {0}")]
	RoomNotFound(RoomId),

	#[error("user {user} is not present in room {room}")]
	NotPresent { room: RoomId, user: UserId },

	#[error(transparent)]
	Store(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
