//! Domain types for the sync core
//!
//! Pure data: change events, protocol status codes, device identity,
//! path ownership records, and the identifier newtypes shared by every
//! protocol phase.

pub mod change_event;
pub mod device;
pub mod errors;
pub mod newtypes;
pub mod path_record;
pub mod status;

pub use change_event::{ChangeEvent, EventKind};
pub use device::{ClientDevice, PeerAddress};
pub use errors::DomainError;
pub use newtypes::{DeviceId, ExchangeId, FileId, VersionHash};
pub use path_record::{AccessType, ContentVersion, PathRecord, Sharer};
pub use status::StatusCode;
