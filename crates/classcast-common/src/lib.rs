pub mod errors;
pub mod id;
pub mod notifications;

pub use errors::{ClasscastError, ConfigError, MeshError};
pub use id::{new_id, ParticipantId, SessionId, SESSION_CODE_LEN};
pub use notifications::{Notification, NotificationLevel};

pub type Result<T> = std::result::Result<T, ClasscastError>;
