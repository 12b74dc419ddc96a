use thiserror::Error;

/// Unified error taxonomy for the notification dispatch core.
///
/// Each crate in the workspace converts its own internal errors into one of
/// these kinds at the boundary where the error becomes observable to a
/// caller or to the scheduler's control flow.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    #[error("invalid send strategy: {0}")]
    InvalidSendStrategy(String),

    #[error("biz id not found: {0}")]
    BizIdNotFound(u64),

    #[error("biz conf not found for biz id {0}")]
    BizConfNotFound(u64),

    #[error("channel template not found: {0}")]
    ChannelTplNotFound(u64),

    #[error("channel template version not found: {0}")]
    ChannelTplVersionNotFound(u64),

    #[error("template version not approved: {0}")]
    NotApprovedTplVersion(u64),

    #[error("notification not found: {0}")]
    NotificationNotFound(u64),

    #[error("no available provider for channel")]
    NoAvailableProvider,

    #[error("insufficient quota for tenant {tenant_id} channel {channel}")]
    InsufficientQuota { tenant_id: u64, channel: String },

    #[error("duplicate notification id: {0}")]
    DuplicateNotificationId(u64),

    #[error("failed to send notification: {0}")]
    FailedToSend(String),

    #[error("failed to create callback log: {0}")]
    FailedToCreateCallbackLog(String),

    #[error("resource semaphore exceeded its acquire limit")]
    AcquireExceedLimit,

    #[error("error-rate threshold exceeded")]
    EventThresholdExceeded,

    #[error("version conflict on optimistic update")]
    Conflict,

    #[error("store error: {0}")]
    Store(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;

impl NotifyError {
    /// Maps a kind to the HTTP status the API layer should surface, per the
    /// error taxonomy's propagation column.
    pub fn status_code(&self) -> u16 {
        match self {
            NotifyError::InvalidParam(_)
            | NotifyError::InvalidChannel(_)
            | NotifyError::InvalidSendStrategy(_) => 400,
            NotifyError::BizIdNotFound(_)
            | NotifyError::BizConfNotFound(_)
            | NotifyError::ChannelTplNotFound(_)
            | NotifyError::ChannelTplVersionNotFound(_)
            | NotifyError::NotificationNotFound(_) => 404,
            NotifyError::NotApprovedTplVersion(_) => 409,
            NotifyError::Conflict => 409,
            NotifyError::InsufficientQuota { .. } => 429,
            NotifyError::NoAvailableProvider | NotifyError::FailedToSend(_) => 502,
            NotifyError::DuplicateNotificationId(_) => 409,
            _ => 500,
        }
    }
}
