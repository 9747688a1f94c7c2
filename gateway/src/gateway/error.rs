use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("gateway rejected the token")]
    AuthenticationFailed,

    #[error("gateway closed the connection with fatal code {code}: {reason}")]
    FatalClose { code: u16, reason: String },

    #[error("identify was rejected {attempts} times in a row")]
    IdentifyRejected { attempts: u32 },

    #[error("failed to connect after {attempts} attempts")]
    ConnectionFailed { attempts: u32 },

    #[error("shard {shard_id} closed before becoming ready")]
    ShardClosed { shard_id: u16 },

    #[error("timed out while connecting to the gateway")]
    ConnectTimeout,

    #[error("error while operating on websocket: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("error while operating on JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "compression")]
    #[error("error while decompressing payload: {0}")]
    Decompress(#[from] flate2::DecompressError),

    #[error("error while parsing gateway url: {0}")]
    Url(#[from] url::ParseError),

    #[error("error while performing HTTP request: {0}")]
    Rest(#[from] rest::RestError),

    #[error("error while parsing config: {0}")]
    Config(#[from] envy::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Errors after which retrying the connection can not succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::AuthenticationFailed
                | GatewayError::FatalClose { .. }
                | GatewayError::IdentifyRejected { .. }
                | GatewayError::ConnectionFailed { .. }
                | GatewayError::Config(_)
        )
    }
}

impl<T> From<GatewayError> for Result<T> {
    fn from(e: GatewayError) -> Self {
        Err(e)
    }
}
