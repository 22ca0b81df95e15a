use thiserror::Error;

/// Failure of an outbound REST call before any per-row or per-message result is known.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Errors that stop a binary from starting or keep it from running.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid configuration: {0}")]
    Config(#[from] figment::Error),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("message dispatch stopped: concurrency limiter closed")]
    DispatchClosed,
}
