mod error;
pub use error::{RestError, Result, TransportError};

mod route;
pub use route::Route;

pub mod ratelimit;
pub use ratelimit::{Acquire, Permit, RateLimiter};

mod request;
pub use request::{PreparedRequest, RawResponse, Request, Response};

mod transport;
pub use transport::{ReqwestTransport, Transport};

mod options;
pub use options::{DispatcherOptions, DEFAULT_API_URL};

mod dispatcher;
pub use dispatcher::RequestDispatcher;

pub use reqwest::{header, Method, StatusCode};
