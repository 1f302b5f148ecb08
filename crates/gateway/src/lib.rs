pub mod config;
pub mod error;
pub mod registry;
pub mod routes;
pub mod source;
pub mod state;
pub mod stream;

pub use error::ApiError;
pub use registry::{ChannelSubscriber, PushError, Subscriber, SubscriberId, SubscriberRegistry};
pub use routes::router;
pub use source::{SourceError, SourceOpener, VideoSource};
pub use state::{ApiSettings, AppState};
pub use stream::{StreamError, StreamProcessor, StreamSettings};
