//! Rift gRPC stub server.
//!
//! Serves any gRPC service described by protobuf descriptors, without
//! generated server code. Calls are decoded into JSON-shaped
//! [`Request`]s, matched against an ordered list of [`Matcher`]s, and
//! answered from the first matcher that accepts them. Every call is logged
//! for later inspection.
//!
//! ```ignore
//! let server = StubServer::builder()
//!     .descriptor_set_file("route_guide.bin")
//!     .start()
//!     .await?;
//!
//! server
//!     .method("GetFeature")
//!     .matches(|r| r.message.get("/latitude") == Some(&json!(10)))
//!     .header("session", "XXX")
//!     .response(json!({"name": "hello"}));
//!
//! let mut client = RouteGuideClient::new(server.conn()?);
//! // ...
//! assert_eq!(server.requests().len(), 1);
//! server.close().await;
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod generator;
pub mod journal;
pub mod matcher;
pub mod message;
pub mod metadata;
pub mod request;
pub mod response;
pub mod schema;
pub mod server;

pub use error::{Result, StubError};
pub use generator::{Generator, Generators};
pub use matcher::Matcher;
pub use message::Message;
pub use metadata::Metadata;
pub use request::Request;
pub use response::Response;
pub use schema::SchemaRegistry;
pub use server::{StubServer, StubServerBuilder, TlsMaterial};
