//! # multidb-session
//!
//! The session seam between the multidb connection pool and whatever driver
//! actually speaks to the database.
//!
//! The pool never touches a wire protocol. It opens sessions through a
//! [`SessionFactory`] and hands callers a [`Session`]: a narrow capability
//! interface exposing exactly the operations the pool and its consumers
//! need: `execute`, `ping` and `close`. Nothing is forwarded blindly to an
//! underlying driver object.
//!
//! ## Example
//!
//! ```rust,ignore
//! use multidb_session::{HostDescriptor, SessionFactory, TlsMode};
//!
//! let descriptor = HostDescriptor::new("orders-primary", "10.0.4.11")
//!     .port(3306)
//!     .username("app")
//!     .secret("s3cret")
//!     .tls_mode(TlsMode::Required);
//!
//! let mut session = factory.connect(&descriptor).await?;
//! let outcome = session.execute("SELECT id FROM orders LIMIT 10").await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod descriptor;
pub mod error;
pub mod session;

pub use descriptor::{HostDescriptor, TlsMode};
pub use error::SessionError;
pub use session::{QueryOutcome, Row, Session, SessionFactory, Value};
