//! Auth-domain identifiers, scope sets, credentials, and pending handshakes.

pub mod id;
pub mod scope;
pub mod token;

pub use id::*;
pub use scope::*;
pub use token::{credential::*, pending::*, secret::*};
