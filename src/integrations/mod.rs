//! External service integrations.

pub mod client {
    pub use crate::client::*;
}
