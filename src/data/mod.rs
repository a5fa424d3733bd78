//! Persisted state: the applicant store and model artifacts.

pub mod store {
    pub use crate::store::*;
}

pub mod artifact {
    pub use crate::artifact::*;
}
