// Domain-layer modules and shared errors/models
pub mod features {
    pub use crate::features::*;
}

pub mod forest {
    pub use crate::forest::*;
}

pub mod registry {
    pub use crate::registry::*;
}

pub mod analytics {
    pub use crate::analytics::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
