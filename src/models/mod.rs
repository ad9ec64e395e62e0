//! Domain model module declarations.

pub mod history;
pub mod request;
pub mod response;
pub mod stats;
