pub mod marker;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use marker::MarkerBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractYoloBackend;
