mod error;
mod settings;

pub use settings::*;
