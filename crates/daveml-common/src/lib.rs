pub mod error;
pub mod matrix;
pub mod value;

pub use error::MathError;
pub use value::{DMat, Value, ValueCell};
