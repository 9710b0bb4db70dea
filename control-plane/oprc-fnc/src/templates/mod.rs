pub mod function;

pub use function::*;
