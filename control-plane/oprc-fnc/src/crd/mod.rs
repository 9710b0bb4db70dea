pub mod managed_function;

pub use managed_function::*;
