// handlers/mod.rs - built-in routes every app gets

pub mod actuator;

pub use actuator::register as register_builtin;
