mod emit_stack;

pub use emit_stack::generate_stack;
