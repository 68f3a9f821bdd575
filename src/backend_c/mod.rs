mod emit_c;

pub use emit_c::generate_c;
