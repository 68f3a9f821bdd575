pub mod ll1;
pub mod slr;

pub use ll1::{build_ll1_artifacts, format_ll1_artifacts, predictive_parse_trace, terminal_name};
pub use slr::{build_demo_slr, format_slr_artifacts, slr_parse_trace};
