//! Request shaping applied before conversion: configured body rewrites and
//! model-class adjustments.

mod body_rules;
mod image_gen;

pub use body_rules::{BodyRule, PROTECTED_KEYS, apply_body_rules, parse_body_rules};
pub use image_gen::{adapt_request_for_image_gen, is_image_gen_model};
