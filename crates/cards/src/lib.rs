//! Card rendering: deterministic assembly of structured replies from
//! typed skill results, a two-construct template engine over file-backed
//! fragments, and the optional reply personalization pass.

pub mod personalize;
pub mod renderer;
pub mod template;

pub use personalize::personalize;
pub use renderer::CardRenderer;
pub use template::TemplateEngine;
