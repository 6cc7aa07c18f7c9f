pub mod keyword;
pub mod l0;
pub mod resolver;

pub use keyword::KeywordIntentParser;
pub use l0::{L0Decision, L0RuleEngine};
pub use resolver::{IntentResolver, SkillMatch};
