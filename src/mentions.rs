pub mod index;
pub mod translator;

pub use self::index::MentionIndex;
pub use self::translator::{MentionContext, MentionTranslator};
