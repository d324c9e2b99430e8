//! Prompt engine: a `{{var}}` template language plus a content-hashed
//! version registry for the extraction prompts.

pub mod extraction;
pub mod template;
pub mod versioning;

pub use extraction::{get_type_specific_prompt, render_base_system, render_main_extraction};
pub use template::render;
pub use versioning::{Registry, TemplateVersion, VersioningError};
