//! Context assembly: limiting, injection and skill detection.

pub mod assembler;
pub mod compress;
pub mod skills;
pub mod truncation;

pub use assembler::{
    AssembledContext, AssemblyOptions, ContextAssembler, DEEP_THINKING_PROMPT, is_native_reasoning,
};
pub use compress::SummaryModel;
pub use skills::{SkillMatch, detect, skills_prompt};
pub use truncation::{SUMMARY_PREFIX, is_summary, truncate};
