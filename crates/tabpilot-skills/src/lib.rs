pub mod loader;
pub mod workspace;

pub use loader::{Skill, SkillLoader, SkillSource, domain_segments, render_skills};
pub use workspace::{WorkspaceAsset, WorkspaceAssets, WorkspaceManager};
