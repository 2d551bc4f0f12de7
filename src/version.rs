/// Version string baked in by build.rs from `git describe`.
pub const VERSION: &str = env!("GIT_TAG");
