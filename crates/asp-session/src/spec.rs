//! What a run composes: either an ad hoc `compose` list or a named target
//! in an existing project (spec §4.14 step 1: "spec shape (spaces XOR target)").

use std::path::PathBuf;

/// The two mutually exclusive ways a run can name what to materialize.
#[derive(Debug, Clone)]
pub enum ComposeSpec {
    /// An ad hoc list of `space:<id>@<selector>` refs, materialized into a
    /// scratch project scoped to this run.
    Spaces {
        /// The ordered compose list.
        compose: Vec<String>,
    },
    /// A named target declared in an existing project's `asp-targets.toml`.
    Target {
        /// The project root holding `asp-targets.toml`.
        project_root: PathBuf,
        /// The target name to compose.
        target_name: String,
    },
}

impl ComposeSpec {
    /// `true` if this spec names at least one space, directly or via a
    /// target reference — used by shape validation to reject a spec that
    /// is neither variant's valid form.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::Spaces { compose } => !compose.is_empty(),
            Self::Target { project_root, target_name } => !project_root.as_os_str().is_empty() && !target_name.is_empty(),
        }
    }
}
