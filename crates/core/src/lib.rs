//! Drover core types: resource shapes, error taxonomy and merge rules.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod error;
pub mod merge;
pub mod model;

pub use error::{DroverError, DroverResult};
pub use merge::{merge_set, RoleMembers};
pub use model::{
    Application, ApplicationDestination, ApplicationSource, Destination, Project, ProjectMetadata,
    ProjectSpec, Repository, RepositoryList, Role,
};

pub mod prelude {
    pub use super::{
        Destination, DroverError, DroverResult, Outcome, Presence, Project, ProjectState, Repository, Role, RoleMembers,
    };
}

/// Desired state of a member inside a nested collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

/// Desired state of a whole project. `Update` rewrites the metadata of an existing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    #[default]
    Present,
    Absent,
    Update,
}

/// Result of one reconciliation: the resource as it stands afterwards and
/// whether a write was issued to get it there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub changed: bool,
    #[serde(rename = "result")]
    pub resource: T,
}

impl<T> Outcome<T> {
    pub fn changed(resource: T) -> Self { Self { changed: true, resource } }

    pub fn unchanged(resource: T) -> Self { Self { changed: false, resource } }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome { changed: self.changed, resource: f(self.resource) }
    }
}
