//! Merge rules for nested project collections.
//!
//! Each rule mutates in place and reports whether anything changed, so the
//! caller can skip the write-back when the remote is already converged.
//! Insertion order is kept; new members are appended.

use crate::model::{Destination, Project, ProjectSpec, Role};
use crate::{DroverError, DroverResult, Presence};

/// Converge `items` toward `wanted` under set semantics.
///
/// `Present` appends each wanted member not already there (duplicates inside
/// `wanted` collapse). `Absent` removes every occurrence of each wanted member.
pub fn merge_set(items: &mut Vec<String>, wanted: &[String], presence: Presence) -> bool {
    match presence {
        Presence::Present => {
            let mut changed = false;
            for w in wanted {
                if !items.iter().any(|i| i == w) {
                    items.push(w.clone());
                    changed = true;
                }
            }
            changed
        }
        Presence::Absent => {
            let before = items.len();
            items.retain(|i| !wanted.contains(i));
            items.len() != before
        }
    }
}

/// Which member list of a role an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleMembers {
    Policies,
    Groups,
}

impl ProjectSpec {
    pub fn role(&self, name: &str) -> Option<&Role> { self.roles.iter().find(|r| r.name == name) }

    pub fn role_mut(&mut self, name: &str) -> Option<&mut Role> { self.roles.iter_mut().find(|r| r.name == name) }

    /// Append a role unless one with the same name exists. An existing role is
    /// left untouched, including its description.
    pub fn add_role(&mut self, role: Role) -> bool {
        if self.role(&role.name).is_some() {
            return false;
        }
        self.roles.push(role);
        true
    }

    pub fn add_destination(&mut self, dest: Destination) -> bool {
        if self.destinations.iter().any(|d| d.same_target(&dest)) {
            return false;
        }
        self.destinations.push(dest);
        true
    }

    pub fn remove_destination(&mut self, dest: &Destination) -> bool {
        let before = self.destinations.len();
        self.destinations.retain(|d| !d.same_target(dest));
        self.destinations.len() != before
    }

    pub fn merge_source_repos(&mut self, repos: &[String], presence: Presence) -> bool {
        merge_set(&mut self.source_repos, repos, presence)
    }
}

impl Role {
    pub fn merge_members(&mut self, which: RoleMembers, wanted: &[String], presence: Presence) -> bool {
        match which {
            RoleMembers::Policies => merge_set(&mut self.policies, wanted, presence),
            RoleMembers::Groups => merge_set(&mut self.groups, wanted, presence),
        }
    }
}

impl Project {
    /// Merge policy or group members into a named role. A missing role is an
    /// explicit error, not an empty success.
    pub fn merge_role_members(
        &mut self,
        role: &str,
        which: RoleMembers,
        wanted: &[String],
        presence: Presence,
    ) -> DroverResult<bool> {
        let project = self.metadata.name.clone();
        let target = self
            .spec
            .role_mut(role)
            .ok_or_else(|| DroverError::RoleNotFound { project, role: role.to_string() })?;
        Ok(target.merge_members(which, wanted, presence))
    }

    /// Overwrite name and description; everything else stays as fetched.
    pub fn set_metadata(&mut self, name: &str, description: &str) -> bool {
        let same = self.metadata.name == name && self.metadata.description.as_deref() == Some(description);
        if same {
            return false;
        }
        self.metadata.name = name.to_string();
        self.metadata.description = Some(description.to_string());
        true
    }
}
