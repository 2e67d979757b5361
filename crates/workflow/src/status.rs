//! Project status vocabulary and the transition table.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use photohub_core::DomainError;

/// Workflow status of a project, in workflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    New,
    Importing,
    Culling,
    Editing,
    Exporting,
    Delivered,
    Archived,
}

/// The single source of truth for legal status changes.
///
/// A status maps to the set of statuses it may move to. Staying on the same
/// status is not a transition. `Archived` has no successors.
pub const TRANSITIONS: [(ProjectStatus, &[ProjectStatus]); 7] = {
    use ProjectStatus::*;
    [
        (New, &[Importing]),
        (Importing, &[Culling, New]),
        (Culling, &[Editing, Exporting, Importing]),
        (Editing, &[Exporting, Culling]),
        (Exporting, &[Delivered, Editing]),
        (Delivered, &[Archived, Editing]),
        (Archived, &[]),
    ]
};

/// Whether `next` may follow `current` according to [`TRANSITIONS`].
///
/// An absent current status is treated as [`ProjectStatus::New`].
pub fn can_transition(current: Option<ProjectStatus>, next: ProjectStatus) -> bool {
    current
        .unwrap_or(ProjectStatus::New)
        .allowed_next()
        .contains(&next)
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 7] = [
        ProjectStatus::New,
        ProjectStatus::Importing,
        ProjectStatus::Culling,
        ProjectStatus::Editing,
        ProjectStatus::Exporting,
        ProjectStatus::Delivered,
        ProjectStatus::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::New => "new",
            ProjectStatus::Importing => "importing",
            ProjectStatus::Culling => "culling",
            ProjectStatus::Editing => "editing",
            ProjectStatus::Exporting => "exporting",
            ProjectStatus::Delivered => "delivered",
            ProjectStatus::Archived => "archived",
        }
    }

    /// Human-readable label for user-facing messages.
    pub fn label(self) -> &'static str {
        match self {
            ProjectStatus::New => "New",
            ProjectStatus::Importing => "Importing",
            ProjectStatus::Culling => "Culling",
            ProjectStatus::Editing => "Editing",
            ProjectStatus::Exporting => "Exporting",
            ProjectStatus::Delivered => "Delivered",
            ProjectStatus::Archived => "Archived",
        }
    }

    /// Statuses reachable in one step from `self`.
    pub fn allowed_next(self) -> &'static [ProjectStatus] {
        TRANSITIONS
            .iter()
            .find(|(from, _)| *from == self)
            .map(|(_, next)| *next)
            .unwrap_or(&[])
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }

    /// Interpret a persisted status value.
    ///
    /// Missing, blank or unknown values yield `None`, which the workflow
    /// treats as `New`.
    pub fn from_stored(raw: Option<&str>) -> Option<ProjectStatus> {
        raw.and_then(|s| s.parse().ok())
    }
}

impl core::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        ProjectStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == needle)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "unknown project status '{}' (expected one of: {})",
                    s.trim(),
                    ProjectStatus::ALL.map(ProjectStatus::as_str).join(", ")
                ))
            })
    }
}
