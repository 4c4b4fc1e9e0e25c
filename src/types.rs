use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Entity level in the tracker tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    People,
    Project,
    Epic,
    Story,
}

impl NodeKind {
    /// Get the string representation of this node kind
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::People => "people",
            NodeKind::Project => "project",
            NodeKind::Epic => "epic",
            NodeKind::Story => "story",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Project document
///
/// Only `epicIds` is interpreted; every other field is carried through
/// untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "epicIds", default)]
    pub epic_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    pub fn new(epic_ids: Vec<String>) -> Self {
        Self {
            epic_ids,
            extra: Map::new(),
        }
    }
}

/// Epic document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    #[serde(rename = "storyIds", default)]
    pub story_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Epic {
    pub fn new(story_ids: Vec<String>) -> Self {
        Self {
            story_ids,
            extra: Map::new(),
        }
    }
}

/// Story document (fully opaque)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Story {
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Story {
    pub fn new(extra: Map<String, Value>) -> Self {
        Self { extra }
    }
}

/// The global contributor list, passed through as-is
pub type People = Value;

/// Location of a node in the tree, used for messages and plan lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePath {
    pub project: Option<String>,
    pub epic: Option<String>,
    pub story: Option<String>,
}

impl NodePath {
    pub fn people() -> Self {
        Self {
            project: None,
            epic: None,
            story: None,
        }
    }

    pub fn project(project: &str) -> Self {
        Self {
            project: Some(project.to_string()),
            epic: None,
            story: None,
        }
    }

    pub fn epic(project: &str, epic: &str) -> Self {
        Self {
            project: Some(project.to_string()),
            epic: Some(epic.to_string()),
            story: None,
        }
    }

    pub fn story(project: &str, epic: &str, story: &str) -> Self {
        Self {
            project: Some(project.to_string()),
            epic: Some(epic.to_string()),
            story: Some(story.to_string()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match (&self.project, &self.epic, &self.story) {
            (None, _, _) => NodeKind::People,
            (Some(_), None, _) => NodeKind::Project,
            (Some(_), Some(_), None) => NodeKind::Epic,
            (Some(_), Some(_), Some(_)) => NodeKind::Story,
        }
    }
}

impl std::fmt::Display for NodePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let segments: Vec<&str> = [&self.project, &self.epic, &self.story]
            .into_iter()
            .filter_map(|s| s.as_deref())
            .collect();
        if segments.is_empty() {
            write!(f, "people")
        } else {
            write!(f, "{}", segments.join("/"))
        }
    }
}

fn segment_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"^[^:/\\.\x00-\x1f][^:/\\\x00-\x1f]{0,199}$")
            .expect("segment pattern is valid")
    })
}

/// Check that a project name, epic name or story ID can be used both as a
/// key segment and as a file or folder name
pub fn validate_segment(name: &str) -> Result<(), crate::error::TrackerError> {
    if name.len() <= 200 && segment_pattern().is_match(name) {
        Ok(())
    } else {
        Err(crate::error::TrackerError::InvalidName(name.to_string()))
    }
}
