//! Key naming for tracker entities in the key-value store
//!
//! Every key is a pure function of its inputs. Segments are joined with
//! fixed literals so a project key can never collide with an epic or story
//! key:
//!
//! ```text
//! pm:projects                                         index of project names
//! pm:people                                           global people list
//! pm:project:<p>                                      project document
//! pm:project:<p>:epics:list                           ordered epic names
//! pm:project:<p>:epic:<e>                             epic document
//! pm:project:<p>:epic:<e>:stories:list                ordered story IDs
//! pm:project:<p>:epic:<e>:story:<id>                  story document
//! ```

const PROJECT_PREFIX: &str = "pm:project:";
const PROJECTS_INDEX: &str = "pm:projects";
const PEOPLE: &str = "pm:people";

pub fn project_document_key(project: &str) -> String {
    format!("{}{}", PROJECT_PREFIX, project)
}

pub fn project_epics_list_key(project: &str) -> String {
    format!("{}{}:epics:list", PROJECT_PREFIX, project)
}

pub fn epic_document_key(project: &str, epic: &str) -> String {
    format!("{}{}:epic:{}", PROJECT_PREFIX, project, epic)
}

pub fn epic_stories_list_key(project: &str, epic: &str) -> String {
    format!("{}{}:epic:{}:stories:list", PROJECT_PREFIX, project, epic)
}

pub fn story_document_key(project: &str, epic: &str, story_id: &str) -> String {
    format!("{}{}:epic:{}:story:{}", PROJECT_PREFIX, project, epic, story_id)
}

pub fn global_people_key() -> String {
    PEOPLE.to_string()
}

pub fn projects_index_key() -> String {
    PROJECTS_INDEX.to_string()
}

/// Glob matching every key under a project's namespace
pub fn project_namespace_pattern(project: &str) -> String {
    format!("{}{}*", PROJECT_PREFIX, escape_pattern(project))
}

/// Backslash-escape glob metacharacters so `text` matches only itself
pub fn escape_pattern(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Glob matching every project-scoped key
pub fn all_projects_pattern() -> String {
    format!("{}*", PROJECT_PREFIX)
}

/// What a key in the tracker namespace addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    ProjectsIndex,
    People,
    ProjectDocument {
        project: String,
    },
    EpicsList {
        project: String,
    },
    EpicDocument {
        project: String,
        epic: String,
    },
    StoriesList {
        project: String,
        epic: String,
    },
    StoryDocument {
        project: String,
        epic: String,
        story: String,
    },
}

impl KeyKind {
    /// Project the key belongs to, if it is project-scoped
    pub fn project(&self) -> Option<&str> {
        match self {
            KeyKind::ProjectsIndex | KeyKind::People => None,
            KeyKind::ProjectDocument { project }
            | KeyKind::EpicsList { project }
            | KeyKind::EpicDocument { project, .. }
            | KeyKind::StoriesList { project, .. }
            | KeyKind::StoryDocument { project, .. } => Some(project),
        }
    }
}

/// Parse a key back into the entity it addresses
///
/// Returns `None` for keys outside the tracker namespace or with an
/// unrecognized shape.
pub fn classify(key: &str) -> Option<KeyKind> {
    if key == PROJECTS_INDEX {
        return Some(KeyKind::ProjectsIndex);
    }
    if key == PEOPLE {
        return Some(KeyKind::People);
    }

    let rest = key.strip_prefix(PROJECT_PREFIX)?;
    let parts: Vec<&str> = rest.split(':').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    match parts.as_slice() {
        [project] => Some(KeyKind::ProjectDocument {
            project: project.to_string(),
        }),
        [project, "epics", "list"] => Some(KeyKind::EpicsList {
            project: project.to_string(),
        }),
        [project, "epic", epic] => Some(KeyKind::EpicDocument {
            project: project.to_string(),
            epic: epic.to_string(),
        }),
        [project, "epic", epic, "stories", "list"] => Some(KeyKind::StoriesList {
            project: project.to_string(),
            epic: epic.to_string(),
        }),
        [project, "epic", epic, "story", story] => Some(KeyKind::StoryDocument {
            project: project.to_string(),
            epic: epic.to_string(),
            story: story.to_string(),
        }),
        _ => None,
    }
}
