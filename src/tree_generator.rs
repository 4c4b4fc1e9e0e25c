//! Seeded random tracker trees for property tests
//!
//! A generated tree is deliberately a little untidy, the way real data
//! directories are: some projects list an epic that has no folder, and some
//! epic folders are not listed in their project document. Given the same
//! seed the same tree comes out, so a failing seed can be replayed.

use crate::error::Result;
use crate::local::LocalRepository;
use crate::repository::Repository;
use crate::types::{Epic, Project, Story};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

/// Upper bounds for a generated tree
#[derive(Debug, Clone, Copy)]
pub struct TreeShape {
    pub max_projects: usize,
    pub max_epics: usize,
    pub max_stories: usize,
}

impl Default for TreeShape {
    fn default() -> Self {
        Self {
            max_projects: 3,
            max_epics: 4,
            max_stories: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedEpic {
    pub name: String,
    pub doc: Epic,
    pub stories: Vec<(String, Story)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedProject {
    pub name: String,
    pub doc: Project,
    pub epics: Vec<GeneratedEpic>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratedTree {
    pub people: Option<Value>,
    pub projects: Vec<GeneratedProject>,
}

impl GeneratedTree {
    pub fn epic_count(&self) -> usize {
        self.projects.iter().map(|p| p.epics.len()).sum()
    }

    pub fn story_count(&self) -> usize {
        self.projects
            .iter()
            .flat_map(|p| &p.epics)
            .map(|e| e.stories.len())
            .sum()
    }

    /// Write every node into `repo`
    pub async fn write_to(&self, repo: &LocalRepository) -> Result<()> {
        if let Some(people) = &self.people {
            repo.put_people(people).await?;
        }
        for project in &self.projects {
            repo.put_project(&project.name, &project.doc).await?;
            for epic in &project.epics {
                repo.put_epic(&project.name, &epic.name, &epic.doc).await?;
                for (id, story) in &epic.stories {
                    repo.put_story(&project.name, &epic.name, id, story).await?;
                }
            }
        }
        Ok(())
    }
}

pub struct TreeGenerator {
    rng: StdRng,
    shape: TreeShape,
    next_story: usize,
}

impl TreeGenerator {
    /// Create a new generator with the given seed
    pub fn new(seed: u64, shape: TreeShape) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            shape,
            next_story: 1,
        }
    }

    pub fn generate(&mut self) -> GeneratedTree {
        let people = self.rng.gen_bool(0.8).then(|| {
            let count = self.rng.gen_range(1..4);
            Value::Array(
                (1..=count)
                    .map(|i| json!({"id": i, "name": format!("Person {}", i)}))
                    .collect(),
            )
        });

        let project_count = self.rng.gen_range(1..=self.shape.max_projects.max(1));
        let projects = (0..project_count)
            .map(|i| self.generate_project(i))
            .collect();

        GeneratedTree { people, projects }
    }

    fn generate_project(&mut self, index: usize) -> GeneratedProject {
        let name = format!("project-{}", index);
        let epic_count = self.rng.gen_range(0..=self.shape.max_epics);
        let epics: Vec<GeneratedEpic> = (0..epic_count).map(|i| self.generate_epic(i)).collect();

        let mut epic_ids: Vec<String> = epics
            .iter()
            .filter(|_| self.rng.gen_bool(0.85))
            .map(|e| e.name.clone())
            .collect();
        if self.rng.gen_bool(0.2) {
            epic_ids.push("ghost-epic".to_string());
        }

        let mut doc = Project::new(epic_ids);
        doc.extra.insert("name".to_string(), json!(name));
        doc.extra
            .insert("createdAt".to_string(), json!(self.rng.gen_range(1_600_000_000..1_700_000_000)));

        GeneratedProject { name, doc, epics }
    }

    fn generate_epic(&mut self, index: usize) -> GeneratedEpic {
        let name = format!("epic-{}", index);
        let story_count = self.rng.gen_range(0..=self.shape.max_stories);
        let stories: Vec<(String, Story)> = (0..story_count).map(|_| self.generate_story()).collect();

        let story_ids = stories
            .iter()
            .filter(|_| self.rng.gen_bool(0.9))
            .map(|(id, _)| id.clone())
            .collect();
        let mut doc = Epic::new(story_ids);
        doc.extra.insert("title".to_string(), json!(format!("Epic {}", index)));

        GeneratedEpic {
            name,
            doc,
            stories,
        }
    }

    fn generate_story(&mut self) -> (String, Story) {
        let id = format!("S{}", self.next_story);
        self.next_story += 1;

        let mut extra = Map::new();
        extra.insert("title".to_string(), json!(format!("Story {}", id)));
        extra.insert("points".to_string(), json!(self.rng.gen_range(1..13)));
        if self.rng.gen_bool(0.5) {
            extra.insert("assignee".to_string(), json!(self.rng.gen_range(1..4)));
        }
        (id, Story::new(extra))
    }

    /// Add a few new stories to existing epics, as happens between two runs
    pub fn grow(&mut self, tree: &mut GeneratedTree) -> usize {
        let mut added = 0;
        for project in &mut tree.projects {
            for epic in &mut project.epics {
                if self.rng.gen_bool(0.5) {
                    let (id, story) = self.generate_story();
                    epic.doc.story_ids.push(id.clone());
                    epic.stories.push((id, story));
                    added += 1;
                }
            }
        }
        added
    }
}
