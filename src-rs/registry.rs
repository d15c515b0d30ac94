use crate::util::write_json_pretty;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A named UI target defined by one or more reference images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Element {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Filenames relative to the captures directory.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Element {
    fn push_image(&mut self, image: &str) -> bool {
        if self.images.iter().any(|existing| existing == image) {
            return false;
        }
        self.images.push(image.to_string());
        true
    }
}

pub type ElementMap = BTreeMap<String, Element>;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub element: Element,
    #[serde(rename = "_score")]
    pub score: u32,
}

/// Lowercased, spaces replaced by underscores.
pub fn normalize_key(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// JSON-file backed registry of elements keyed by normalized name.
///
/// Every call reads or rewrites the whole file; the capture tool writes the
/// same document from another process, so nothing is cached here.
#[derive(Debug, Clone)]
pub struct ElementRegistry {
    path: PathBuf,
}

impl ElementRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ElementMap> {
        if !self.path.exists() {
            return Ok(ElementMap::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read elements: {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(ElementMap::new());
        }
        let elements: ElementMap = serde_json::from_str(&raw)
            .with_context(|| format!("invalid elements JSON: {}", self.path.display()))?;
        debug!(count = elements.len(), path = %self.path.display(), "loaded elements");
        Ok(elements)
    }

    pub fn save(&self, elements: &ElementMap) -> Result<()> {
        write_json_pretty(&self.path, elements)?;
        debug!(count = elements.len(), path = %self.path.display(), "saved elements");
        Ok(())
    }

    /// Resolve by exact key, then substring of a key, then substring of a tag.
    pub fn get(&self, name: &str) -> Result<Option<Element>> {
        Ok(lookup(&self.load()?, name).cloned())
    }

    pub fn add_or_update(
        &self,
        name: &str,
        description: &str,
        images: &[String],
        tags: &[String],
    ) -> Result<Element> {
        let mut elements = self.load()?;
        let key = normalize_key(name);
        let mut element = Element {
            name: key.clone(),
            description: description.to_string(),
            images: Vec::new(),
            tags: tags.to_vec(),
        };
        for image in images {
            element.push_image(image);
        }
        elements.insert(key, element.clone());
        self.save(&elements)?;
        Ok(element)
    }

    pub fn add_image(&self, name: &str, image_file: &str) -> Result<Element> {
        self.add_image_with(name, image_file, "", &[])
    }

    /// Append `image_file` to an element; a newly created element takes
    /// `description` and `tags`, an existing one keeps its own.
    pub fn add_image_with(
        &self,
        name: &str,
        image_file: &str,
        description: &str,
        tags: &[String],
    ) -> Result<Element> {
        let mut elements = self.load()?;
        let key = normalize_key(name);
        let element = elements.entry(key.clone()).or_insert_with(|| Element {
            name: key,
            description: description.to_string(),
            images: Vec::new(),
            tags: tags.to_vec(),
        });
        element.push_image(image_file);
        let element = element.clone();
        self.save(&elements)?;
        Ok(element)
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        let mut elements = self.load()?;
        let removed = elements.remove(&normalize_key(name)).is_some();
        if removed {
            self.save(&elements)?;
        }
        Ok(removed)
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query = query.trim().to_lowercase();
        let mut hits: Vec<SearchHit> = self
            .load()?
            .into_values()
            .filter_map(|element| {
                let score = search_score(&element, &query);
                (score > 0).then_some(SearchHit { element, score })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(hits)
    }
}

fn lookup<'a>(elements: &'a ElementMap, name: &str) -> Option<&'a Element> {
    let key = normalize_key(name);
    let lowered = name.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    if let Some(element) = elements.get(&key) {
        return Some(element);
    }
    if let Some(element) = elements.iter().find_map(|(k, element)| {
        let k = k.to_lowercase();
        (k.contains(&key) || k.contains(&lowered)).then_some(element)
    }) {
        return Some(element);
    }
    elements.values().find(|element| {
        element
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(&lowered))
    })
}

fn search_score(element: &Element, query: &str) -> u32 {
    if query.is_empty() {
        return 0;
    }
    let name = element.name.to_lowercase();
    let mut score = if name == query {
        100
    } else if name.contains(query) {
        50
    } else {
        0
    };
    if element.description.to_lowercase().contains(query) {
        score += 20;
    }
    if element.tags.join(" ").to_lowercase().contains(query) {
        score += 15;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry_with(dir: &Path, raw: &str) -> ElementRegistry {
        let path = dir.join("elements.json");
        fs::write(&path, raw).unwrap();
        ElementRegistry::new(path)
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let registry = ElementRegistry::new(dir.path().join("nope.json"));
        assert!(registry.load().unwrap().is_empty());
        assert!(registry.get("anything").unwrap().is_none());
    }

    #[test]
    fn get_prefers_exact_then_key_substring_then_tag() {
        let dir = tempdir().unwrap();
        let registry = registry_with(
            dir.path(),
            r#"{
              "save_button": {"name": "save_button", "images": ["save.png"], "tags": ["ui"]},
              "save_button_dark": {"name": "save_button_dark", "images": [], "tags": []},
              "chrome_icon": {"name": "chrome_icon", "images": [], "tags": ["browser", "dock"]}
            }"#,
        );

        assert_eq!(registry.get("Save Button").unwrap().unwrap().name, "save_button");
        assert_eq!(registry.get("button_dark").unwrap().unwrap().name, "save_button_dark");
        assert_eq!(registry.get("brow").unwrap().unwrap().name, "chrome_icon");
        assert!(registry.get("terminal").unwrap().is_none());
    }

    #[test]
    fn get_is_idempotent_without_mutation() {
        let dir = tempdir().unwrap();
        let registry = registry_with(
            dir.path(),
            r#"{"ok_button": {"name": "ok_button", "description": "OK", "images": ["ok.png"], "tags": []}}"#,
        );
        let first = registry.get("ok button").unwrap();
        let second = registry.get("ok button").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn save_of_load_round_trips_structurally() {
        let dir = tempdir().unwrap();
        let raw = r#"{
          "a_b": {"name": "a_b", "description": "first", "images": ["a.png", "b.png"], "tags": ["x"]},
          "c": {"name": "c", "description": "", "images": [], "tags": []}
        }"#;
        let registry = registry_with(dir.path(), raw);
        registry.save(&registry.load().unwrap()).unwrap();

        let before: serde_json::Value = serde_json::from_str(raw).unwrap();
        let after: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry.path()).unwrap()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn add_or_update_normalizes_key_and_dedupes_images() {
        let dir = tempdir().unwrap();
        let registry = ElementRegistry::new(dir.path().join("elements.json"));
        let element = registry
            .add_or_update(
                "Send Button",
                "paper plane",
                &["send.png".to_string(), "send.png".to_string()],
                &["chat".to_string()],
            )
            .unwrap();
        assert_eq!(element.name, "send_button");
        assert_eq!(element.images, vec!["send.png"]);
        assert!(registry.load().unwrap().contains_key("send_button"));
    }

    #[test]
    fn add_image_appends_once_and_creates_minimal_element() {
        let dir = tempdir().unwrap();
        let registry = ElementRegistry::new(dir.path().join("elements.json"));
        registry.add_image("menu", "menu_1.png").unwrap();
        registry.add_image("menu", "menu_2.png").unwrap();
        let element = registry.add_image("menu", "menu_1.png").unwrap();
        assert_eq!(element.images, vec!["menu_1.png", "menu_2.png"]);
        assert_eq!(element.description, "");
    }

    #[test]
    fn add_image_with_only_describes_new_elements() {
        let dir = tempdir().unwrap();
        let registry = ElementRegistry::new(dir.path().join("elements.json"));
        registry
            .add_image_with("icon", "a.png", "first", &["t".to_string()])
            .unwrap();
        let element = registry
            .add_image_with("icon", "b.png", "second", &[])
            .unwrap();
        assert_eq!(element.description, "first");
        assert_eq!(element.tags, vec!["t"]);
    }

    #[test]
    fn delete_reports_presence() {
        let dir = tempdir().unwrap();
        let registry = ElementRegistry::new(dir.path().join("elements.json"));
        registry.add_or_update("x", "", &[], &[]).unwrap();
        assert!(registry.delete("X").unwrap());
        assert!(!registry.delete("X").unwrap());
    }

    #[test]
    fn search_scores_name_description_and_tags() {
        let dir = tempdir().unwrap();
        let registry = registry_with(
            dir.path(),
            r#"{
              "save": {"name": "save", "description": "", "images": [], "tags": []},
              "save_as": {"name": "save_as", "description": "save under a new name", "images": [], "tags": []},
              "disk": {"name": "disk", "description": "", "images": [], "tags": ["save"]},
              "other": {"name": "other", "description": "", "images": [], "tags": []}
            }"#,
        );
        let hits = registry.search("save").unwrap();
        let names: Vec<_> = hits.iter().map(|h| h.element.name.as_str()).collect();
        assert_eq!(names, vec!["save", "save_as", "disk"]);
        assert_eq!(hits[1].score, 70);
        assert_eq!(hits[2].score, 15);
    }
}
