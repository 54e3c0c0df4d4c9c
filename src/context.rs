use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, error, info};

use crate::error::{ApiError, ApiResult};
use crate::status::{StatusBanner, StatusKind};

/// Name of the container that holds `/search-related-files` results.
pub const SEARCH_CONTAINER: &str = "search";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub checked: bool,
    /// `None` for files that have no YAML summary (markdown).
    pub use_yaml: Option<bool>,
    yaml_pending: bool,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, checked: bool, use_yaml: Option<bool>) -> Self {
        Self {
            path: path.into(),
            checked,
            use_yaml,
            yaml_pending: false,
        }
    }

    pub fn yaml_pending(&self) -> bool {
        self.yaml_pending
    }
}

/// A named group of files, e.g. "context", "other" or "search".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub name: String,
    pub files: Vec<FileEntry>,
}

impl Container {
    pub fn new(name: impl Into<String>, files: Vec<FileEntry>) -> Self {
        Self {
            name: name.into(),
            files,
        }
    }

    pub fn all_checked(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|f| f.checked)
    }
}

/// Position of a file in the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRef {
    pub container: usize,
    pub file: usize,
}

#[derive(Debug, Clone)]
pub struct ContextTicket {
    generation: u64,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct YamlTicket {
    pub path: String,
    pub use_yaml: bool,
}

/// Checked/unchecked files grouped in containers, and the status line
/// reporting the last context update.
#[derive(Debug, Default)]
pub struct ContextSelector {
    containers: Vec<Container>,
    generation: u64,
    in_flight: bool,
    pub status: Option<StatusBanner>,
    fade: Duration,
}

impl ContextSelector {
    pub fn new(containers: Vec<Container>, fade: Duration) -> Self {
        Self {
            containers,
            fade,
            ..Self::default()
        }
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn is_updating(&self) -> bool {
        self.in_flight
    }

    pub fn entry(&self, at: FileRef) -> Option<&FileEntry> {
        self.containers.get(at.container)?.files.get(at.file)
    }

    fn entry_mut(&mut self, at: FileRef) -> ApiResult<&mut FileEntry> {
        self.containers
            .get_mut(at.container)
            .and_then(|c| c.files.get_mut(at.file))
            .ok_or_else(|| ApiError::validation("No such file in the list."))
    }

    /// Checked paths in display order, each path once.
    pub fn selected_files(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.containers
            .iter()
            .flat_map(|c| c.files.iter())
            .filter(|f| f.checked && seen.insert(f.path.as_str()))
            .map(|f| f.path.clone())
            .collect()
    }

    /// Set every entry for `path` to `checked`, keeping duplicates across
    /// containers in agreement.
    fn set_checked(&mut self, path: &str, checked: bool) {
        for file in self.containers.iter_mut().flat_map(|c| c.files.iter_mut()) {
            if file.path == path {
                file.checked = checked;
            }
        }
    }

    /// Flip one file and start a context update.
    pub fn toggle_file(&mut self, at: FileRef) -> ApiResult<ContextTicket> {
        let entry = self.entry_mut(at)?;
        let checked = !entry.checked;
        let path = entry.path.clone();
        self.set_checked(&path, checked);
        Ok(self.begin_update())
    }

    /// Check every file in the container unless all already are, in which
    /// case uncheck them all. Starts a context update.
    pub fn toggle_all(&mut self, container: usize) -> ApiResult<ContextTicket> {
        let target = self
            .containers
            .get(container)
            .ok_or_else(|| ApiError::validation("No such file group."))?;
        let checked = !target.all_checked();
        let paths: Vec<String> = target.files.iter().map(|f| f.path.clone()).collect();
        for path in &paths {
            self.set_checked(path, checked);
        }
        Ok(self.begin_update())
    }

    /// Snapshot the selection for `/update-analysis-context`.
    pub fn begin_update(&mut self) -> ContextTicket {
        self.generation += 1;
        self.in_flight = true;
        self.status = Some(StatusBanner::sticky("Updating context...", StatusKind::Info));
        let files = self.selected_files();
        debug!(count = files.len(), generation = self.generation, "Updating context");
        ContextTicket {
            generation: self.generation,
            files,
        }
    }

    /// Only the newest update reports; earlier answers are superseded.
    pub fn complete_update(&mut self, ticket: ContextTicket, result: ApiResult<()>) {
        if ticket.generation != self.generation {
            debug!(ticket = ticket.generation, "Superseded context update finished");
            return;
        }
        self.in_flight = false;
        self.status = Some(match result {
            Ok(()) => {
                info!(count = ticket.files.len(), "Context updated");
                StatusBanner::fading(
                    format!("Context updated: {} files selected", ticket.files.len()),
                    StatusKind::Success,
                    self.fade,
                )
            }
            Err(e) => {
                error!(error = %e, "Context update failed");
                let text = match e {
                    ApiError::Application { .. } => "Error: Failed to update context.",
                    _ => "Error: Could not update context.",
                };
                StatusBanner::fading(text, StatusKind::Error, self.fade)
            }
        });
    }

    // ── YAML override ───────────────────────────────────────────────────

    /// Flip the YAML flag optimistically. One request per toggle; a second
    /// toggle of the same file waits for the first to finish.
    pub fn begin_toggle_yaml(&mut self, at: FileRef) -> ApiResult<YamlTicket> {
        let entry = self.entry_mut(at)?;
        let Some(current) = entry.use_yaml else {
            return Err(ApiError::validation("This file has no YAML summary."));
        };
        if entry.yaml_pending {
            return Err(ApiError::validation("YAML setting is still being saved."));
        }
        let path = entry.path.clone();
        self.set_yaml(&path, !current, true);
        Ok(YamlTicket {
            path,
            use_yaml: !current,
        })
    }

    fn set_yaml(&mut self, path: &str, use_yaml: bool, pending: bool) {
        for file in self.containers.iter_mut().flat_map(|c| c.files.iter_mut()) {
            if file.path == path && file.use_yaml.is_some() {
                file.use_yaml = Some(use_yaml);
                file.yaml_pending = pending;
            }
        }
    }

    /// Success shows a short confirmation; failure reverts the flag and is
    /// returned for an alert.
    pub fn complete_toggle_yaml(&mut self, ticket: YamlTicket, result: ApiResult<()>) -> ApiResult<()> {
        match result {
            Ok(()) => {
                self.set_yaml(&ticket.path, ticket.use_yaml, false);
                self.status = Some(StatusBanner::fading(
                    format!("YAML setting for {} updated.", ticket.path),
                    StatusKind::Success,
                    self.fade,
                ));
                Ok(())
            }
            Err(e) => {
                error!(error = %e, path = %ticket.path, "YAML override failed");
                self.set_yaml(&ticket.path, !ticket.use_yaml, false);
                Err(e)
            }
        }
    }

    // ── Search results ──────────────────────────────────────────────────

    /// Replace the search container with the files listed in a
    /// `/search-related-files` answer. Returns how many were found.
    pub fn apply_search_results(&mut self, html: &str) -> usize {
        let mut files = parse_file_list(html);
        // Keep selection state in agreement with entries elsewhere.
        for file in &mut files {
            if let Some(existing) = self
                .containers
                .iter()
                .filter(|c| c.name != SEARCH_CONTAINER)
                .flat_map(|c| c.files.iter())
                .find(|f| f.path == file.path)
            {
                file.checked = existing.checked;
                file.use_yaml = existing.use_yaml;
            }
        }
        let count = files.len();
        match self.containers.iter().position(|c| c.name == SEARCH_CONTAINER) {
            Some(i) => self.containers[i].files = files,
            None => self
                .containers
                .insert(0, Container::new(SEARCH_CONTAINER, files)),
        }
        count
    }
}

fn checkbox_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<input\b[^>]*\bclass="(file-checkbox|yaml-checkbox)"[^>]*>"#).ok())
        .as_ref()
}

fn value_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\bvalue="([^"]*)""#).ok())
        .as_ref()
}

fn unescape_html(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// File checkboxes (and their YAML checkboxes) from a rendered file list.
pub fn parse_file_list(html: &str) -> Vec<FileEntry> {
    let (Some(inputs), Some(values)) = (checkbox_regex(), value_regex()) else {
        return Vec::new();
    };
    let mut files: Vec<FileEntry> = Vec::new();
    for caps in inputs.captures_iter(html) {
        let tag = caps.get(0).map_or("", |m| m.as_str());
        let Some(value) = values.captures(tag).and_then(|c| c.get(1)) else {
            continue;
        };
        let path = unescape_html(value.as_str());
        let checked = tag
            .trim_end_matches('>')
            .split_whitespace()
            .any(|attr| attr == "checked");
        match caps.get(1).map(|m| m.as_str()) {
            Some("yaml-checkbox") => {
                if let Some(file) = files.iter_mut().rev().find(|f| f.path == path) {
                    file.use_yaml = Some(checked);
                }
            }
            _ => {
                if !files.iter().any(|f| f.path == path) {
                    files.push(FileEntry::new(path, checked, None));
                }
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AnalysisBackend;
    use crate::test_support::{session, FakeBackend};

    fn selector() -> ContextSelector {
        ContextSelector::new(
            vec![
                Container::new(
                    "context",
                    vec![
                        FileEntry::new("src/main.rs", true, Some(false)),
                        FileEntry::new("README.md", true, None),
                    ],
                ),
                Container::new(
                    "other",
                    vec![
                        FileEntry::new("src/lib.rs", false, Some(false)),
                        FileEntry::new("src/util.rs", false, Some(true)),
                    ],
                ),
            ],
            Duration::from_millis(2000),
        )
    }

    #[test]
    fn test_selected_files_in_display_order() {
        let sel = selector();
        assert_eq!(sel.selected_files(), vec!["src/main.rs", "README.md"]);
    }

    #[tokio::test]
    async fn test_toggle_file_posts_selection() {
        let backend = FakeBackend::new();
        let mut sel = selector();
        let ticket = sel
            .toggle_file(FileRef { container: 1, file: 1 })
            .unwrap();
        assert_eq!(
            sel.status.as_ref().map(|s| s.text.as_str()),
            Some("Updating context...")
        );
        let result = backend.update_context(&session(), &ticket.files).await;
        sel.complete_update(ticket, result);

        let payload = backend.last_payload("/update-analysis-context").unwrap();
        assert_eq!(
            payload["files"],
            serde_json::json!(["src/main.rs", "README.md", "src/util.rs"])
        );
        assert_eq!(
            sel.status.as_ref().map(|s| s.text.as_str()),
            Some("Context updated: 3 files selected")
        );
        assert!(!sel.is_updating());
    }

    #[test]
    fn test_toggle_all_checks_then_unchecks() {
        let mut sel = selector();
        sel.toggle_all(1).unwrap();
        assert!(sel.containers()[1].all_checked());
        sel.toggle_all(1).unwrap();
        assert!(sel.containers()[1].files.iter().all(|f| !f.checked));
        // Partially checked groups become fully checked.
        sel.toggle_file(FileRef { container: 1, file: 0 }).unwrap();
        sel.toggle_all(1).unwrap();
        assert!(sel.containers()[1].all_checked());
    }

    #[test]
    fn test_superseded_update_does_not_report() {
        let mut sel = selector();
        let first = sel.begin_update();
        let second = sel.begin_update();
        sel.complete_update(first, Err(ApiError::validation("late")));
        assert!(sel.is_updating());
        sel.complete_update(second, Ok(()));
        assert_eq!(sel.status.as_ref().map(|s| s.kind), Some(StatusKind::Success));
    }

    #[test]
    fn test_update_error_texts() {
        let mut sel = selector();
        let ticket = sel.begin_update();
        sel.complete_update(
            ticket,
            Err(ApiError::Application {
                endpoint: "/update-analysis-context",
                message: "nope".into(),
            }),
        );
        assert_eq!(
            sel.status.as_ref().map(|s| s.text.as_str()),
            Some("Error: Failed to update context.")
        );

        let ticket = sel.begin_update();
        sel.complete_update(
            ticket,
            Err(ApiError::Status {
                endpoint: "/update-analysis-context",
                status: 500,
                body: String::new(),
            }),
        );
        assert_eq!(
            sel.status.as_ref().map(|s| s.text.as_str()),
            Some("Error: Could not update context.")
        );
    }

    #[tokio::test]
    async fn test_yaml_failure_reverts() {
        let backend = FakeBackend::new();
        backend.fail("/update-file-yaml-override", 500, "disk full");
        let mut sel = selector();
        let at = FileRef { container: 0, file: 0 };
        let ticket = sel.begin_toggle_yaml(at).unwrap();
        assert_eq!(sel.entry(at).unwrap().use_yaml, Some(true));
        assert!(sel.begin_toggle_yaml(at).is_err());

        let result = backend
            .set_yaml_override(&session(), &ticket.path, ticket.use_yaml)
            .await;
        assert!(sel.complete_toggle_yaml(ticket, result).is_err());
        let entry = sel.entry(at).unwrap();
        assert_eq!(entry.use_yaml, Some(false));
        assert!(!entry.yaml_pending());
    }

    #[test]
    fn test_yaml_success_message() {
        let mut sel = selector();
        let ticket = sel
            .begin_toggle_yaml(FileRef { container: 1, file: 1 })
            .unwrap();
        assert!(!ticket.use_yaml);
        sel.complete_toggle_yaml(ticket, Ok(())).unwrap();
        assert_eq!(
            sel.status.as_ref().map(|s| s.text.as_str()),
            Some("YAML setting for src/util.rs updated.")
        );
    }

    #[test]
    fn test_markdown_has_no_yaml_toggle() {
        let mut sel = selector();
        assert!(sel
            .begin_toggle_yaml(FileRef { container: 0, file: 1 })
            .is_err());
    }

    #[test]
    fn test_parse_file_list() {
        let html = r#"
            <div class="file-item">
                <span class="left">
                    <input type="checkbox" class="file-checkbox" value="src/a.rs" checked>
                    <span>src/a.rs</span>
                </span>
                <span class="right">
                    <input type="checkbox" class="yaml-checkbox" value="src/a.rs" > YAML
                </span>
            </div>
            <div class="file-item">
                <input type="checkbox" class="file-checkbox" value="docs/b&amp;c.md" > docs/b&amp;c.md
            </div>"#;
        let files = parse_file_list(html);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0], FileEntry::new("src/a.rs", true, Some(false)));
        assert_eq!(files[1], FileEntry::new("docs/b&c.md", false, None));
    }

    #[test]
    fn test_search_results_create_container_and_keep_selection() {
        let mut sel = selector();
        let html = r#"<input type="checkbox" class="file-checkbox" value="src/main.rs" >
            <input type="checkbox" class="file-checkbox" value="src/new.rs" >"#;
        assert_eq!(sel.apply_search_results(html), 2);
        let search = &sel.containers()[0];
        assert_eq!(search.name, SEARCH_CONTAINER);
        assert!(search.files[0].checked);
        assert!(!search.files[1].checked);

        assert_eq!(sel.apply_search_results(""), 0);
        assert_eq!(sel.containers().len(), 3);
        assert!(sel.containers()[0].files.is_empty());
    }
}
