//! Composition of generation requests.
//!
//! The composer renders a prompt from the user's request, the best knowledge
//! matches (description and kind only) and the project metadata. Repair
//! requests additionally carry the previous file list and the build
//! diagnostics, errors first. Rendering is a pure function of its inputs.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};
use std::time::Duration;

use tracing::{debug, warn};

use crate::knowledge::{KnowledgeStore, SearchFilters};
use crate::types::{
    Diagnostic, GenerationRequest, KnowledgeEntry, ProjectMeta, RepairContext, RequestKind,
    Severity, UserRequest,
};

/// Knowledge matches embedded when not configured otherwise.
pub const DEFAULT_MAX_MATCHES: usize = 3;

/// Instructions describing the file block format providers must emit.
pub const OUTPUT_FORMAT: &str = "Emit every file as a header line followed by one fenced code block:\n\
### FILE: <relative/path.ext>\n\
```<language>\n\
<complete file content>\n\
```\n\
Always return complete files. Use relative paths only.";

/// Builds [`GenerationRequest`]s.
#[derive(Debug, Clone)]
pub struct RequestComposer {
    max_matches: usize,
    search_timeout: Duration,
}

impl Default for RequestComposer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MATCHES)
    }
}

impl RequestComposer {
    pub fn new(max_matches: usize) -> Self {
        Self {
            max_matches,
            search_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Query the store. Failures and timeouts count as "no matches".
    pub async fn retrieve(
        &self,
        store: &dyn KnowledgeStore,
        query: &str,
        filters: &SearchFilters,
    ) -> Vec<KnowledgeEntry> {
        match tokio::time::timeout(self.search_timeout, store.search(query, filters)).await {
            Ok(Ok(matches)) => {
                debug!("Knowledge store returned {} matches", matches.len());
                matches
            }
            Ok(Err(e)) => {
                warn!("Knowledge search failed, continuing without matches: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Knowledge search timed out after {:?}, continuing without matches",
                    self.search_timeout
                );
                Vec::new()
            }
        }
    }

    /// Compose a request. A repair context always yields a repair request.
    pub fn compose(
        &self,
        user: &UserRequest,
        meta: &ProjectMeta,
        knowledge_matches: &[KnowledgeEntry],
        repair_context: Option<RepairContext>,
    ) -> GenerationRequest {
        let knowledge_context: Vec<KnowledgeEntry> = knowledge_matches
            .iter()
            .take(self.max_matches)
            .cloned()
            .collect();

        let kind = if repair_context.is_some() {
            RequestKind::Repair
        } else {
            RequestKind::Initial
        };

        let prompt = render_prompt(user, meta, &knowledge_context, repair_context.as_ref());

        GenerationRequest {
            kind,
            generation_kind: user.generation_kind,
            target_spec: user.target_spec.clone(),
            component_hint: user.component_hint.clone(),
            options: user.options.clone(),
            knowledge_context,
            repair_context,
            prompt,
        }
    }
}

fn render_prompt(
    user: &UserRequest,
    meta: &ProjectMeta,
    matches: &[KnowledgeEntry],
    repair: Option<&RepairContext>,
) -> String {
    let mut out = String::new();
    if let Err(e) = write_prompt(&mut out, user, meta, matches, repair) {
        warn!("Prompt rendering stopped early: {}", e);
    }
    out
}

fn write_prompt(
    out: &mut String,
    user: &UserRequest,
    meta: &ProjectMeta,
    matches: &[KnowledgeEntry],
    repair: Option<&RepairContext>,
) -> fmt::Result {
    writeln!(out, "## Request\n{}\n", user.target_spec.trim())?;

    writeln!(out, "## Generation")?;
    writeln!(out, "Kind: {}", user.generation_kind)?;
    if let Some(hint) = &user.component_hint {
        writeln!(out, "Component: {}", hint)?;
    }
    writeln!(out, "Style: {}", user.options.style)?;
    if !user.options.features.is_empty() {
        writeln!(out, "Features: {}", user.options.features.join(", "))?;
    }
    out.push('\n');

    writeln!(out, "## Project")?;
    writeln!(out, "Name: {}", meta.name)?;
    if !meta.category.is_empty() {
        writeln!(out, "Category: {}", meta.category)?;
    }
    if let Some(frontend) = &meta.frontend {
        writeln!(out, "Frontend: {}", frontend)?;
    }
    if let Some(backend) = &meta.backend {
        writeln!(out, "Backend: {}", backend)?;
    }
    out.push('\n');

    if !matches.is_empty() {
        writeln!(out, "## Knowledge Matches")?;
        for (index, entry) in matches.iter().enumerate() {
            writeln!(out, "{}. [{}] {}", index + 1, entry.code_kind, entry.description)?;
        }
        out.push('\n');
    }

    if let Some(repair) = repair {
        write_repair(out, repair)?;
    }

    writeln!(out, "## Output Format\n{}", OUTPUT_FORMAT)
}

fn write_repair(out: &mut String, repair: &RepairContext) -> fmt::Result {
    let diagnostics = ordered_diagnostics(&repair.diagnostics);

    writeln!(out, "## Repair Context")?;
    writeln!(
        out,
        "The previous attempt failed to build. Fix the problems below and return every file that needs to change.\n"
    )?;

    writeln!(out, "### Previous Files")?;
    for path in repair.prior_files.keys() {
        writeln!(out, "- {}", path)?;
    }
    out.push('\n');

    writeln!(out, "### Build Diagnostics")?;
    for (index, diagnostic) in diagnostics.iter().enumerate() {
        write!(out, "{}. [{}] {}", index + 1, diagnostic.severity, diagnostic.message)?;
        if let Some(location) = &diagnostic.source_line {
            write!(out, " (at {})", location)?;
        }
        out.push('\n');
    }
    out.push('\n');

    let implicated: BTreeSet<&str> = diagnostics
        .iter()
        .filter_map(|d| d.source_line.as_ref())
        .filter_map(|loc| match_prior_path(&loc.path, repair))
        .collect();

    if !implicated.is_empty() {
        writeln!(out, "### Implicated Files")?;
        for path in implicated {
            if let Some(file) = repair.prior_files.get(path) {
                writeln!(
                    out,
                    "### FILE: {}\n```{}\n{}\n```\n",
                    path,
                    file.language,
                    file.content.trim_end()
                )?;
            }
        }
    }
    Ok(())
}

/// Errors before warnings, emission order otherwise. Info lines are dropped.
pub fn ordered_diagnostics(diagnostics: &[Diagnostic]) -> Vec<&Diagnostic> {
    let mut ordered: Vec<&Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.severity != Severity::Info)
        .collect();
    // Stable sort keeps emission order within a severity.
    ordered.sort_by_key(|d| d.severity);
    ordered
}

/// Map a diagnostic path onto a prior file path. Build tools often report
/// absolute or `./`-prefixed paths, so suffix matches are accepted.
fn match_prior_path<'a>(reported: &str, repair: &'a RepairContext) -> Option<&'a str> {
    let reported = reported.trim_start_matches("./");
    if let Some((path, _)) = repair.prior_files.get_key_value(reported) {
        return Some(path.as_str());
    }
    repair
        .prior_files
        .keys()
        .find(|path| reported.ends_with(&format!("/{}", path)))
        .map(|p| p.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::knowledge::MockKnowledgeStore;
    use crate::project::ProjectFile;
    use crate::types::{GenerationKind, SourceLocation};
    use std::collections::BTreeMap;

    fn meta() -> ProjectMeta {
        ProjectMeta::new("shop")
            .category("ecommerce")
            .frontend("react")
            .backend("express")
    }

    fn repair_context() -> RepairContext {
        let mut prior_files = BTreeMap::new();
        prior_files.insert(
            "src/App.js".to_string(),
            ProjectFile::new("import x from 'missing';", "javascript"),
        );
        prior_files.insert(
            "src/index.js".to_string(),
            ProjectFile::new("render(App);", "javascript"),
        );
        RepairContext {
            prior_files,
            diagnostics: vec![
                Diagnostic::warning("deprecated API used"),
                Diagnostic::error("Module not found: 'missing'").at(SourceLocation {
                    path: "/app/src/App.js".to_string(),
                    line: Some(1),
                    column: None,
                }),
                Diagnostic {
                    severity: Severity::Info,
                    message: "compiling...".to_string(),
                    source_line: None,
                },
                Diagnostic::error("second error"),
            ],
        }
    }

    #[test]
    fn test_prompt_embeds_matches_without_code() {
        let matches = vec![
            KnowledgeEntry::new("k1", "component", "Hero banner with call to action")
                .with_code("SECRET_CODE_ONE"),
            KnowledgeEntry::new("k2", "page", "Product grid page").with_code("SECRET_CODE_TWO"),
        ];
        let request = RequestComposer::default().compose(
            &UserRequest::new("Landing page for a shoe shop").kind(GenerationKind::Page),
            &meta(),
            &matches,
            None,
        );

        assert_eq!(request.kind, RequestKind::Initial);
        assert_eq!(request.knowledge_context.len(), 2);
        assert!(request.prompt.contains("Hero banner with call to action"));
        assert!(request.prompt.contains("Product grid page"));
        assert!(request.prompt.contains("[component]"));
        assert!(!request.prompt.contains("SECRET_CODE"));
        assert!(request.prompt.contains("Frontend: react"));
        assert!(request.prompt.contains("Kind: page"));
    }

    #[test]
    fn test_at_most_max_matches_are_embedded() {
        let matches: Vec<KnowledgeEntry> = (0..5)
            .map(|i| KnowledgeEntry::new(format!("k{i}"), "component", format!("widget number{i}")))
            .collect();
        let request =
            RequestComposer::default().compose(&UserRequest::new("widgets"), &meta(), &matches, None);
        assert_eq!(request.knowledge_context.len(), 3);
        assert!(request.prompt.contains("number2"));
        assert!(!request.prompt.contains("number3"));
    }

    #[test]
    fn test_repair_request_orders_diagnostics() {
        let request = RequestComposer::default().compose(
            &UserRequest::new("shop"),
            &meta(),
            &[],
            Some(repair_context()),
        );
        assert_eq!(request.kind, RequestKind::Repair);

        let first_error = request.prompt.find("Module not found").unwrap();
        let second_error = request.prompt.find("second error").unwrap();
        let warning = request.prompt.find("deprecated API used").unwrap();
        assert!(first_error < second_error);
        assert!(second_error < warning);
        assert!(!request.prompt.contains("compiling..."));
    }

    #[test]
    fn test_repair_embeds_only_implicated_content() {
        let request = RequestComposer::default().compose(
            &UserRequest::new("shop"),
            &meta(),
            &[],
            Some(repair_context()),
        );
        assert!(request.prompt.contains("- src/App.js"));
        assert!(request.prompt.contains("- src/index.js"));
        assert!(request.prompt.contains("import x from 'missing';"));
        assert!(!request.prompt.contains("render(App);"));
    }

    #[test]
    fn test_repair_composition_is_deterministic() {
        let composer = RequestComposer::default();
        let first = composer.compose(&UserRequest::new("shop"), &meta(), &[], Some(repair_context()));
        let second = composer.compose(&UserRequest::new("shop"), &meta(), &[], Some(repair_context()));
        assert_eq!(first.prompt, second.prompt);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_retrieve_treats_store_failure_as_empty() {
        let mut store = MockKnowledgeStore::new();
        store
            .expect_search()
            .times(1)
            .returning(|_, _| Err(CoreError::KnowledgeUnavailable("down".into())));

        let matches = RequestComposer::default()
            .retrieve(&store, "anything", &SearchFilters::default())
            .await;
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_passes_matches_through() {
        let mut store = MockKnowledgeStore::new();
        store
            .expect_search()
            .withf(|query, _| query == "login form")
            .returning(|_, _| Ok(vec![KnowledgeEntry::new("k1", "component", "login form")]));

        let matches = RequestComposer::default()
            .retrieve(&store, "login form", &SearchFilters::default())
            .await;
        assert_eq!(matches.len(), 1);
    }
}
