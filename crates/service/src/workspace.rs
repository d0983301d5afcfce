//! Workspace loading: a mod directory of `.pp` files scanned for its mod
//! declaration and dashboard blocks.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, bail},
    serde::Serialize,
    tracing::{debug, info},
    walkdir::{DirEntry, WalkDir},
};

/// Extension of workspace resource files.
pub const RESOURCE_EXTENSION: &str = "pp";

/// Directory holding installed mod dependencies, never scanned.
const DEPENDENCY_DIR: &str = ".mod";

/// A dashboard declared somewhere in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardRef {
    pub name: String,
    pub title: Option<String>,
    /// Path relative to the workspace root.
    pub file: PathBuf,
}

/// A loaded workspace. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub mod_name: String,
    pub dashboards: Vec<DashboardRef>,
}

/// Output of the initializer, handed to the dashboard server.
#[derive(Debug, Clone)]
pub struct InitData {
    pub workspace: Arc<Workspace>,
}

impl InitData {
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace: Arc::new(workspace),
        }
    }
}

impl Workspace {
    /// A workspace with no resources.
    pub fn empty(root: impl Into<PathBuf>, mod_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            mod_name: mod_name.into(),
            dashboards: Vec::new(),
        }
    }

    /// Load the workspace rooted at `mod_location`.
    pub fn load(mod_location: &Path) -> anyhow::Result<Self> {
        let meta = std::fs::metadata(mod_location)
            .with_context(|| format!("mod location {} not found", mod_location.display()))?;
        if !meta.is_dir() {
            bail!("mod location {} is not a directory", mod_location.display());
        }

        let mut mod_name = None;
        let mut dashboards = Vec::new();

        let walker = WalkDir::new(mod_location)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e));

        for entry in walker {
            let entry = entry.context("failed to walk workspace")?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(RESOURCE_EXTENSION)
            {
                continue;
            }

            let source = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let relative = path.strip_prefix(mod_location).unwrap_or(path).to_path_buf();
            let parsed = parse_resources(&source);

            if let Some(name) = parsed.mod_name {
                if let Some(existing) = &mod_name {
                    bail!(
                        "duplicate mod declaration in {} (already declared as '{existing}')",
                        relative.display()
                    );
                }
                mod_name = Some(name);
            }
            debug!(file = %relative.display(), dashboards = parsed.dashboards.len(), "workspace: parsed file");
            dashboards.extend(parsed.dashboards.into_iter().map(|(name, title)| DashboardRef {
                name,
                title,
                file: relative.clone(),
            }));
        }

        dashboards.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.file.cmp(&b.file)));

        let mod_name = mod_name.unwrap_or_else(|| default_mod_name(mod_location));
        info!(
            root = %mod_location.display(),
            mod_name = %mod_name,
            dashboards = dashboards.len(),
            "workspace loaded"
        );

        Ok(Self {
            root: mod_location.to_path_buf(),
            mod_name,
            dashboards,
        })
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == DEPENDENCY_DIR || name.starts_with('.')
}

fn default_mod_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "local".into())
}

#[derive(Debug, Default, PartialEq)]
struct ParsedFile {
    mod_name: Option<String>,
    dashboards: Vec<(String, Option<String>)>,
}

/// Line-oriented scan for `mod "x" {`, `dashboard "x" {` and a `title = "..."`
/// directly inside a dashboard block, either on the opening line or on its own
/// line. Braces inside quoted strings do not count towards nesting.
fn parse_resources(source: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    let mut depth = 0usize;
    // Index into `parsed.dashboards` of the block we're inside, if any.
    let mut open_dashboard: Option<usize> = None;

    for raw in source.lines() {
        let line = raw.trim();
        if line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        if depth == 0 {
            if let Some((name, _)) = block_label(line, "mod") {
                parsed.mod_name = Some(name);
            } else if let Some((name, rest)) = block_label(line, "dashboard") {
                let inline_title = rest
                    .trim_start()
                    .strip_prefix('{')
                    .and_then(|body| attribute_string(body.trim_start(), "title"));
                parsed.dashboards.push((name, inline_title));
                open_dashboard = Some(parsed.dashboards.len() - 1);
            }
        } else if depth == 1
            && let Some(idx) = open_dashboard
            && let Some(title) = attribute_string(line, "title")
        {
            parsed.dashboards[idx].1 = Some(title);
        }

        let (opened, closed) = count_braces(line);
        depth += opened;
        depth = depth.saturating_sub(closed);
        if depth == 0 {
            open_dashboard = None;
        }
    }

    parsed
}

/// `<keyword> "<label>" {...` → `(label, "{...")`.
fn block_label<'a>(line: &'a str, keyword: &str) -> Option<(String, &'a str)> {
    let rest = line.strip_prefix(keyword)?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    quoted(rest.trim_start())
}

/// Opening and closing braces outside of string literals.
fn count_braces(line: &str) -> (usize, usize) {
    let (mut opened, mut closed) = (0, 0);
    let mut in_string = false;
    let mut escaped = false;
    for c in line.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => opened += 1,
            '}' if !in_string => closed += 1,
            _ => {},
        }
    }
    (opened, closed)
}

/// `<name> = "<value>"` → `value`.
fn attribute_string(line: &str, name: &str) -> Option<String> {
    let rest = line.strip_prefix(name)?.trim_start();
    let rest = rest.strip_prefix('=')?.trim_start();
    quoted(rest).map(|(value, _)| value)
}

fn quoted(s: &str) -> Option<(String, &str)> {
    let body = s.strip_prefix('"')?;
    let end = body.find('"')?;
    Some((body[..end].to_string(), &body[end + 1..]))
}
