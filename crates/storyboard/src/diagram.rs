/// Scene diagram markup handling
///
/// Generated diagram markup is cleaned up before it reaches the renderer,
/// and each mount point only ever shows its most recently requested render.
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::atomic::{AtomicU64, Ordering};

pub const INVALID_DIAGRAM_MESSAGE: &str = "Invalid diagram markup";

const DEFAULT_DECLARATION: &str = "graph TD";

// Labels opening with one of these are shape syntax (`A[(db)]`, `B([pill])`).
const SHAPE_DELIMITERS: &[char] = &['(', '[', '{', '/', '\\', '>'];

const DECLARATIONS: &[&str] = &[
    "graph",
    "flowchart",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "stateDiagram-v2",
    "erDiagram",
    "journey",
    "gantt",
    "pie",
    "mindmap",
    "timeline",
    "gitGraph",
];

static SQUARE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z0-9_]+)\[([^\[\]"]+)\]"#).expect("valid regex"));
static ROUND_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z0-9_]+)\(([^()"]+)\)"#).expect("valid regex"));
static CURLY_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z0-9_]+)\{([^{}"]+)\}"#).expect("valid regex"));

/// Repairs the usual mistakes in generated markup: code fences, a missing
/// graph-type declaration, and unquoted node labels with special characters.
pub fn normalize_markup(raw: &str) -> String {
    let stripped = raw.replace("```mermaid", "").replace("```", "");
    let body = stripped.trim();

    let has_declaration = body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("%%"))
        .and_then(|line| line.split_whitespace().next())
        .map(|keyword| DECLARATIONS.contains(&keyword))
        .unwrap_or(false);

    let mut lines: Vec<String> = Vec::new();
    if !has_declaration {
        lines.push(DEFAULT_DECLARATION.to_string());
    }
    for line in body.lines() {
        lines.push(quote_labels(line));
    }
    lines.join("\n")
}

fn quote_labels(line: &str) -> String {
    let mut out = line.to_string();
    for (regex, open, close) in [
        (&*SQUARE_LABEL, "[", "]"),
        (&*ROUND_LABEL, "(", ")"),
        (&*CURLY_LABEL, "{", "}"),
    ] {
        out = map_unquoted(&out, |run| {
            regex
                .replace_all(run, |caps: &regex::Captures<'_>| {
                    let id = &caps[1];
                    let label = &caps[2];
                    if label.starts_with(SHAPE_DELIMITERS) || !needs_quotes(label) {
                        caps[0].to_string()
                    } else {
                        format!("{id}{open}\"{}\"{close}", label.trim())
                    }
                })
                .into_owned()
        });
    }
    out
}

/// Applies `f` to the parts of `line` outside double quotes. An unterminated
/// quote runs to the end of the line.
fn map_unquoted(line: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('"') {
        out.push_str(&f(&rest[..open]));
        match rest[open + 1..].find('"') {
            Some(close) => {
                let end = open + 1 + close + 1;
                out.push_str(&rest[open..end]);
                rest = &rest[end..];
            }
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(&f(rest));
    out
}

fn needs_quotes(label: &str) -> bool {
    label
        .chars()
        .any(|c| !(c.is_alphanumeric() || c == ' ' || c == '_' || c == '-'))
}

/// What a mount point currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiagramView {
    #[default]
    Empty,
    Rendered(String),
    Error(String),
}

/// External diagram renderer. Returns rendered output (e.g. SVG) or a
/// description of why the markup could not be rendered.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    async fn render(&self, mount_id: &str, markup: &str) -> Result<String, String>;
}

/// One place a diagram is displayed. Renders may resolve out of order; only
/// the most recently requested one is allowed to update the view.
#[derive(Debug)]
pub struct DiagramMount {
    id: String,
    latest: AtomicU64,
    view: Mutex<DiagramView>,
}

impl DiagramMount {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            latest: AtomicU64::new(0),
            view: Mutex::new(DiagramView::Empty),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn view(&self) -> DiagramView {
        self.view.lock().clone()
    }

    /// Renders `raw` markup into this mount. Returns `false` when a newer
    /// render was requested while this one was in flight, in which case the
    /// result is dropped.
    pub async fn render(&self, renderer: &dyn DiagramRenderer, raw: &str) -> bool {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let markup = normalize_markup(raw);
        let next = match renderer.render(&self.id, &markup).await {
            Ok(output) => DiagramView::Rendered(output),
            Err(err) => {
                tracing::warn!(mount = %self.id, "diagram render failed: {err}");
                DiagramView::Error(INVALID_DIAGRAM_MESSAGE.to_string())
            }
        };

        let mut view = self.view.lock();
        if self.latest.load(Ordering::SeqCst) != ticket {
            tracing::debug!(mount = %self.id, ticket, "dropping superseded diagram render");
            return false;
        }
        *view = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_strips_fences_and_adds_declaration() {
        let raw = "```mermaid\nA[\"Start\"] --> B[\"End\"]\n```";
        assert_eq!(normalize_markup(raw), "graph TD\nA[\"Start\"] --> B[\"End\"]");
    }

    #[test]
    fn test_keeps_existing_declaration() {
        let raw = "flowchart LR\n  A --> B";
        assert_eq!(normalize_markup(raw), raw);
    }

    #[test]
    fn test_quotes_special_labels() {
        let raw = "graph TD\nA[Character @Mara] --> B(Close-up: face)\nB --> C{Is it raining?}\nC --> D[Plain label]";
        assert_eq!(
            normalize_markup(raw),
            "graph TD\nA[\"Character @Mara\"] --> B(\"Close-up: face\")\nB --> C{\"Is it raining?\"}\nC --> D[Plain label]"
        );
    }

    #[test]
    fn test_leaves_quoted_labels_alone() {
        let raw = "graph TD\nA[\"Close-up(Mara's face)\"] --> B";
        assert_eq!(normalize_markup(raw), raw);
    }

    #[test]
    fn test_leaves_shape_syntax_alone() {
        let raw = "graph TD\nA[(Database)] --> B([Start])\nB --> C[/Lean/] --> D{{Hex}}";
        assert_eq!(normalize_markup(raw), raw);
    }

    #[test]
    fn test_quoted_label_is_not_requoted_by_later_pass() {
        let raw = "graph TD\nA[Close-up(Mara)] --> B";
        assert_eq!(normalize_markup(raw), "graph TD\nA[\"Close-up(Mara)\"] --> B");
    }

    struct SlowRenderer;

    #[async_trait]
    impl DiagramRenderer for SlowRenderer {
        async fn render(&self, _mount_id: &str, markup: &str) -> Result<String, String> {
            if markup.contains("slow") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if markup.contains("broken") {
                return Err("parse error".into());
            }
            Ok(format!("<svg>{}</svg>", markup.lines().last().unwrap_or_default()))
        }
    }

    #[tokio::test]
    async fn test_latest_render_wins() {
        let mount = DiagramMount::new("scene-0");
        let renderer = SlowRenderer;
        let (first, second) = tokio::join!(
            mount.render(&renderer, "A --> slow"),
            mount.render(&renderer, "A --> fast"),
        );
        assert!(!first);
        assert!(second);
        assert_eq!(mount.view(), DiagramView::Rendered("<svg>A --> fast</svg>".into()));
    }

    #[tokio::test]
    async fn test_unparseable_markup_shows_error() {
        let mount = DiagramMount::new("scene-1");
        assert!(mount.render(&SlowRenderer, "broken").await);
        assert_eq!(mount.view(), DiagramView::Error(INVALID_DIAGRAM_MESSAGE.into()));
    }
}
