/// Printable storyboard export
///
/// Renders the project as one self-contained HTML document laid out for
/// printing (one scene per block, page breaks between scenes). Images stay
/// embedded as data URIs so the file has no external references.
use crate::diagram::normalize_markup;
use crate::image::DataUri;
use crate::mentions::{MentionMatcher, Span};
use crate::model::{Project, SceneSegment};
use quick_xml::escape::escape;

const PRINT_STYLES: &str = "\
body { font-family: Georgia, serif; color: #111; margin: 2rem; }
header { border-bottom: 2px solid #111; margin-bottom: 1.5rem; }
.scene { page-break-inside: avoid; break-inside: avoid; margin-bottom: 2rem; }
.scene + .scene { page-break-before: always; break-before: page; }
.lyrics { white-space: pre-wrap; font-style: italic; }
.frames { display: flex; gap: 1rem; }
.frames figure { flex: 1; margin: 0; }
.frames img { width: 100%; }
.mention { font-weight: bold; }
pre.diagram { background: #f4f4f4; padding: 0.75rem; white-space: pre-wrap; }
dt { font-weight: bold; text-transform: uppercase; font-size: 0.75rem; }
@media print { body { margin: 0; } }
";

/// Renders the printable HTML document for `project`.
pub fn render_printable(project: &Project) -> String {
    let matcher = MentionMatcher::new(&project.characters);
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Storyboard</title>\n<style>\n");
    html.push_str(PRINT_STYLES);
    html.push_str("</style>\n</head>\n<body>\n<header>\n<h1>Storyboard</h1>\n");
    let seed = if project.narrative_seed.trim().is_empty() {
        "Standard cinematic"
    } else {
        project.narrative_seed.trim()
    };
    html.push_str(&format!("<p>Narrative angle: <em>{}</em></p>\n", escape(seed)));
    if !project.characters.is_empty() {
        let names: Vec<String> = project
            .characters
            .iter()
            .map(|c| escape(&c.name).into_owned())
            .collect();
        html.push_str(&format!("<p>Cast: {}</p>\n", names.join(", ")));
    }
    html.push_str(&format!("<p>{} scenes</p>\n</header>\n", project.segments.len()));

    for (index, segment) in project.segments.iter().enumerate() {
        render_scene(&mut html, index, segment, &matcher);
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn render_scene(html: &mut String, index: usize, segment: &SceneSegment, matcher: &MentionMatcher) {
    html.push_str(&format!(
        "<section class=\"scene\" id=\"{}\">\n<h2>{}. {}</h2>\n",
        escape(&segment.id),
        index + 1,
        escape(&segment.section_title)
    ));
    html.push_str(&format!("<p class=\"lyrics\">{}</p>\n", escape(&segment.lyrics)));

    html.push_str("<dl>\n");
    for (label, value) in [
        ("Visuals", &segment.visuals),
        ("Camera", &segment.camera_work),
        ("Lighting", &segment.lighting_mood),
    ] {
        if value.trim().is_empty() {
            continue;
        }
        html.push_str(&format!("<dt>{label}</dt><dd>{}</dd>\n", highlighted(value, matcher)));
    }
    let cast = matcher.mentioned(&segment.direction_text());
    if !cast.is_empty() {
        let names: Vec<String> = cast.iter().map(|name| escape(name).into_owned()).collect();
        html.push_str(&format!("<dt>Characters</dt><dd>{}</dd>\n", names.join(", ")));
    }
    html.push_str("</dl>\n");

    let frames: Vec<(&str, DataUri)> = [
        ("Opening frame", segment.first_frame.as_deref()),
        ("Peak frame", segment.last_frame.as_deref()),
    ]
    .into_iter()
    .filter_map(|(caption, uri)| {
        let parsed = DataUri::parse(uri?).ok();
        if parsed.is_none() {
            tracing::warn!(scene = %segment.id, caption, "skipping unreadable frame in export");
        }
        parsed.map(|uri| (caption, uri))
    })
    .collect();
    if !frames.is_empty() {
        html.push_str("<div class=\"frames\">\n");
        for (caption, uri) in frames {
            html.push_str(&format!(
                "<figure><img src=\"{}\" alt=\"{caption}\"><figcaption>{caption}</figcaption></figure>\n",
                escape(&uri.to_string())
            ));
        }
        html.push_str("</div>\n");
    }

    if let Some(markup) = segment.mermaid_diagram.as_deref().filter(|m| !m.trim().is_empty()) {
        html.push_str(&format!(
            "<pre class=\"diagram\">{}</pre>\n",
            escape(&normalize_markup(markup))
        ));
    }
    html.push_str("</section>\n");
}

fn highlighted(text: &str, matcher: &MentionMatcher) -> String {
    matcher
        .highlight(text)
        .into_iter()
        .map(|span| match span {
            Span::Plain(plain) => escape(plain).into_owned(),
            Span::Mention { text, .. } => format!("<span class=\"mention\">{}</span>", escape(text)),
        })
        .collect()
}
