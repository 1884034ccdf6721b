mod config;
mod render;

use ai_pipeline::{
    BackendFactory, BackendKind, FramePopulator, GenerationBackend, RequestPool, ScenePopulator,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storyboard::image::mime_for_extension;
use storyboard::mentions::active_characters;
use storyboard::diagram::{DiagramMount, DiagramView};
use storyboard::{bundle, export, DataUri, Project, SegmentField, Step};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "storyboard-cli")]
#[command(about = "Storyboard Studio CLI - Turn lyrics into a populated storyboard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use the offline mock generator instead of the remote service
    #[arg(long, global = true)]
    mock: bool,

    /// Config file path (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the scenes a text would be split into
    Segment {
        /// Lyrics or script text file
        #[arg(short, long)]
        text: PathBuf,

        /// Line index that starts a new scene (repeatable)
        #[arg(short, long)]
        marker: Vec<usize>,
    },

    /// Create a project from a text file and populate its scenes
    New {
        /// Lyrics or script text file
        #[arg(short, long)]
        text: PathBuf,

        /// Narrative angle for the whole storyboard
        #[arg(short, long, default_value = "")]
        seed: String,

        /// Line index that starts a new scene (repeatable)
        #[arg(short, long)]
        marker: Vec<usize>,

        /// Bundle output path (defaults to a timestamped name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only segment; leave the scenes unpopulated
        #[arg(long)]
        no_populate: bool,
    },

    /// Generate content for every scene of a project
    Populate {
        #[arg(short, long)]
        project: PathBuf,
    },

    /// Edit a scene's title, visuals, camera or lighting text
    Edit {
        #[arg(short, long)]
        project: PathBuf,

        #[arg(short, long)]
        scene: String,

        /// title, visuals, camera or lighting
        #[arg(short, long)]
        field: String,

        value: String,
    },

    /// Manage the character roster
    Character {
        #[command(subcommand)]
        action: CharacterCommand,
    },

    /// Generate the opening and peak frames for one scene
    Frames {
        #[arg(short, long)]
        project: PathBuf,

        #[arg(short, long)]
        scene: String,
    },

    /// Generate the flow diagram for one scene
    Diagram {
        #[arg(short, long)]
        project: PathBuf,

        #[arg(short, long)]
        scene: String,

        /// Also render the diagram to this SVG file with the mermaid CLI
        #[arg(long)]
        render: Option<PathBuf>,
    },

    /// Regenerate one scene's content and diagram
    Regenerate {
        #[arg(short, long)]
        project: PathBuf,

        #[arg(short, long)]
        scene: String,
    },

    /// Export a printable HTML storyboard
    Export {
        #[arg(short, long)]
        project: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Summarize a project bundle
    Inspect {
        #[arg(short, long)]
        project: PathBuf,
    },
}

#[derive(Subcommand)]
enum CharacterCommand {
    /// Add a character, optionally with reference images
    Add {
        #[arg(short, long)]
        project: PathBuf,

        name: String,

        /// Reference image files (the newest five are kept)
        #[arg(short, long)]
        image: Vec<PathBuf>,
    },

    /// Remove a character by id or name
    Remove {
        #[arg(short, long)]
        project: PathBuf,

        character: String,
    },

    /// Attach a reference image to a character
    Image {
        #[arg(short, long)]
        project: PathBuf,

        character: String,

        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.mock {
        config.provider = BackendKind::Mock;
    }

    match cli.command {
        Commands::Segment { text, marker } => segment_command(&text, marker),
        Commands::New {
            text,
            seed,
            marker,
            output,
            no_populate,
        } => new_command(&config, &text, seed, marker, output, no_populate).await,
        Commands::Populate { project } => populate_command(&config, &project).await,
        Commands::Edit {
            project,
            scene,
            field,
            value,
        } => edit_command(&project, &scene, &field, value),
        Commands::Character { action } => character_command(action),
        Commands::Frames { project, scene } => frames_command(&config, &project, &scene).await,
        Commands::Diagram {
            project,
            scene,
            render,
        } => diagram_command(&config, &project, &scene, render.as_deref()).await,
        Commands::Regenerate { project, scene } => {
            regenerate_command(&config, &project, &scene).await
        }
        Commands::Export { project, output } => export_command(&project, &output),
        Commands::Inspect { project } => inspect_command(&project),
    }
}

fn backend(config: &AppConfig) -> Result<Arc<dyn GenerationBackend>> {
    let backend = BackendFactory::create(config.provider, config.gemini())
        .context("failed to set up the generation backend")?;
    info!(backend = backend.name(), "generation backend ready");
    Ok(backend)
}

fn scene_populator(config: &AppConfig) -> Result<ScenePopulator> {
    Ok(ScenePopulator::new(
        backend(config)?,
        RequestPool::new(config.pool()),
        config.context_label.clone(),
    ))
}

fn load_project(path: &Path) -> Result<Project> {
    bundle::load_from_path(path)
        .with_context(|| format!("failed to load project bundle {}", path.display()))
}

fn save_project(project: &Project, path: &Path) -> Result<()> {
    bundle::save_to_path(project, path)
        .with_context(|| format!("failed to save project bundle {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_image(path: &Path) -> Result<DataUri> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let mime = mime_for_extension(extension)
        .with_context(|| format!("{} is not a supported image type", path.display()))?;
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(DataUri::from_bytes(mime, &bytes))
}

fn character_id(project: &Project, key: &str) -> Result<String> {
    project
        .find_character(key)
        .map(|character| character.id.clone())
        .with_context(|| format!("no character with id or name {key:?}"))
}

/// Moves the project into production, through scene definition if needed.
fn enter_production(project: &mut Project) -> Result<()> {
    if project.step() == Step::PasteLyrics {
        project.transition(Step::DefineScenes)?;
    }
    if project.step() != Step::Production {
        project.transition(Step::Production)?;
    }
    Ok(())
}

fn segment_command(text: &Path, markers: Vec<usize>) -> Result<()> {
    let mut project = Project::new(read_text(text)?, "");
    project.set_scene_markers(markers)?;

    for (index, line) in project.lines().iter().enumerate() {
        let marker = if project.scene_markers().contains(&index) { "|" } else { " " };
        println!("{marker} {index:>3}  {line}");
    }
    println!();
    for segment in project.build_segments() {
        println!("{} ({})", segment.id, segment.section_title);
        for line in segment.lyrics.lines() {
            println!("    {line}");
        }
    }
    Ok(())
}

async fn new_command(
    config: &AppConfig,
    text: &Path,
    seed: String,
    markers: Vec<usize>,
    output: Option<PathBuf>,
    no_populate: bool,
) -> Result<()> {
    let mut project = Project::new(read_text(text)?, seed);
    project.transition(Step::DefineScenes)?;
    project.set_scene_markers(markers)?;
    let count = project.build_segments().len();
    info!("Segmented {} into {} scenes", text.display(), count);

    if !no_populate {
        let populator = scene_populator(config)?;
        enter_production(&mut project)?;
        report_population(&populator.populate_project(&mut project).await);
    }

    let output = output.unwrap_or_else(|| PathBuf::from(bundle::suggested_file_name(chrono::Utc::now())));
    save_project(&project, &output)?;
    println!("{}", output.display());
    Ok(())
}

async fn populate_command(config: &AppConfig, path: &Path) -> Result<()> {
    let mut project = load_project(path)?;
    if project.segments.is_empty() {
        anyhow::bail!("project has no scenes; create it with `new` first");
    }
    let populator = scene_populator(config)?;
    enter_production(&mut project)?;
    report_population(&populator.populate_project(&mut project).await);
    save_project(&project, path)
}

fn report_population(report: &ai_pipeline::PopulationReport) {
    info!(
        "Populated {} of {} scenes",
        report.populated(),
        report.segments.len()
    );
    if !report.failed.is_empty() {
        warn!("Left unfilled: {}", report.failed.join(", "));
    }
    if let Some(message) = &report.quota_warning {
        eprintln!("warning: {message}");
    }
}

fn edit_command(path: &Path, scene: &str, field: &str, value: String) -> Result<()> {
    let mut project = load_project(path)?;
    let field: SegmentField = field.parse().map_err(anyhow::Error::msg)?;
    project.update_segment_text(scene, field, value)?;
    save_project(&project, path)
}

fn character_command(action: CharacterCommand) -> Result<()> {
    match action {
        CharacterCommand::Add {
            project: path,
            name,
            image,
        } => {
            let mut project = load_project(&path)?;
            let images = image
                .iter()
                .map(|file| read_image(file))
                .collect::<Result<Vec<_>>>()?;
            let id = project.add_character(&name)?.id.clone();
            for image in &images {
                project.add_reference_image(&id, image)?;
            }
            info!("Added character {} ({})", name.trim(), id);
            save_project(&project, &path)
        }
        CharacterCommand::Remove {
            project: path,
            character,
        } => {
            let mut project = load_project(&path)?;
            let id = character_id(&project, &character)?;
            let removed = project.remove_character(&id)?;
            info!("Removed character {}", removed.name);
            save_project(&project, &path)
        }
        CharacterCommand::Image {
            project: path,
            character,
            file,
        } => {
            let mut project = load_project(&path)?;
            let id = character_id(&project, &character)?;
            project.add_reference_image(&id, &read_image(&file)?)?;
            save_project(&project, &path)
        }
    }
}

async fn frames_command(config: &AppConfig, path: &Path, scene: &str) -> Result<()> {
    let mut project = load_project(path)?;
    let frames = FramePopulator::new(backend(config)?);
    if let Err(err) = frames.populate(&mut project, scene).await {
        // the user-facing message is the error itself; details are in the log
        anyhow::bail!("{err}");
    }
    save_project(&project, path)
}

async fn diagram_command(
    config: &AppConfig,
    path: &Path,
    scene: &str,
    render_to: Option<&Path>,
) -> Result<()> {
    let mut project = load_project(path)?;
    let populator = scene_populator(config)?;
    let update = populator.generate_diagram(project.segment(scene)?).await?;
    let markup = update.markup.clone();
    update.apply_to(&mut project)?;
    save_project(&project, path)?;

    if let Some(output) = render_to {
        let mount = DiagramMount::new(scene);
        mount.render(&render::MermaidCliRenderer::default(), &markup).await;
        write_rendered(&mount.view(), output)?;
    }
    Ok(())
}

fn write_rendered(view: &DiagramView, output: &Path) -> Result<()> {
    match view {
        DiagramView::Rendered(svg) => {
            std::fs::write(output, svg)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!("Rendered diagram to {}", output.display());
            Ok(())
        }
        DiagramView::Error(message) => anyhow::bail!("{message}"),
        DiagramView::Empty => anyhow::bail!("diagram was not rendered"),
    }
}

async fn regenerate_command(config: &AppConfig, path: &Path, scene: &str) -> Result<()> {
    let mut project = load_project(path)?;
    let populator = scene_populator(config)?;
    let seed = project.narrative_seed.clone();
    let regeneration = populator
        .regenerate(project.segment(scene)?, &seed, &project.characters)
        .await
        .map_err(|err| {
            if err.is_quota() {
                warn!("Rate limit reached; wait a moment and try again");
            }
            err
        })?;
    regeneration.apply_to(&mut project)?;
    save_project(&project, path)
}

fn export_command(path: &Path, output: &Path) -> Result<()> {
    let project = load_project(path)?;
    std::fs::write(output, export::render_printable(&project))
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("Exported {} scenes to {}", project.segments.len(), output.display());
    Ok(())
}

fn inspect_command(path: &Path) -> Result<()> {
    let mut project = load_project(path)?;
    project.refresh_mentions();

    println!("Step: {}", project.step());
    if !project.narrative_seed.is_empty() {
        println!("Narrative angle: {}", project.narrative_seed);
    }
    println!("Characters: {}", project.characters.len());
    for character in &project.characters {
        println!(
            "  {} [{}] {} reference image(s)",
            character.name,
            character.id,
            character.images.len()
        );
    }
    println!("Scenes: {}", project.segments.len());
    for segment in &project.segments {
        let status = if segment.is_populated() { "populated" } else { "stub" };
        let frames = if segment.first_frame.is_some() && segment.last_frame.is_some() {
            ", frames"
        } else {
            ""
        };
        let diagram = if segment.mermaid_diagram.is_some() { ", diagram" } else { "" };
        println!("  {} \"{}\" ({status}{frames}{diagram})", segment.id, segment.section_title);
        let active: Vec<&str> = active_characters(segment, &project.characters)
            .iter()
            .map(|character| character.name.as_str())
            .collect();
        if !active.is_empty() {
            println!("    cast: {}", active.join(", "));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_rendered_only_writes_svg() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("scene.svg");
        assert!(write_rendered(&DiagramView::Error("Invalid diagram markup".into()), &output).is_err());
        assert!(!output.exists());

        write_rendered(&DiagramView::Rendered("<svg/>".into()), &output).unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "<svg/>");
    }

    #[test]
    fn test_read_image_encodes_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mara.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let uri = read_image(&path).unwrap();
        assert_eq!(uri.mime_type(), "image/png");
        assert_eq!(uri.decode().unwrap(), vec![1, 2, 3]);

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "hi").unwrap();
        assert!(read_image(&text).is_err());
    }

    #[test]
    fn test_project_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        let mut project = Project::new("A\nB\nC", "noir");
        project.set_scene_markers([2]).unwrap();
        project.build_segments();
        enter_production(&mut project).unwrap();
        save_project(&project, &path).unwrap();

        let loaded = load_project(&path).unwrap();
        assert_eq!(loaded.step(), Step::Production);
        assert_eq!(loaded.segments.len(), 2);
        assert!(load_project(&dir.path().join("missing.json")).is_err());
    }

    #[tokio::test]
    async fn test_mock_population_end_to_end() {
        let config = AppConfig {
            provider: BackendKind::Mock,
            ..AppConfig::default()
        };
        let mut project = Project::new("Intro\nVerse", "");
        project.build_segments();
        let populator = scene_populator(&config).unwrap();
        let report = populator.populate_project(&mut project).await;
        assert!(report.failed.is_empty());
        assert!(project.segments[0].is_populated());
    }
}
