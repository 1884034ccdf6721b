/// Offline storyboard example
///
/// Run with:
/// cargo run --example mock_storyboard --package ai-pipeline

use ai_pipeline::{FramePopulator, MockBackend, PoolConfig, RequestPool, ScenePopulator};
use std::sync::Arc;
use storyboard::{DataUri, Project, SegmentField, Step};

#[tokio::main]
async fn main() -> ai_pipeline::Result<()> {
    println!("=== Storyboard Example (mock backend) ===\n");

    let lyrics = "City lights are calling\nMara runs through the rain\n\nRen waits by the station\nThe last train pulls away";
    let mut project = Project::new(lyrics, "Noir, rain-soaked, hopeful ending");
    project.transition(Step::DefineScenes)?;
    project.toggle_marker(2)?;
    project.build_segments();
    println!("Segmented into {} scenes\n", project.segments.len());

    let mara = project.add_character("Mara")?.id.clone();
    project.add_reference_image(&mara, &DataUri::from_bytes("image/png", b"mara"))?;
    project.add_character("Ren")?;

    let backend = Arc::new(MockBackend::new());
    let scenes = ScenePopulator::new(
        backend.clone(),
        RequestPool::new(PoolConfig::default()),
        ai_pipeline::DEFAULT_CONTEXT_LABEL,
    );
    project.transition(Step::Production)?;
    let report = scenes.populate_project(&mut project).await;
    println!("Populated {} of {} scenes", report.populated(), project.segments.len());

    for segment in &project.segments {
        println!("  {}: {}", segment.id, segment.section_title);
        println!("    visuals: {}", segment.visuals);
    }

    project.update_segment_text("scene-0", SegmentField::Visuals, "Mara runs through the rain")?;
    let frames = FramePopulator::new(backend);
    match frames.populate(&mut project, "scene-0").await {
        Ok(()) => println!("\n✓ Frames generated for scene-0"),
        Err(err) => println!("\n✗ {err}"),
    }

    let diagram = scenes.generate_diagram(project.segment("scene-1")?).await?;
    diagram.apply_to(&mut project)?;
    println!("✓ Diagram stored for scene-1");

    println!("\nBundle preview:\n{}", storyboard::bundle::to_json(&project)?);
    Ok(())
}
