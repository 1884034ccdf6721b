//! Prompt text sent to the generation service.

use crate::backends::{DiagramRequest, FrameRequest, SceneContentRequest};

const DEFAULT_DIRECTION: &str = "Cinematic and faithful to the lyrics";

pub fn scene_content_prompt(request: &SceneContentRequest) -> String {
    let seed = request.narrative_seed.trim();
    let mut prompt = String::from(
        "As a video director, provide visual instructions for this specific song segment.\n\n",
    );
    prompt.push_str(&format!(
        "NARRATIVE ANGLE/DIRECTION: {}\n",
        if seed.is_empty() { DEFAULT_DIRECTION } else { seed }
    ));
    if !request.character_names.is_empty() {
        prompt.push_str(&format!(
            "CHARACTERS IN STORY: {}.\n",
            request.character_names.join(", ")
        ));
    }
    prompt.push_str(&format!("\nCONTEXT: {}\n", request.context));
    prompt.push_str(&format!("SEGMENT LYRICS: {}", request.lyrics));
    prompt
}

pub fn diagram_prompt(request: &DiagramRequest) -> String {
    format!(
        "Create a Mermaid.js flowchart (graph TD) representing the cinematic flow of the following film scene.\n\n\
         STRICT SYNTAX RULES:\n\
         1. Use 'graph TD'.\n\
         2. ALL node labels MUST be wrapped in double quotes.\n\
         \x20  - CORRECT: A[\"Character @Name\"]\n\
         \x20  - INCORRECT: A[Character @Name]\n\
         3. Do not use special characters outside of quotes.\n\
         4. If a name starts with @, it MUST be inside double quotes.\n\n\
         SCENE DESCRIPTION: {}\n\
         CAMERA: {}",
        request.visuals, request.camera_work
    )
}

pub fn frame_prompt(request: &FrameRequest) -> String {
    let mut prompt = format!(
        "Generate a high-quality cinematic {} FRAME for a music video scene.\n\
         SCENE DESCRIPTION: {}\n\
         CAMERA WORK: {}\n\
         LIGHTING & MOOD: {}\n\
         NARRATIVE DIRECTION: {}\n\n",
        request.kind, request.visuals, request.camera_work, request.lighting_mood, request.narrative_seed
    );
    if !request.references.is_empty() {
        prompt.push_str(
            "The provided images are character references. Ensure characters match these references exactly.\n",
        );
    }
    prompt.push_str(request.kind.moment_instruction());
    prompt.push_str("\n\nStyle: Photorealistic, cinematic 35mm film.");
    prompt
}
