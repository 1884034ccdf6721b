use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use storyboard::diagram::DiagramRenderer;
use tokio::process::Command;

/// Renders diagram markup to SVG with the mermaid CLI (`mmdc`).
pub struct MermaidCliRenderer {
    executable: PathBuf,
    work_dir: PathBuf,
}

impl MermaidCliRenderer {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            work_dir: std::env::temp_dir(),
        }
    }
}

impl Default for MermaidCliRenderer {
    fn default() -> Self {
        Self::new("mmdc")
    }
}

#[async_trait]
impl DiagramRenderer for MermaidCliRenderer {
    async fn render(&self, mount_id: &str, markup: &str) -> Result<String, String> {
        let stem = format!("storyboard-{}-{mount_id}", std::process::id());
        let input = self.work_dir.join(format!("{stem}.mmd"));
        let output = self.work_dir.join(format!("{stem}.svg"));

        tokio::fs::write(&input, markup)
            .await
            .map_err(|err| format!("failed to stage diagram markup: {err}"))?;

        let result = Command::new(&self.executable)
            .arg("-i")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        let _ = tokio::fs::remove_file(&input).await;

        let result = result.map_err(|err| {
            format!("failed to run {}: {err}", self.executable.display())
        })?;
        if !result.status.success() {
            return Err(String::from_utf8_lossy(&result.stderr).trim().to_string());
        }

        let svg = tokio::fs::read_to_string(&output)
            .await
            .map_err(|err| format!("renderer produced no output: {err}"));
        let _ = tokio::fs::remove_file(&output).await;
        svg
    }
}
