use crate::model::SceneSegment;
use std::collections::BTreeSet;

/// Trimmed, non-blank lines of `raw_text`. Scene marker indices refer to
/// positions in this sequence.
pub fn canonical_lines(raw_text: &str) -> Vec<&str> {
    raw_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Splits `raw_text` into scene stubs at the given marker indices.
///
/// A marker only closes a scene when lines have accumulated since the last
/// break, so markers at index 0 or on consecutive lines never yield an empty
/// scene. Blank or empty input produces no scenes.
pub fn segment_text(raw_text: &str, markers: &[usize]) -> Vec<SceneSegment> {
    let markers: BTreeSet<usize> = markers.iter().copied().collect();
    let mut segments = Vec::new();
    let mut buffer: Vec<&str> = Vec::new();

    for (index, line) in canonical_lines(raw_text).into_iter().enumerate() {
        if markers.contains(&index) && !buffer.is_empty() {
            segments.push(SceneSegment::stub(segments.len(), buffer.join("\n")));
            buffer.clear();
        }
        buffer.push(line);
    }
    if !buffer.is_empty() {
        segments.push(SceneSegment::stub(segments.len(), buffer.join("\n")));
    }

    tracing::debug!(
        scenes = segments.len(),
        markers = markers.len(),
        "segmented source text"
    );
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lyrics(segments: &[SceneSegment]) -> Vec<&str> {
        segments.iter().map(|s| s.lyrics.as_str()).collect()
    }

    #[test]
    fn test_single_marker_splits_in_two() {
        let segments = segment_text("Line1\nLine2\nLine3\nLine4", &[2]);
        assert_eq!(lyrics(&segments), vec!["Line1\nLine2", "Line3\nLine4"]);
        assert_eq!(segments[0].id, "scene-0");
        assert_eq!(segments[1].id, "scene-1");
        assert_eq!(segments[1].section_title, "Scene 2");
        assert!(segments[1].visuals.is_empty());
        assert!(segments[1].characters.is_empty());
    }

    #[test]
    fn test_no_markers_single_scene() {
        let segments = segment_text("A\nB", &[]);
        assert_eq!(lyrics(&segments), vec!["A\nB"]);
    }

    #[test]
    fn test_blank_input_is_empty() {
        assert!(segment_text("", &[1]).is_empty());
        assert!(segment_text("  \n\t\n   ", &[]).is_empty());
    }

    #[test]
    fn test_markers_never_produce_empty_scenes() {
        let segments = segment_text("a\nb\nc", &[0, 1, 2, 7]);
        assert_eq!(lyrics(&segments), vec!["a", "b", "c"]);
        assert!(segments.iter().all(|s| !s.lyrics.is_empty()));
    }

    #[test]
    fn test_blank_lines_and_whitespace_are_dropped() {
        let raw = "  first  \r\n\r\n second\n\n\n  third";
        assert_eq!(canonical_lines(raw), vec!["first", "second", "third"]);
        let segments = segment_text(raw, &[2]);
        assert_eq!(lyrics(&segments), vec!["first\nsecond", "third"]);
    }

    #[test]
    fn test_concatenation_reproduces_lines() {
        let raw = "one\n two \n\nthree\nfour\nfive\n six";
        for markers in [vec![], vec![1], vec![1, 2, 3], vec![0, 5], vec![3, 4, 5]] {
            let segments = segment_text(raw, &markers);
            let rejoined = lyrics(&segments).join("\n");
            assert_eq!(rejoined, canonical_lines(raw).join("\n"), "markers {markers:?}");
        }
    }
}
