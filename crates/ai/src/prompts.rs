//! System prompts, loaded from a directory with built-in fallbacks.

use std::path::Path;

use tracing::{info, warn};

pub const COLLEGE_RECS_FILE: &str = "college_recs_prompt.txt";
pub const WEB_SEARCH_FILE: &str = "web_search_prompt.txt";
pub const PROFILE_FILE: &str = "profile_generation_prompt.txt";

const DEFAULT_COLLEGE_RECS: &str = r#"You are a college counselor. Based on the student profile provided by the user, recommend 9 colleges (3 reach, 3 match, 3 safety).

Respond with JSON in exactly this structure:
{
  "recommendations": [
    {
      "type": "Reach" | "Match" | "Safety",
      "name": "College Name",
      "location": "City, State",
      "fit_score": "1-100",
      "fit": { "academic": "Good", "social_cultural": "Great", "financial": "Fair" },
      "overall_fit_rationale": ["reason 1", "reason 2"],
      "distinctive_opportunities": [
        { "title": "Program name", "description": "Why it matters", "url": "best guess", "search_query": "query to find the official page" }
      ],
      "potential_challenges": ["challenge 1"],
      "why_school_essay_points": ["point 1"],
      "how_to_stand_out": ["tip 1"]
    }
  ]
}"#;

const DEFAULT_WEB_SEARCH: &str = r#"You receive a JSON list of {title, search_query} objects.
For each entry, use the search_query to find the most relevant official program page.
Prioritize .edu domains and the school's own website.
Respond with a JSON object {"data": [{"title": "...", "url": "..."}]} keeping every title exactly as given."#;

const DEFAULT_PROFILE: &str = r#"You are an expert college counselor creating comprehensive student profiles.
Generate a detailed analysis in JSON format with a "student_profile" array of section objects.
Each section must have: section_id, title, type ("paragraph" or "list") and content."#;

/// The system prompts used by the generation pipelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub college_recommendations: String,
    pub link_search: String,
    pub profile: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            college_recommendations: DEFAULT_COLLEGE_RECS.to_string(),
            link_search: DEFAULT_WEB_SEARCH.to_string(),
            profile: DEFAULT_PROFILE.to_string(),
        }
    }
}

impl PromptSet {
    /// Load prompts from `dir`, falling back to the built-in text for any missing file.
    pub fn load(dir: &Path) -> Self {
        let defaults = Self::default();
        Self {
            college_recommendations: read_or(dir, COLLEGE_RECS_FILE, defaults.college_recommendations),
            link_search: read_or(dir, WEB_SEARCH_FILE, defaults.link_search),
            profile: read_or(dir, PROFILE_FILE, defaults.profile),
        }
    }
}

fn read_or(dir: &Path, file: &str, fallback: String) -> String {
    let path = dir.join(file);
    match std::fs::read_to_string(&path) {
        Ok(content) if !content.trim().is_empty() => {
            info!(path = %path.display(), chars = content.len(), "loaded prompt");
            content
        }
        Ok(_) => {
            warn!(path = %path.display(), "prompt file is empty; using built-in prompt");
            fallback
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "prompt file unavailable; using built-in prompt");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_falls_back_to_defaults() {
        let prompts = PromptSet::load(Path::new("/definitely/not/a/prompt/dir"));
        assert_eq!(prompts, PromptSet::default());
    }

    #[test]
    fn files_override_defaults() {
        let dir = std::env::temp_dir().join(format!("counsel-prompts-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(PROFILE_FILE), "custom profile prompt").unwrap();
        std::fs::write(dir.join(WEB_SEARCH_FILE), "   ").unwrap();

        let prompts = PromptSet::load(&dir);
        assert_eq!(prompts.profile, "custom profile prompt");
        assert_eq!(prompts.link_search, PromptSet::default().link_search);
        assert_eq!(prompts.college_recommendations, PromptSet::default().college_recommendations);

        std::fs::remove_dir_all(&dir).ok();
    }
}
