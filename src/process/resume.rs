//! Resumption prompt used after a context-compaction restart

/// What a restarted agent needs to carry on without its old session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeContext {
    pub original_task: String,
    pub progress: Option<String>,
    pub files_touched: Vec<String>,
}

/// Render the resumption prompt installed as the new system prompt.
pub fn build_resume_prompt(ctx: &ResumeContext) -> String {
    let progress = ctx
        .progress
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("No progress was recorded before the context was compacted.");

    let files = if ctx.files_touched.is_empty() {
        "None recorded.".to_string()
    } else {
        ctx.files_touched
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are resuming work after your conversation context was compacted. \
         Your previous session is gone; everything you need is below.\n\n\
         ## Original task\n{}\n\n\
         ## Progress so far\n{}\n\n\
         ## Files touched\n{}\n\n\
         Continue from where you left off. Re-read any of the files above \
         before changing them again.",
        ctx.original_task.trim(),
        progress,
        files
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_contains_all_sections() {
        let prompt = build_resume_prompt(&ResumeContext {
            original_task: "Migrate the billing service to Postgres".to_string(),
            progress: Some("Schema written, data copy pending".to_string()),
            files_touched: vec!["db/schema.sql".to_string(), "src/billing.rs".to_string()],
        });
        assert!(prompt.contains("## Original task\nMigrate the billing service to Postgres"));
        assert!(prompt.contains("Schema written, data copy pending"));
        assert!(prompt.contains("- db/schema.sql\n- src/billing.rs"));
    }

    #[test]
    fn test_prompt_fallbacks() {
        let prompt = build_resume_prompt(&ResumeContext {
            original_task: "Task".to_string(),
            progress: Some("   ".to_string()),
            files_touched: vec![],
        });
        assert!(prompt.contains("No progress was recorded"));
        assert!(prompt.contains("## Files touched\nNone recorded."));
    }
}
