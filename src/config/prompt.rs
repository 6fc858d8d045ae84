use chrono::Utc;
use std::fs;
use std::path::Path;
use log::{ info, warn };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read system prompt file '{0}': {1}")] IoError(String, #[source] std::io::Error),

    #[error("System prompt file '{0}' is empty")] EmptyFile(String),
}

/// Resolves the fixed system instruction. An inline prompt wins over a file;
/// `{date}` is replaced with the current UTC date.
pub fn load_system_prompt(
    inline: Option<&str>,
    path: Option<&str>
) -> Result<Option<String>, PromptError> {
    let inline = inline.filter(|p| !p.trim().is_empty());

    let template = match (inline, path) {
        (Some(text), Some(path)) => {
            warn!("Both SYSTEM_PROMPT and SYSTEM_PROMPT_PATH are set; ignoring '{}'", path);
            text.to_string()
        }
        (Some(text), None) => text.to_string(),
        (None, Some(path)) => read_prompt_file(path)?,
        (None, None) => {
            return Ok(None);
        }
    };

    Ok(Some(render(&template)))
}

fn read_prompt_file<P: AsRef<Path>>(path: P) -> Result<String, PromptError> {
    let display = path.as_ref().display().to_string();
    let content = fs::read_to_string(&path).map_err(|e| PromptError::IoError(display.clone(), e))?;
    if content.trim().is_empty() {
        return Err(PromptError::EmptyFile(display));
    }
    info!("Loaded system prompt from {}", display);
    Ok(content.trim().to_string())
}

fn render(template: &str) -> String {
    template.replace("{date}", &Utc::now().format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), name));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn no_prompt_configured() {
        assert_eq!(load_system_prompt(None, None).unwrap(), None);
        assert_eq!(load_system_prompt(Some("  "), None).unwrap(), None);
    }

    #[test]
    fn inline_prompt_wins_over_file() {
        let prompt = load_system_prompt(Some("Be concise."), Some("/does/not/exist")).unwrap();
        assert_eq!(prompt.as_deref(), Some("Be concise."));
    }

    #[test]
    fn reads_and_renders_file_prompt() {
        let path = temp_file("system.txt", "\nToday is {date}.\n");
        let prompt = load_system_prompt(None, path.to_str()).unwrap().unwrap();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(prompt, format!("Today is {}.", today));
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn reports_missing_and_empty_files() {
        let err = load_system_prompt(None, Some("/does/not/exist.txt")).unwrap_err();
        assert!(matches!(err, PromptError::IoError(..)));
        assert!(err.to_string().starts_with("Failed to read system prompt file '/does/not/exist.txt'"));
        assert!(std::error::Error::source(&err).is_some());

        let path = temp_file("empty.txt", "   \n");
        let err = load_system_prompt(None, path.to_str()).unwrap_err();
        assert!(matches!(err, PromptError::EmptyFile(_)));
        assert!(err.to_string().ends_with("is empty"));
        fs::remove_file(path).unwrap();
    }
}
