/*
   Manages prompt template loading for the entity provider.
   Templates are either the embedded built-in or a named file in the prompts
   directory, falling back to the built-in when the file is missing.
*/

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use crate::config::Config;

const BUILTIN_PROMPT: &str = include_str!("templates/builtin_prompt.md");

#[derive(Debug, Clone)]
pub struct PromptLoader {
    prompts_dir: PathBuf,
}

impl PromptLoader {
    /// Uses `<data dir>/prompts`, seeding `default.md` with the built-in prompt.
    pub fn new() -> Result<Self> {
        let project_dirs = Config::get_app_dirs()?;
        Self::with_dir(project_dirs.data_dir().join("prompts"))
    }

    pub fn with_dir<P: AsRef<Path>>(prompts_dir: P) -> Result<Self> {
        let prompts_dir = prompts_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&prompts_dir)?;

        let default_prompt_path = prompts_dir.join("default.md");
        if !default_prompt_path.exists() {
            std::fs::write(&default_prompt_path, BUILTIN_PROMPT)?;
            debug!("Seeded default prompt at {:?}", default_prompt_path);
        }

        Ok(Self { prompts_dir })
    }

    pub fn builtin() -> &'static str {
        BUILTIN_PROMPT
    }

    pub fn load_prompt(&self, template_name: Option<&str>) -> Result<String> {
        match template_name {
            None => Ok(BUILTIN_PROMPT.to_string()),
            Some(name) => {
                let prompt_path = self.prompts_dir.join(format!("{}.md", name));
                match std::fs::read_to_string(&prompt_path) {
                    Ok(content) => Ok(content),
                    Err(_) => {
                        warn!("Prompt template '{}' not found, using built-in", name);
                        Ok(BUILTIN_PROMPT.to_string())
                    }
                }
            }
        }
    }

    pub fn format_prompt(&self, template: &str, text: &str) -> String {
        template.replace("{text}", &text.replace('"', r#"\""#))
    }
}
