use std::path::PathBuf;

use rustyline::{Config, Editor, Result};

const HISTORY_FILE: &str = ".tutor_chat_history";

pub fn generate_prompt(custom_prompt: Option<&str>) -> String {
    custom_prompt.unwrap_or("> ").to_string()
}

pub fn rl() -> Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(false)
        .build();
    Editor::with_config(config)
}

/// Where line history is kept between runs, if a home directory exists.
pub fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILE))
}
