use anyhow::Result;
use std::path::Path;

use crate::ui::{print_command_status, CommandStatus};

pub fn run(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut cfg = super::load_file(path);
    cfg.set_field(key, value.to_string())?;
    super::save_file(path, &cfg)?;

    print_command_status(CommandStatus::Success, &format!("Set {key} = {value}"));
    Ok(())
}

pub fn unset(path: &Path, key: &str) -> Result<()> {
    let mut cfg = super::load_file(path);
    cfg.unset_field(key);
    super::save_file(path, &cfg)?;

    print_command_status(CommandStatus::Success, &format!("Unset {key}"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn set_then_unset_rewrites_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sqltune").join("config.json");

        run(&path, "container", "archive").unwrap();
        run(&path, "fetch_interval_secs", "60").unwrap();
        let cfg = super::super::load_file(&path);
        assert_eq!(cfg.container.as_deref(), Some("archive"));
        assert_eq!(cfg.fetch_interval_secs, Some(60));

        unset(&path, "container").unwrap();
        let cfg = super::super::load_file(&path);
        assert_eq!(cfg.container, None);
        assert_eq!(cfg.fetch_interval_secs, Some(60));
    }

    #[test]
    fn invalid_value_leaves_file_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        run(&path, "refresh_interval_secs", "300").unwrap();

        assert!(run(&path, "refresh_interval_secs", "often").is_err());
        let cfg = super::super::load_file(&path);
        assert_eq!(cfg.refresh_interval_secs, Some(300));
    }
}
