use anyhow::Result;
use serde_json::{Map, Value};
use std::path::Path;

use crate::args::BaseArgs;

pub fn run(base: &BaseArgs, path: &Path, verbose: bool) -> Result<()> {
    let config = super::load_file(path);
    let fields = config.non_empty_fields();

    let output = if verbose {
        format_verbose(&display_path(path), &fields, base.json)?
    } else {
        format_resolved(&fields, base.json)?
    };
    if !output.is_empty() {
        if base.json {
            // json goes to stdout so it can be piped to other tools
            println!("{output}");
        } else {
            eprintln!("{output}");
        }
    }

    Ok(())
}

fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| pathdiff::diff_paths(path, &cwd))
        .filter(|rel| !rel.starts_with(".."))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

fn fields_map(fields: &[(&str, String)]) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
        .collect()
}

fn format_resolved(fields: &[(&str, String)], json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string(&fields_map(fields))?)
    } else {
        Ok(fields
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

fn format_verbose(path: &str, fields: &[(&str, String)], json: bool) -> Result<String> {
    if json {
        let mut map = Map::new();
        map.insert(path.to_string(), Value::Object(fields_map(fields)));
        Ok(serde_json::to_string(&map)?)
    } else {
        let mut group = String::from(path);
        if fields.is_empty() {
            group.push_str("\n  (empty)");
        }
        for (key, value) in fields {
            group.push_str(&format!("\n  {key}: {value}"));
        }
        Ok(group)
    }
}
