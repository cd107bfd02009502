use anyhow::Result;
use std::path::Path;
use std::process;

use crate::args::BaseArgs;

pub fn run(base: &BaseArgs, path: &Path, key: &str) -> Result<()> {
    let cfg = super::load_file(path);

    match cfg.get_field(key) {
        Some(value) => {
            if base.json {
                println!("{}", serde_json::to_string(&value)?);
            } else {
                println!("{value}");
            }
            Ok(())
        }
        None => {
            process::exit(1);
        }
    }
}
