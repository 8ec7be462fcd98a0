// Credential persistence: `KEY=value` dotfiles and presence checks.
// Nothing here validates the key itself; the first remote call does that.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CliError, Result};

/// The one variable every remote command needs.
pub const API_KEY_VAR: &str = "GOOGLE_API_KEY";

const LOCAL_DOTENV: &str = ".env";
const GLOBAL_DOTENV: &str = ".llm-cli.env";

/// `.env` in the current directory.
pub fn local_dotenv_path() -> PathBuf {
    PathBuf::from(LOCAL_DOTENV)
}

/// `~/.llm-cli.env`, falling back to the current directory when there is no
/// home directory.
pub fn global_dotenv_path() -> PathBuf {
    let dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.join(GLOBAL_DOTENV)
}

/// Persist `pairs` into the dotfile at `path`.
///
/// Lines for other keys are kept as they are. A key that is written replaces
/// every earlier line for that key.
pub fn write_dotenv(path: &Path, pairs: &[(&str, &str)]) -> Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut out = String::new();
    for line in existing.lines() {
        let key = line
            .trim_start()
            .trim_start_matches("export ")
            .split('=')
            .next()
            .unwrap_or("")
            .trim();
        if pairs.iter().any(|(k, _)| *k == key) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    for (key, value) in pairs {
        out.push_str(&format!("{}={}\n", key, quote_value(value)));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, out)?;
    debug!(path = %path.display(), keys = pairs.len(), "wrote dotfile");
    Ok(())
}

/// Quote `value` so dotenvy reads it back unchanged. Single quotes are
/// literal; a value that holds one falls back to double quotes with `\`,
/// `"`, `$` and newlines escaped.
fn quote_value(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{}'", value);
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' | '$' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Parse a dotfile without touching the process environment.
pub fn read_dotenv(path: &Path) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for item in dotenvy::from_path_iter(path)? {
        let (key, value) = item?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Load dotfiles into the process environment, first file first. Variables
/// that are already set are never overridden and missing files are skipped.
pub fn load_env(paths: &[PathBuf]) {
    for path in paths {
        match dotenvy::from_path(path) {
            Ok(()) => debug!(path = %path.display(), "loaded dotfile"),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "could not load dotfile"),
        }
    }
}

/// Fail with `MissingCredential` on the first name `lookup` does not know.
pub fn verify_vars<F>(names: &[&str], lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    for name in names {
        if lookup(name).is_none() {
            return Err(CliError::MissingCredential(name.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn configured_key_is_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");

        write_dotenv(&path, &[(API_KEY_VAR, "abc-123")]).unwrap();

        let vars = read_dotenv(&path).unwrap();
        assert_eq!(vars.get(API_KEY_VAR).map(String::as_str), Some("abc-123"));
    }

    #[test]
    fn rewriting_replaces_key_and_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "OTHER=1\nGOOGLE_API_KEY=old\n").unwrap();

        write_dotenv(&path, &[(API_KEY_VAR, "new")]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "OTHER=1\nGOOGLE_API_KEY='new'\n");
    }

    #[test]
    fn keys_with_special_characters_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let keys = [
            "AIza$abc",
            "abc def",
            "k#1 #2",
            "x'y\"z",
            "it's $HOME",
            "back\\slash'",
            " padded ",
        ];

        for key in keys {
            write_dotenv(&path, &[(API_KEY_VAR, key), ("OTHER", "kept")]).unwrap();
            let vars = read_dotenv(&path).unwrap();
            assert_eq!(vars.get(API_KEY_VAR).map(String::as_str), Some(key), "key {key:?}");
            assert_eq!(vars.get("OTHER").map(String::as_str), Some("kept"));
        }
    }

    #[test]
    fn local_file_wins_and_set_vars_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join(".env");
        let global = dir.path().join(".llm-cli.env");
        fs::write(&local, "LLM_CLI_LOAD_SHARED=local\nLLM_CLI_LOAD_PRESET=local\n").unwrap();
        fs::write(&global, "LLM_CLI_LOAD_SHARED=global\nLLM_CLI_LOAD_GLOBAL_ONLY=global\n").unwrap();
        std::env::set_var("LLM_CLI_LOAD_PRESET", "preset");

        load_env(&[local, dir.path().join("missing.env"), global]);

        assert_eq!(std::env::var("LLM_CLI_LOAD_SHARED").unwrap(), "local");
        assert_eq!(std::env::var("LLM_CLI_LOAD_PRESET").unwrap(), "preset");
        assert_eq!(std::env::var("LLM_CLI_LOAD_GLOBAL_ONLY").unwrap(), "global");
    }

    #[test]
    fn creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(".env");
        write_dotenv(&path, &[(API_KEY_VAR, "k")]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn verify_fails_only_when_absent() {
        let vars: HashMap<&str, &str> = [("PRESENT", ""), ("ALSO", "x")].into_iter().collect();
        let lookup = |n: &str| vars.get(n).map(|v| v.to_string());

        assert!(verify_vars(&["PRESENT", "ALSO"], lookup).is_ok());
        match verify_vars(&["PRESENT", "MISSING"], lookup) {
            Err(CliError::MissingCredential(name)) => assert_eq!(name, "MISSING"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn global_path_is_a_dotfile() {
        assert!(global_dotenv_path().ends_with(".llm-cli.env"));
    }
}
