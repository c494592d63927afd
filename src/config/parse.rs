use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Parsed `KEY=VALUE` pairs. Later duplicates overwrite earlier ones.
pub type EnvMap = BTreeMap<String, String>;

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// Parse dotenv-style text into an [`EnvMap`].
///
/// Line syntax (comments, `export`, quoting) is dotenvy's. On top of it,
/// unparsable lines and keys that are not shell identifiers are skipped with
/// a warning, and values are trimmed.
///
/// Nothing is written to the process environment.
pub fn parse_env(text: &str) -> Result<EnvMap, dotenvy::Error> {
    collect(dotenvy::from_read_iter(text.as_bytes()))
}

fn collect<R: Read>(iter: dotenvy::Iter<R>) -> Result<EnvMap, dotenvy::Error> {
    let mut out = EnvMap::new();
    for item in iter {
        match item {
            Ok((key, value)) => {
                if !KEY_RE.is_match(&key) {
                    warn!(key = %key, "skipping entry with invalid key");
                    continue;
                }
                out.insert(key, value.trim().to_string());
            }
            Err(dotenvy::Error::LineParse(line, at)) => {
                warn!(line = %line, at, "skipping unparsable line");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

/// Read and parse the configuration file at `path`.
///
/// # Errors
/// Returns an error if the file exists but cannot be read, or if it is
/// missing and `required` is set.
pub fn load_env_file(path: &Path, required: bool) -> Result<EnvMap> {
    if !required && !path.exists() {
        debug!(path = %path.display(), "no config file, using environment only");
        return Ok(EnvMap::new());
    }
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("config not readable: {}", path.display()))?;
    collect(iter).with_context(|| format!("config not readable: {}", path.display()))
}
