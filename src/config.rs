//! Mapping-file parsing and the resolved startup context

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Application name; also the directory under the user config root that
/// holds per-hostname overlay state.
pub const APP_NAME: &str = "meshgate";

/// One `<hostname>=<origin>` pair from the mapping file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyMapping {
    /// The overlay hostname this proxy answers as
    pub hostname: String,
    /// The origin descriptor traffic is forwarded to
    pub origin: String,
}

/// Startup context resolved once and shared read-only by every lifecycle
#[derive(Debug, Clone)]
pub struct AppContext {
    /// Root under which each hostname gets its own state directory
    pub state_root: PathBuf,
}

impl AppContext {
    /// Resolve from the user config directory (`~/.config` on Linux)
    pub fn from_user_config_dir() -> Result<Self> {
        let root =
            dirs_next::config_dir().context("can't find default user config directory")?;
        Ok(Self {
            state_root: root.join(APP_NAME),
        })
    }

    /// The state directory for one hostname's overlay identity
    pub fn state_dir(&self, hostname: &str) -> PathBuf {
        self.state_root.join(hostname)
    }
}

/// Load and parse the mapping file.
///
/// Each non-empty line is `<hostname>=<origin>`, split at the first `=`, so
/// origins containing `=` are legal. A line without a `=` is a fatal
/// configuration error. A repeated hostname keeps its last origin.
pub fn parse_mappings(path: &Path) -> Result<Vec<ProxyMapping>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to open config file {}", path.display()))?;
    parse_mapping_lines(&contents)
}

fn parse_mapping_lines(contents: &str) -> Result<Vec<ProxyMapping>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut mappings: Vec<ProxyMapping> = Vec::new();

    for line in contents.lines() {
        // Blank lines are deliberately tolerated; only non-empty lines must
        // carry a mapping.
        if line.is_empty() {
            continue;
        }
        let Some((hostname, origin)) = line.split_once('=') else {
            bail!("invalid line: lines must be <overlay hostname>=<origin url>: {line}");
        };

        match index.get(hostname) {
            Some(&at) => mappings[at].origin = origin.to_string(),
            None => {
                index.insert(hostname.to_string(), mappings.len());
                mappings.push(ProxyMapping {
                    hostname: hostname.to_string(),
                    origin: origin.to_string(),
                });
            }
        }
    }

    Ok(mappings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_mappings() {
        let mappings = parse_mapping_lines(
            "web=http://localhost:3000\napi=unix:///run/api.sock\n",
        )
        .unwrap();

        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].hostname, "web");
        assert_eq!(mappings[0].origin, "http://localhost:3000");
        assert_eq!(mappings[1].hostname, "api");
        assert_eq!(mappings[1].origin, "unix:///run/api.sock");
    }

    #[test]
    fn test_last_occurrence_wins() {
        let mappings =
            parse_mapping_lines("web=http://localhost:3000\nweb=http://localhost:4000\n")
                .unwrap();

        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].origin, "http://localhost:4000");
    }

    #[test]
    fn test_origin_may_contain_equals() {
        let mappings = parse_mapping_lines("web=http://localhost:3000/?a=b\n").unwrap();
        assert_eq!(mappings[0].origin, "http://localhost:3000/?a=b");
    }

    #[test]
    fn test_line_without_delimiter_is_fatal() {
        assert!(parse_mapping_lines("not-a-mapping\n").is_err());
    }

    #[test]
    fn test_empty_file_yields_no_mappings() {
        assert!(parse_mapping_lines("").unwrap().is_empty());
        assert!(parse_mapping_lines("\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_state_dir_layout() {
        let ctx = AppContext {
            state_root: PathBuf::from("/home/op/.config/meshgate"),
        };
        assert_eq!(
            ctx.state_dir("web"),
            PathBuf::from("/home/op/.config/meshgate/web")
        );
    }
}
