//! AI assistant integrations.
//!
//! Each supported assistant reads MCP servers from its own JSON config file.
//! The variant is chosen once at startup by probing the environment.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

/// Key the gateway registers itself under in `mcpServers`.
pub const SERVER_KEY: &str = "docgen-gateway";

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("no config directory for {0}")]
    NoConfigDir(&'static str),

    #[error("reading or writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a JSON object config: {reason}")]
    Json { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssistantProvider {
    ClaudeDesktop,
    Windsurf,
    Cursor,
}

impl AssistantProvider {
    pub const ALL: [AssistantProvider; 3] = [
        AssistantProvider::ClaudeDesktop,
        AssistantProvider::Windsurf,
        AssistantProvider::Cursor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AssistantProvider::ClaudeDesktop => "Claude Desktop",
            AssistantProvider::Windsurf => "Windsurf",
            AssistantProvider::Cursor => "Cursor",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "claude" | "claude-desktop" => Some(AssistantProvider::ClaudeDesktop),
            "windsurf" => Some(AssistantProvider::Windsurf),
            "cursor" => Some(AssistantProvider::Cursor),
            _ => None,
        }
    }

    /// `MCP_ASSISTANT` first, then the first provider whose config directory exists.
    pub fn detect() -> Option<Self> {
        if let Ok(explicit) = std::env::var("MCP_ASSISTANT") {
            match Self::parse(&explicit) {
                Some(p) => return Some(p),
                None => tracing::warn!("assistant: unknown MCP_ASSISTANT '{}', probing instead", explicit),
            }
        }
        Self::ALL.into_iter().find(|p| p.is_available())
    }

    /// Location of the provider's MCP config file.
    pub fn config_path(&self) -> Result<PathBuf, AssistantError> {
        let missing = || AssistantError::NoConfigDir(self.name());
        Ok(match self {
            AssistantProvider::ClaudeDesktop => dirs::config_dir()
                .ok_or_else(missing)?
                .join("Claude")
                .join("claude_desktop_config.json"),
            AssistantProvider::Windsurf => dirs::home_dir()
                .ok_or_else(missing)?
                .join(".codeium")
                .join("windsurf")
                .join("mcp_config.json"),
            AssistantProvider::Cursor => dirs::home_dir()
                .ok_or_else(missing)?
                .join(".cursor")
                .join("mcp.json"),
        })
    }

    /// The provider is installed when its config directory exists.
    pub fn is_available(&self) -> bool {
        self.config_path()
            .ok()
            .and_then(|p| p.parent().map(Path::is_dir))
            .unwrap_or(false)
    }

    /// Make sure the config directory exists.
    pub fn initialize(&self) -> Result<PathBuf, AssistantError> {
        let path = self.config_path()?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| AssistantError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        Ok(path)
    }

    /// Register the gateway's `/mcp` endpoint with this assistant.
    pub fn configure_mcp(&self, gateway_url: &str) -> Result<PathBuf, AssistantError> {
        let path = self.initialize()?;
        write_mcp_config(&path, gateway_url)?;
        tracing::info!("assistant: registered gateway with {} at {}", self.name(), path.display());
        Ok(path)
    }

    pub fn info(&self) -> Value {
        json!({
            "id": self,
            "name": self.name(),
            "available": self.is_available(),
            "configPath": self.config_path().ok().map(|p| p.display().to_string()),
        })
    }
}

/// Merge `mcpServers.docgen-gateway = {url}` into the JSON file at `path`,
/// keeping every other key and server entry.
pub fn write_mcp_config(path: &Path, gateway_url: &str) -> Result<(), AssistantError> {
    let io_err = |source| AssistantError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json_err = |reason: String| AssistantError::Json {
        path: path.to_path_buf(),
        reason,
    };

    let mut root = match std::fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Map::new(),
        Ok(text) => match serde_json::from_str::<Value>(&text).map_err(|e| json_err(e.to_string()))? {
            Value::Object(map) => map,
            _ => return Err(json_err("top level is not an object".into())),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(io_err(e)),
    };

    let servers = root
        .entry("mcpServers")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(servers) = servers else {
        return Err(json_err("'mcpServers' is not an object".into()));
    };
    let endpoint = format!("{}/mcp", gateway_url.trim_end_matches('/'));
    servers.insert(SERVER_KEY.to_string(), json!({ "url": endpoint }));

    let text = serde_json::to_string_pretty(&Value::Object(root)).map_err(|e| json_err(e.to_string()))?;
    std::fs::write(path, text).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_names() {
        assert_eq!(AssistantProvider::parse("Claude_Desktop"), Some(AssistantProvider::ClaudeDesktop));
        assert_eq!(AssistantProvider::parse("windsurf"), Some(AssistantProvider::Windsurf));
        assert_eq!(AssistantProvider::parse(" CURSOR "), Some(AssistantProvider::Cursor));
        assert_eq!(AssistantProvider::parse("vim"), None);
    }

    #[test]
    fn writes_fresh_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");

        write_mcp_config(&path, "http://localhost:8080/").unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            written,
            json!({ "mcpServers": { "docgen-gateway": { "url": "http://localhost:8080/mcp" } } })
        );
    }

    #[test]
    fn merges_with_existing_servers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claude_desktop_config.json");
        std::fs::write(
            &path,
            r#"{"theme":"dark","mcpServers":{"other":{"command":"npx"},"docgen-gateway":{"url":"old"}}}"#,
        )
        .unwrap();

        write_mcp_config(&path, "http://gw:9000").unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["theme"], "dark");
        assert_eq!(written["mcpServers"]["other"]["command"], "npx");
        assert_eq!(written["mcpServers"]["docgen-gateway"]["url"], "http://gw:9000/mcp");
    }

    #[test]
    fn rejects_non_object_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            write_mcp_config(&path, "http://gw"),
            Err(AssistantError::Json { .. })
        ));
    }

    #[test]
    fn info_reports_identity() {
        let info = AssistantProvider::Cursor.info();
        assert_eq!(info["id"], "cursor");
        assert_eq!(info["name"], "Cursor");
    }
}
