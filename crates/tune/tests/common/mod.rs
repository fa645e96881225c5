//! Common test utilities for Tune CLI tests
#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Isolated HOME with its own `.tune` directory
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub threads_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let config_dir = temp_dir.path().join(".tune");
        let threads_dir = config_dir.join("threads");

        Ok(Self {
            temp_dir,
            config_dir,
            threads_dir,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    /// Command with HOME pointed at the test environment and no secrets
    /// inherited from the caller
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tune"));
        cmd.env("HOME", self.temp_dir.path());
        cmd.env_remove("GROQ_API_KEY");
        cmd.env_remove("SPOTIFY_ACCESS_TOKEN");
        cmd.env_remove("SPOTIFY_USER_ID");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn write_config(&self, config: &Value) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::write(self.config_file(), serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    /// Config pointing both the model and Spotify at `base_url`
    pub fn mock_config(&self, base_url: &str, spotify_token: Option<&str>) -> Value {
        json!({
            "model": {
                "api_key": "test-key",
                "api_base": base_url,
                "model": "test-model"
            },
            "agent": {
                "retry": { "base_delay_ms": 1, "max_delay_ms": 5 }
            },
            "spotify": {
                "api_base": base_url,
                "access_token": spotify_token.unwrap_or(""),
                "user_id": "user1"
            },
            "checkpoints": {
                "dir": self.threads_dir.to_string_lossy()
            }
        })
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

/// Chat completion that answers with text
pub fn completion_text(text: &str) -> String {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 }
    })
    .to_string()
}

/// Chat completion that requests one tool call
pub fn completion_tool_call(id: &str, name: &str, args: Value) -> String {
    json!({
        "id": "chatcmpl-2",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": args.to_string() }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
    .to_string()
}
