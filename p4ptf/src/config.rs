/*
Copyright (c) 2022 VMware, Inc.
SPDX-License-Identifier: MIT
Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:
The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.
THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/

//! Harness configuration.
//!
//! A [`TestConfig`] starts from defaults that match a local `simple_switch_grpc`
//! and can be overridden from a PTF-style parameter string, from `P4PTF_*`
//! environment variables, or from a JSON file.

use serde::{Deserialize, Serialize};

use tracing::debug;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{P4Error, Result};
use crate::runtime::SetPipelineAction;

/// Prefix of the environment variables read by [`TestConfig::from_env`].
pub const ENV_PREFIX: &str = "P4PTF_";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Address of the device's P4Runtime server.
    pub grpc_addr: String,
    pub device_id: u64,
    pub role_id: u64,
    /// Low 64 bits of the election id; the high bits are 0.
    pub election_id: u64,
    /// The switch port connected to the controller.
    pub cpu_port: u32,
    /// P4Info in text format.  Without it there is no schema and no
    /// pipeline to push.
    pub p4info: Option<PathBuf>,
    /// Target-specific device configuration, e.g. a BMv2 JSON file.
    pub device_config: Option<PathBuf>,
    pub cookie: Option<u64>,
    /// One of `verify`, `verify-and-save`, `verify-and-commit`, `commit`,
    /// `reconcile-and-commit`.  Unset means the pipeline is not pushed.
    pub pipeline_action: Option<String>,
    pub arbitration_timeout_ms: u64,
    /// Default wait for packet-ins and data-plane packets.
    pub packet_timeout_ms: u64,
    /// Data-plane ports, in the order [`crate::P4RuntimeTest::swport`]
    /// indexes them.
    pub ports: Vec<u32>,
    /// `hw` when running against hardware.
    pub platform: Option<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            grpc_addr: "localhost:50051".into(),
            device_id: 1,
            role_id: 0,
            election_id: 1,
            cpu_port: 255,
            p4info: None,
            device_config: None,
            cookie: None,
            pipeline_action: None,
            arbitration_timeout_ms: 2000,
            packet_timeout_ms: 2000,
            ports: Vec::new(),
            platform: None,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| P4Error::invalid(format!("{}: {:?} is not a number", key, value)))
}

impl TestConfig {
    pub fn arbitration_timeout(&self) -> Duration {
        Duration::from_millis(self.arbitration_timeout_ms)
    }

    pub fn packet_timeout(&self) -> Duration {
        Duration::from_millis(self.packet_timeout_ms)
    }

    /// Whether the tests run against hardware.
    pub fn is_hardware(&self) -> bool {
        self.platform.as_deref() == Some("hw")
    }

    /// The configured pipeline action, if any.
    pub fn pipeline_action(&self) -> Result<Option<SetPipelineAction>> {
        self.pipeline_action.as_deref().map(str::parse).transpose()
    }

    /// Sets the field named `key` from its textual form.  Keys use the
    /// field names; PTF's `grpcaddr` and `pltfm` are accepted too.  Returns
    /// `false` for keys that name no field.
    pub fn set(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "grpc_addr" | "grpcaddr" => self.grpc_addr = value.into(),
            "device_id" => self.device_id = parse_number(key, value)?,
            "role_id" => self.role_id = parse_number(key, value)?,
            "election_id" => self.election_id = parse_number(key, value)?,
            "cpu_port" => self.cpu_port = parse_number(key, value)?,
            "p4info" => self.p4info = Some(value.into()),
            "device_config" => self.device_config = Some(value.into()),
            "cookie" => self.cookie = Some(parse_number(key, value)?),
            "pipeline_action" => {
                value.parse::<SetPipelineAction>()?;
                self.pipeline_action = Some(value.into());
            }
            "arbitration_timeout_ms" => self.arbitration_timeout_ms = parse_number(key, value)?,
            "packet_timeout_ms" => self.packet_timeout_ms = parse_number(key, value)?,
            "ports" => {
                self.ports = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| parse_number(key, p))
                    .collect::<Result<Vec<u32>>>()?
            }
            "platform" | "pltfm" => self.platform = Some(value.into()),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Parses PTF test parameters, e.g.
    /// `p4info='main.p4info.txt';grpcaddr='localhost:50051';device_id='1'`.
    /// Values may be quoted with single or double quotes.  Unknown keys are
    /// ignored, since PTF passes the same string to every test.
    pub fn from_test_params(params: &str) -> Result<Self> {
        let mut config = Self::default();
        for param in params.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = param
                .split_once('=')
                .ok_or_else(|| P4Error::invalid(format!("{:?}: expected key=value", param)))?;
            let value = value.trim();
            let value = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
                .unwrap_or(value);
            if !config.set(key.trim(), value)? {
                debug!("ignoring test parameter {:?}", key);
            }
        }
        Ok(config)
    }

    /// Applies every `P4PTF_<FIELD>` variable among `vars` (for example
    /// `P4PTF_DEVICE_ID`).
    pub fn merge_env<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(ENV_PREFIX) {
                if !self.set(&key.to_ascii_lowercase(), &value)? {
                    debug!("ignoring environment variable {}", name);
                }
            }
        }
        Ok(self)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env(std::env::vars())
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        serde_json::from_reader(reader)
            .map_err(|e| P4Error::invalid(format!("{}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params() -> anyhow::Result<()> {
        let config = TestConfig::from_test_params(
            "p4info='build/main.p4info.txt';grpcaddr='10.0.0.1:50051';device_id='3';\
             cpu_port=\"510\";ports=1,2, 3;pltfm='hw';verbose='yes'",
        )?;
        assert_eq!(config.p4info, Some(PathBuf::from("build/main.p4info.txt")));
        assert_eq!(config.grpc_addr, "10.0.0.1:50051");
        assert_eq!((config.device_id, config.cpu_port), (3, 510));
        assert_eq!(config.ports, vec![1, 2, 3]);
        assert!(config.is_hardware());
        assert_eq!(config.election_id, 1);

        assert!(TestConfig::from_test_params("device_id='one'").is_err());
        assert!(TestConfig::from_test_params("device_id").is_err());
        assert!(TestConfig::from_test_params("pipeline_action=push").is_err());
        Ok(())
    }

    #[test]
    fn environment() -> anyhow::Result<()> {
        let vars = vec![
            ("P4PTF_DEVICE_ID".to_string(), "9".to_string()),
            ("P4PTF_PIPELINE_ACTION".to_string(), "verify-and-commit".to_string()),
            ("P4PTF_UNKNOWN".to_string(), "x".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let config = TestConfig::default().merge_env(vars)?;
        assert_eq!(config.device_id, 9);
        assert_eq!(config.pipeline_action()?, Some(SetPipelineAction::VerifyAndCommit));
        assert_eq!(config.arbitration_timeout(), Duration::from_secs(2));
        Ok(())
    }

    #[test]
    fn json() -> anyhow::Result<()> {
        let config: TestConfig =
            serde_json::from_str(r#"{"device_id": 4, "ports": [5, 6], "packet_timeout_ms": 100}"#)?;
        assert_eq!(config.device_id, 4);
        assert_eq!(config.ports, vec![5, 6]);
        assert_eq!(config.packet_timeout(), Duration::from_millis(100));
        assert_eq!(config.grpc_addr, "localhost:50051");

        let path = std::env::temp_dir().join(format!("p4ptf-config-{}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(&config)?)?;
        let loaded = TestConfig::from_json_file(&path);
        std::fs::remove_file(&path)?;
        assert_eq!(loaded?, config);
        Ok(())
    }
}
