use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use flatten_dns::FlattenConfig;
use serde::Deserialize;

/// Default value for listening at
fn default_listen_at() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 53)
}

/// Default value for upstream timeout
fn default_timeout() -> Duration {
    flatten_dns::DEFAULT_UPSTREAM_TIMEOUT
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// DNS server listen at, udp and tcp
    #[serde(default = "default_listen_at")]
    pub listen_at: SocketAddr,
    /// Timeout for every upstream exchange
    #[serde(with = "duration", default = "default_timeout")]
    pub timeout: Duration,
    /// Nameserver answering the queries no flatten directive claims,
    /// leave empty to answer them with SERVFAIL
    #[serde(default)]
    pub forward: Option<SocketAddr>,
    /// Flatten directives, `ORIGINAL TARGET UPSTREAM`
    #[serde(with = "directives")]
    pub flatten: Vec<FlattenConfig>,
}

impl Config {
    /// Load configuration from file path
    pub fn load<T: AsRef<Path>>(path: T) -> Result<Self> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.flatten.is_empty() {
            return Err(anyhow::format_err!("at least one flatten directive is required"));
        }
        for (i, directive) in self.flatten.iter().enumerate() {
            if let Some(dup) = self.flatten[..i]
                .iter()
                .find(|d| d.original == directive.original)
            {
                return Err(anyhow::format_err!(
                    "'{}' is flattened twice, to '{}' and to '{}'",
                    directive.original,
                    dup.target,
                    directive.target
                ));
            }
        }
        Ok(())
    }
}

mod duration {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let invalid = || format!("invalid value: {}, expected 10s or 10ms", s);
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (num, unit) = s.split_at(split);
        let n: u64 = num.parse().map_err(|_| invalid())?;
        match unit {
            "s" => Ok(Duration::from_secs(n)),
            "ms" => Ok(Duration::from_millis(n)),
            _ => Err(invalid()),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(Error::custom)
    }
}

mod directives {
    use std::str::FromStr;

    use flatten_dns::FlattenConfig;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<FlattenConfig>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let directives: Vec<String> = Vec::deserialize(deserializer)?;
        directives
            .iter()
            .map(|s| {
                FlattenConfig::from_str(s)
                    .map_err(|err| D::Error::custom(format!("flatten '{}': {}", s, err)))
            })
            .collect()
    }
}
