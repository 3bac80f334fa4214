//! Settings for the rcon and ping tools. Rcon settings can come from named
//! server profiles in an INI file, with command line values taking
//! precedence.
//!
//! ```ini
//! [DEFAULT]
//! password = secret
//! timeout = 1.2
//!
//! [local]
//! server = 127.0.0.1:26001
//! type = 2
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;

use log::debug;

use crate::{
    client::{Client, DEFAULT_TIMEOUT},
    dns::{AddressFamily, DEFAULT_PORT},
    error::{RconError, Result},
    packet::SecureRcon,
    ping::PingProtocol,
};

#[derive(Debug, Clone)]
pub struct RconConfig {
    /// `host[:port]`, `[ipv6][:port]`
    pub server: String,
    pub password: String,
    pub secure_rcon: SecureRcon,
    /// How long to collect output of a command.
    pub timeout: Duration,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_owned(),
            password: String::new(),
            secure_rcon: SecureRcon::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RconConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(RconError::InvalidConfig("timeout must be positive".into()));
        }
        Ok(())
    }

    /// Validated, unconnected client.
    pub fn client(&self) -> Result<Client> {
        self.validate()?;
        Client::from_server_str(&self.server, &self.password, self.secure_rcon, self.timeout)
    }
}

/// Profile file looked up in the home directory when none is given.
pub const CONFIG_NAME: &str = ".xrcon.ini";
/// Section every profile falls back to, and the profile used when none is
/// named.
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Rcon settings given on the command line. Each one set here wins over
/// the profile.
#[derive(Debug, Clone, Default)]
pub struct RconOverrides {
    pub server: Option<String>,
    pub password: Option<String>,
    pub secure_rcon: Option<i64>,
    pub timeout: Option<Duration>,
}

/// Server profiles read from an INI file.
pub struct Profiles {
    ini: Ini,
}

impl Profiles {
    pub fn empty() -> Self {
        Profiles { ini: Ini::new() }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| RconError::InvalidConfig(e.to_string()))?;
        Ok(Profiles { ini })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| RconError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        debug!("loaded profiles from {}", path.display());
        Ok(Profiles { ini })
    }

    /// `~/.xrcon.ini`, if the home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_NAME))
    }

    /// Profiles from [`Profiles::default_path`]. A missing file means no
    /// profiles.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::empty()),
        }
    }

    pub fn has_profile(&self, name: &str) -> bool {
        name == DEFAULT_SECTION || self.ini.section(Some(name)).is_some()
    }

    fn get(&self, name: &str, key: &str) -> Option<&str> {
        self.ini
            .get_from(Some(name), key)
            .or_else(|| self.ini.get_from(Some(DEFAULT_SECTION), key))
    }

    fn parse_value<T: FromStr>(&self, name: &str, key: &str) -> Result<Option<T>> {
        self.get(name, key)
            .map(|text| {
                text.trim().parse().map_err(|_| {
                    RconError::InvalidConfig(format!("bad {} {:?} in profile {:?}", key, text, name))
                })
            })
            .transpose()
    }

    /// Rcon settings of profile `name`, `[DEFAULT]` when `None`.
    ///
    /// Values come from `overrides`, then the profile, then its `[DEFAULT]`
    /// section, then the built-in defaults. The server has no default.
    /// `prompt` supplies the password when nothing else does.
    pub fn rcon_config<F>(
        &self,
        name: Option<&str>,
        overrides: RconOverrides,
        prompt: F,
    ) -> Result<RconConfig>
    where
        F: FnOnce() -> io::Result<String>,
    {
        let name = name.unwrap_or(DEFAULT_SECTION);
        if !self.has_profile(name) {
            return Err(RconError::InvalidConfig(format!("no server profile named {:?}", name)));
        }

        let server = match overrides.server {
            Some(server) => server,
            None => self
                .get(name, "server")
                .ok_or_else(|| RconError::InvalidConfig(format!("no server for profile {:?}", name)))?
                .to_owned(),
        };

        let secure_rcon = match overrides.secure_rcon {
            Some(value) => value,
            None => self
                .parse_value(name, "type")?
                .unwrap_or_else(|| SecureRcon::default().as_i64()),
        };
        let secure_rcon = SecureRcon::try_from(secure_rcon)?;

        let timeout = match overrides.timeout {
            Some(timeout) => timeout,
            None => match self.parse_value::<f64>(name, "timeout")? {
                Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                    RconError::InvalidConfig(format!("bad timeout {} in profile {:?}", secs, name))
                })?,
                None => DEFAULT_TIMEOUT,
            },
        };

        let password = match overrides.password {
            Some(password) => password,
            None => match self.get(name, "password") {
                Some(password) => password.to_owned(),
                None => prompt()
                    .map_err(|e| RconError::InvalidConfig(format!("can't read password: {}", e)))?,
            },
        };

        let config = RconConfig {
            server,
            password,
            secure_rcon,
            timeout,
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct PingConfig {
    pub server: String,
    pub port: u16,
    pub protocol: PingProtocol,
    pub interval: Duration,
    /// Number of probes, 0 for no limit.
    pub count: u64,
    pub family: AddressFamily,
}

impl PingConfig {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
    pub const MIN_INTERVAL: Duration = Duration::from_millis(500);

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(RconError::InvalidConfig("port can't be zero".into()));
        }
        if self.interval < Self::MIN_INTERVAL {
            return Err(RconError::InvalidConfig(format!(
                "interval should be at least {:.1}s",
                Self::MIN_INTERVAL.as_secs_f64()
            )));
        }
        Ok(())
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_owned(),
            port: DEFAULT_PORT,
            protocol: PingProtocol::default(),
            interval: Self::DEFAULT_INTERVAL,
            count: 0,
            family: AddressFamily::Any,
        }
    }
}
