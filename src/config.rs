/*!
Service configuration.

Every key of the TOML file is optional; anything left out keeps its built-in
default. The default HOD credentials can also come from the environment, the
same variables the old superuser bootstrap command read.
*/
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_ENV: &str = "STUDENTD_CONFIG";
const ADMIN_EMAIL_ENV: &str = "TEST_SUPERUSER_EMAIL";
const ADMIN_PASSWORD_ENV: &str = "TEST_SUPERUSER_PASSWORD";

#[derive(Deserialize, Default)]
struct ConfigFile {
    workspace: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    admin_email: Option<String>,
    admin_password: Option<String>,
    session_ttl_hours: Option<i64>,
    session_sweep_minutes: Option<u64>,
    log: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Cfg {
    pub workspace: PathBuf,
    pub addr: SocketAddr,
    pub admin_email: String,
    pub admin_password: String,
    pub session_ttl_hours: i64,
    pub session_sweep_minutes: u64,
    pub log: String,
}

impl Default for Cfg {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("data"),
            addr: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), 8000),
            admin_email: "admin@studentd.local".to_owned(),
            admin_password: "admin".to_owned(),
            session_ttl_hours: 336,
            session_sweep_minutes: 60,
            log: "info".to_owned(),
        }
    }
}

impl Cfg {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("unable to load config file {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cf: ConfigFile = toml::from_str(contents).context("invalid TOML")?;
        Self::from_config_file(cf)
    }

    /// Resolves the configuration the binary runs with: an explicit path,
    /// else `$STUDENTD_CONFIG`, else defaults. Environment overrides for the
    /// default admin apply in every case.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        if let Ok(email) = std::env::var(ADMIN_EMAIL_ENV) {
            if !email.trim().is_empty() {
                cfg.admin_email = email.trim().to_owned();
            }
        }
        if let Ok(password) = std::env::var(ADMIN_PASSWORD_ENV) {
            if !password.is_empty() {
                cfg.admin_password = password;
            }
        }
        Ok(cfg)
    }

    fn from_config_file(cf: ConfigFile) -> anyhow::Result<Self> {
        let mut c = Self::default();

        if let Some(p) = cf.workspace {
            c.workspace = p;
        }
        if let Some(s) = cf.host {
            let ip: IpAddr = s
                .parse()
                .with_context(|| format!("error parsing {:?} as IP address", &s))?;
            c.addr.set_ip(ip);
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }
        if let Some(s) = cf.admin_email {
            c.admin_email = s;
        }
        if let Some(s) = cf.admin_password {
            c.admin_password = s;
        }
        if let Some(n) = cf.session_ttl_hours {
            anyhow::ensure!(n > 0, "session_ttl_hours must be positive, got {}", n);
            c.session_ttl_hours = n;
        }
        if let Some(n) = cf.session_sweep_minutes {
            anyhow::ensure!(n > 0, "session_sweep_minutes must be positive, got {}", n);
            c.session_sweep_minutes = n;
        }
        if let Some(s) = cf.log {
            c.log = s;
        }

        Ok(c)
    }
}
