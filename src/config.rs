use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use rust_decimal::Decimal;

use crate::alerts::DEFAULT_THRESHOLDS;
use crate::billing::Tariff;
use crate::engine::EngineSettings;
use crate::limits::MAX_SEATS;
use crate::model::*;

#[derive(Debug)]
pub enum ConfigError {
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    TlsPair,
    Tls(io::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "{var}={value:?} is invalid: {reason}")
            }
            ConfigError::TlsPair => write!(
                f,
                "both DESKBOOK_TLS_CERT and DESKBOOK_TLS_KEY must be set, or neither"
            ),
            ConfigError::Tls(e) => write!(f, "TLS setup failed: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Server and venue configuration, read from `DESKBOOK_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends after which the compactor rewrites the log.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<(PathBuf, PathBuf)>,
    pub engine: EngineSettings,
    pub alert_interval: Duration,
    /// Minute marks, descending.
    pub alert_thresholds: Vec<u32>,
    pub reconcile_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(&lookup);

        let tls = match (env.raw("DESKBOOK_TLS_CERT"), env.raw("DESKBOOK_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            _ => return Err(ConfigError::TlsPair),
        };

        let seats: u32 = env.parse("DESKBOOK_SEATS", 24)?;
        if seats == 0 || seats > MAX_SEATS {
            return Err(env.invalid("DESKBOOK_SEATS", format!("must be 1..={MAX_SEATS}")));
        }
        let seat_hourly: Decimal = env.parse("DESKBOOK_SEAT_RATE", Tariff::default().seat_hourly)?;
        let room_hourly: Decimal = env.parse("DESKBOOK_ROOM_RATE", Tariff::default().room_hourly)?;
        for (var, rate) in [("DESKBOOK_SEAT_RATE", seat_hourly), ("DESKBOOK_ROOM_RATE", room_hourly)] {
            if rate.is_sign_negative() && !rate.is_zero() {
                return Err(env.invalid(var, "must not be negative".into()));
            }
        }
        let free_minutes: u32 = env.parse("DESKBOOK_FREE_MINUTES", 0)?;
        let promo_days: u32 = env.parse("DESKBOOK_PROMO_CODE_MIN_DAYS", 7)?;
        let timezone: Tz = env.parse("DESKBOOK_TIMEZONE", chrono_tz::Asia::Manila)?;

        let alert_thresholds = match env.raw("DESKBOOK_ALERT_THRESHOLDS") {
            None => DEFAULT_THRESHOLDS.to_vec(),
            Some(raw) => parse_thresholds(&raw)
                .map_err(|reason| env.invalid("DESKBOOK_ALERT_THRESHOLDS", reason))?,
        };

        let alert_secs: u64 = env.parse("DESKBOOK_ALERT_INTERVAL_SECS", 5)?;
        let reconcile_secs: u64 = env.parse("DESKBOOK_RECONCILE_INTERVAL_SECS", 30)?;
        if alert_secs == 0 {
            return Err(env.invalid("DESKBOOK_ALERT_INTERVAL_SECS", "must be positive".into()));
        }
        if reconcile_secs == 0 {
            return Err(env.invalid("DESKBOOK_RECONCILE_INTERVAL_SECS", "must be positive".into()));
        }

        let metrics_port = match env.raw("DESKBOOK_METRICS_PORT") {
            None => None,
            Some(_) => Some(env.parse("DESKBOOK_METRICS_PORT", 0u16)?),
        };

        Ok(Self {
            port: env.parse("DESKBOOK_PORT", 5433)?,
            bind: env.raw("DESKBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(env.raw("DESKBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: env.raw("DESKBOOK_PASSWORD").unwrap_or_else(|| "deskbook".into()),
            max_connections: env.parse("DESKBOOK_MAX_CONNECTIONS", 256)?,
            compact_threshold: env.parse("DESKBOOK_COMPACT_THRESHOLD", 1000)?,
            metrics_port,
            tls,
            engine: EngineSettings {
                catalog: Catalog::with_seats(seats),
                tariff: Tariff {
                    seat_hourly,
                    room_hourly,
                    free_allowance_ms: Ms::from(free_minutes) * MINUTE_MS,
                },
                timezone,
                promo_code_min_ms: Ms::from(promo_days) * DAY_MS,
            },
            alert_interval: Duration::from_secs(alert_secs),
            alert_thresholds,
            reconcile_interval: Duration::from_secs(reconcile_secs),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("deskbook.wal")
    }

    /// Build the TLS acceptor from the configured PEM files, if any.
    pub fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>, ConfigError> {
        let Some((cert_path, key_path)) = &self.tls else {
            return Ok(None);
        };
        let invalid = |msg: &str| ConfigError::Tls(io::Error::new(io::ErrorKind::InvalidInput, msg.to_string()));

        let certs: Vec<_> =
            rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path).map_err(ConfigError::Tls)?))
                .collect::<Result<_, _>>()
                .map_err(ConfigError::Tls)?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(
            File::open(key_path).map_err(ConfigError::Tls)?,
        ))
        .map_err(ConfigError::Tls)?
        .ok_or_else(|| invalid("no private key found in key file"))?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| invalid(&e.to_string()))?;
        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

struct Lookup<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    /// Unset and blank are the same.
    fn raw(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value,
                reason: e.to_string(),
            }),
        }
    }

    fn invalid(&self, var: &'static str, reason: String) -> ConfigError {
        ConfigError::Invalid {
            var,
            value: self.raw(var).unwrap_or_default(),
            reason,
        }
    }
}

/// `"5,3,1"` → `[5, 3, 1]`, sorted descending without duplicates.
fn parse_thresholds(raw: &str) -> Result<Vec<u32>, String> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        let minutes: u32 = part
            .trim()
            .parse()
            .map_err(|e| format!("{part:?}: {e}"))?;
        if minutes == 0 {
            return Err("thresholds must be positive minutes".into());
        }
        out.push(minutes);
    }
    out.sort_unstable_by(|a, b| b.cmp(a));
    out.dedup();
    Ok(out)
}
