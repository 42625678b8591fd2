//! Server configuration from environment variables.
//!
//! Every variable is optional:
//!
//! - `ORBIT_BIND_ADDR`      (default: "127.0.0.1:1999")
//! - `ORBIT_QUEUE_CAPACITY` (default: "256")
//! - `ORBIT_STORAGE_PATH`   (default: unset, presence kept in memory)
//! - `ORBIT_REGION_HEADER`  (default: "cf-ipcountry")
//! - `ORBIT_DEFAULT_ROOM`   (default: "main")
//! - `ORBIT_FISH_ROOMS`     (default: "tank", comma separated)

use orbit_relay::server::room_from_path;
use orbit_relay::ServerConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}: {reason}")]
    Parse {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Build a [`ServerConfig`] from the process environment.
pub fn from_env() -> Result<ServerConfig, ConfigError> {
    from_lookup(|key| env::var(key).ok())
}

/// Build a [`ServerConfig`] from an arbitrary variable source.
pub fn from_lookup<F>(lookup: F) -> Result<ServerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = ServerConfig::default();

    let bind_addr = lookup("ORBIT_BIND_ADDR").unwrap_or(defaults.bind_addr);
    let queue_capacity = read_or_default(&lookup, "ORBIT_QUEUE_CAPACITY", defaults.queue_capacity)?;
    if queue_capacity == 0 {
        return Err(ConfigError::Invalid {
            key: "ORBIT_QUEUE_CAPACITY",
            reason: "must be at least 1".to_string(),
        });
    }

    let storage_path = lookup("ORBIT_STORAGE_PATH")
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from);

    let region_header = match lookup("ORBIT_REGION_HEADER") {
        Some(header) if header.trim().is_empty() => {
            return Err(ConfigError::Invalid {
                key: "ORBIT_REGION_HEADER",
                reason: "header name is empty".to_string(),
            })
        }
        Some(header) => header.trim().to_ascii_lowercase(),
        None => defaults.region_header,
    };

    let default_room = match lookup("ORBIT_DEFAULT_ROOM") {
        Some(room) => room_id("ORBIT_DEFAULT_ROOM", &room)?,
        None => defaults.default_room,
    };

    let fish_rooms = match lookup("ORBIT_FISH_ROOMS") {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|room| !room.is_empty())
            .map(|room| room_id("ORBIT_FISH_ROOMS", room))
            .collect::<Result<Vec<_>, _>>()?,
        None => defaults.fish_rooms,
    };

    Ok(ServerConfig {
        bind_addr,
        queue_capacity,
        storage_path,
        region_header,
        default_room,
        fish_rooms,
    })
}

fn room_id(key: &'static str, raw: &str) -> Result<String, ConfigError> {
    match room_from_path(raw, "") {
        Some(room) if room == raw => Ok(room),
        _ => Err(ConfigError::Invalid {
            key,
            reason: format!("{raw:?} is not a valid room id"),
        }),
    }
}

fn read_or_default<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse::<T>().map_err(|e| ConfigError::Parse {
            key,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
