use std::path::Path;

use qcommon::logging::LoggerSettings;
use serde_derive::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 6379;

#[derive(Serialize, Deserialize)]
pub struct Network {
    pub address: String,
    pub max_clients: u32,
    /// Initial capacity requested for each connection's read/write ring
    /// buffers; rounded up to the next power of two.
    pub ring_buffer_size: usize,
}

#[derive(Serialize, Deserialize)]
pub struct Server {
    pub password: Option<String>,
    pub databases: usize,
}

#[derive(Serialize, Deserialize)]
pub struct ServerConfig {
    pub network: Network,
    pub server: Server,
    pub logging: LoggerSettings,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            network: Network {
                address: format!("0.0.0.0:{}", DEFAULT_PORT),
                max_clients: 10_000,
                ring_buffer_size: 16 * 1024,
            },
            server: Server {
                password: None,
                databases: 16,
            },
            logging: LoggerSettings::default(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        serdeconv::from_toml_file(path).expect("Error loading server configuration file")
    }
}
