use std::net::{IpAddr, Ipv4Addr};

use crate::game::constants::net;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Largest datagram emitted before multipart fragmentation kicks in
    pub max_packet: usize,
    /// Fixed seed for per-game randomness; None draws from entropy
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: net::DEFAULT_PORT,
            max_packet: net::MAX_PACKET,
            seed: None,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SLINK_BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid SLINK_BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Ok(port) = std::env::var("SLINK_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.port = parsed;
                } else {
                    tracing::warn!("SLINK_PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid SLINK_PORT '{}', using default", port);
            }
        }

        if let Ok(max_packet) = std::env::var("SLINK_MAX_PACKET") {
            if let Ok(parsed) = max_packet.parse::<usize>() {
                if (64..=8192).contains(&parsed) {
                    config.max_packet = parsed;
                } else {
                    tracing::warn!("SLINK_MAX_PACKET must be 64-8192, using default");
                }
            } else {
                tracing::warn!("Invalid SLINK_MAX_PACKET '{}', using default", max_packet);
            }
        }

        if let Ok(seed) = std::env::var("SLINK_SEED") {
            if let Ok(parsed) = seed.parse::<u64>() {
                config.seed = Some(parsed);
            } else {
                tracing::warn!("Invalid SLINK_SEED '{}', ignoring", seed);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        // A packet must at least hold a frame plus one multipart body byte.
        if self.max_packet < 64 {
            return Err("max_packet must be at least 64".to_string());
        }
        Ok(())
    }
}
