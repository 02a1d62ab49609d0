//! Migration Backend Abstractions
//!
//! PostgreSQL runs migrations in production; the in-memory backend keeps the
//! same semantics without a server.

pub mod core;
pub mod memory;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use memory::{MemoryBackend, SchemaState};
pub use postgres::PostgresBackend;

/// Backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendType {
    Postgres,
    Memory,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::Postgres => write!(f, "postgres"),
            BackendType::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(BackendType::Postgres),
            "memory" => Ok(BackendType::Memory),
            _ => Err(format!("Unsupported migration backend: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("PostgreSQL".parse::<BackendType>().unwrap(), BackendType::Postgres);
        assert_eq!("memory".parse::<BackendType>().unwrap(), BackendType::Memory);
        assert!("mysql".parse::<BackendType>().is_err());
    }
}
