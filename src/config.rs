//! Configuration management for WSI Tiler.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `WSI_` prefix
//! - Sensible defaults for all optional settings
//!
//! The CLI exposes three subcommands: `serve` (run the tile server), `sign`
//! (produce a signed URL/signature for manual testing or scripting), and
//! `check` (verify S3 connectivity and configuration without starting a
//! server).
//!
//! # Example
//!
//! ```ignore
//! use wsi_tiler::config::{Cli, Command};
//! use clap::Parser;
//!
//! let cli = Cli::parse();
//! match cli.into_command() {
//!     Command::Serve(config) => { /* run the server */ }
//!     Command::Sign(config) => { /* print a signature */ }
//!     Command::Check(config) => { /* probe S3 */ }
//! }
//! ```
//!
//! # Environment Variables
//!
//! All `serve` configuration options can be set via environment variables with
//! the `WSI_` prefix:
//!
//! - `WSI_HOST` - Server bind address (default: 0.0.0.0)
//! - `WSI_PORT` - Server port (default: 3000)
//! - `WSI_S3_BUCKET` - S3 bucket name (required)
//! - `WSI_S3_ENDPOINT` - Custom S3 endpoint for S3-compatible services
//! - `WSI_S3_REGION` - AWS region (default: us-east-1)
//! - `WSI_AUTH_SECRET` - HMAC secret for signed URLs
//! - `WSI_AUTH_ENABLED` - Enable authentication (default: true)
//! - `WSI_CACHE_SLIDES` - Max slides to cache (default: 100)
//! - `WSI_CACHE_BLOCKS` - Max blocks per slide (default: 100)
//! - `WSI_CACHE_TILES` - Max tiles to cache (default: 1000)
//! - `WSI_JPEG_QUALITY` - Default JPEG quality (default: 80)
//! - `WSI_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)

use clap::{Parser, Subcommand, ValueEnum};

use crate::io::DEFAULT_BLOCK_SIZE;
use crate::tile::{DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default number of slides to cache.
pub const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 100;

/// Default number of blocks to cache per slide.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Default signed URL time-to-live in seconds (1 hour).
pub const DEFAULT_SIGN_TTL: u64 = 3600;

// =============================================================================
// Top-level CLI
// =============================================================================

/// WSI Tiler - A tile server for Whole Slide Images.
///
/// Serves tiles from Whole Slide Images stored in S3 or S3-compatible storage
/// using HTTP range requests. No local file downloads required.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-tiler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Consume the parsed CLI and return the selected subcommand.
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// The subcommand selected on the command line.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP tile server.
    Serve(ServeConfig),

    /// Produce a signed URL or signature for a tile path.
    Sign(SignConfig),

    /// Check S3 connectivity and configuration without starting a server.
    Check(CheckConfig),
}

// =============================================================================
// Serve Configuration
// =============================================================================

/// Configuration for the `serve` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct ServeConfig {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "WSI_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "WSI_PORT")]
    pub port: u16,

    // =========================================================================
    // S3 Configuration
    // =========================================================================
    /// S3 bucket name containing the slide files.
    #[arg(long, env = "WSI_S3_BUCKET")]
    pub s3_bucket: String,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    ///
    /// If not specified, uses the default AWS S3 endpoint.
    #[arg(long, env = "WSI_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "WSI_S3_REGION")]
    pub s3_region: String,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// Secret key for HMAC-SHA256 signed URL authentication.
    ///
    /// If not provided and auth is enabled, the server will fail to start.
    #[arg(long, env = "WSI_AUTH_SECRET")]
    pub auth_secret: Option<String>,

    /// Enable signed URL authentication.
    ///
    /// When disabled, all tile requests are allowed without authentication.
    /// WARNING: Only disable authentication in development/testing.
    #[arg(long, default_value_t = true, env = "WSI_AUTH_ENABLED")]
    pub auth_enabled: bool,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Maximum number of slides to keep in cache.
    #[arg(long, default_value_t = DEFAULT_SLIDE_CACHE_CAPACITY, env = "WSI_CACHE_SLIDES")]
    pub cache_slides: usize,

    /// Maximum number of blocks to cache per slide (256KB each).
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "WSI_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Maximum number of encoded tiles to cache.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "WSI_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Block size in bytes for the block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_BLOCK_SIZE")]
    pub block_size: usize,

    // =========================================================================
    // Tile Configuration
    // =========================================================================
    /// Default JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "WSI_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "WSI_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        // Check auth secret is provided when auth is enabled
        if self.auth_enabled && self.auth_secret.is_none() {
            return Err(
                "Authentication is enabled but no secret provided. \
                 Set --auth-secret or WSI_AUTH_SECRET, or disable auth with --auth-enabled=false"
                    .to_string(),
            );
        }

        // Validate bucket is not empty
        if self.s3_bucket.is_empty() {
            return Err("S3 bucket name is required. Set --s3-bucket or WSI_S3_BUCKET".to_string());
        }

        // Validate cache sizes
        if self.cache_slides == 0 {
            return Err("cache_slides must be greater than 0".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }

        // Validate JPEG quality
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        // Validate block size (must be power of 2 and reasonable)
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the configured S3 bucket name.
    pub fn bucket(&self) -> String {
        self.s3_bucket.clone()
    }

    /// Get the auth secret, panicking if not set (call validate() first).
    pub fn auth_secret_or_empty(&self) -> &str {
        self.auth_secret.as_deref().unwrap_or("")
    }
}

// =============================================================================
// Sign Configuration
// =============================================================================

/// Output format for the `sign` subcommand.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutputFormat {
    /// Print just the HMAC signature.
    Signature,
    /// Print a JSON object with signature, expiry, path and (if available) url.
    Json,
    /// Print a complete signed URL, or a path+query if no base URL is given.
    Url,
}

/// Configuration for the `sign` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct SignConfig {
    /// Request path to sign, e.g. "/tiles/sample.svs/0/0/0.jpg".
    pub path: String,

    /// Secret key used to compute the HMAC signature.
    #[arg(long, env = "WSI_AUTH_SECRET")]
    pub secret: String,

    /// Time-to-live for the signature, in seconds.
    #[arg(long, default_value_t = DEFAULT_SIGN_TTL)]
    pub ttl: u64,

    /// Additional query parameters to include in the signature, as key=value pairs.
    #[arg(long = "param", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Base URL to prepend when producing a complete signed URL.
    #[arg(long)]
    pub base_url: Option<String>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = SignOutputFormat::Url)]
    pub format: SignOutputFormat,
}

impl SignConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("A signing secret is required. Set --secret or WSI_AUTH_SECRET".to_string());
        }
        if self.path.is_empty() {
            return Err("A path to sign is required".to_string());
        }
        if !self.path.starts_with('/') {
            return Err("Path must start with '/'".to_string());
        }
        Ok(())
    }

    /// Parse the already-split `--param key=value` pairs.
    ///
    /// Parsing happens at argument parse time via [`parse_key_val`]; this just
    /// returns the already-validated pairs for use by the caller.
    pub fn parse_params(&self) -> Result<Vec<(String, String)>, String> {
        Ok(self.params.clone())
    }
}

/// Parse a single `key=value` command line argument.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=value pair: {}", s))?;
    Ok((key.to_string(), value.to_string()))
}

// =============================================================================
// Check Configuration
// =============================================================================

/// Configuration for the `check` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct CheckConfig {
    /// S3 bucket name to check. Falls back to WSI_S3_BUCKET if not given.
    #[arg(long, env = "WSI_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "WSI_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "WSI_S3_REGION")]
    pub s3_region: String,

    /// List all slide files found in the bucket.
    #[arg(long, default_value_t = false)]
    pub list_slides: bool,

    /// Check that a specific slide key exists in the bucket.
    #[arg(long)]
    pub test_slide: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CheckConfig {
    /// Resolve the bucket to check, returning an error message if none is configured.
    pub fn resolve_bucket(&self) -> Result<String, String> {
        self.s3_bucket
            .clone()
            .ok_or_else(|| "no bucket configured (set --s3-bucket or WSI_S3_BUCKET)".to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================
